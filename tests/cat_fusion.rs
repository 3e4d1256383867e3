use std::collections::BTreeSet;
use std::sync::Arc;

use polars::prelude::*;
use splice_outlier::aggregate::Granularity;
use splice_outlier::cat::{CatMode, CatSource, TISSUE_CAT_COLUMN, TableCatSource};
use splice_outlier::filter::SamplesForTissue;
use splice_outlier::frame::{floats, strings};
use splice_outlier::io::write_table;
use splice_outlier::score::ScoreSource;
use splice_outlier::{OutlierError, SpliceOutlierResult, ViewName};
use tempfile::tempdir;

fn predictions() -> DataFrame {
    df!(
        "variant" => ["vA", "vA", "vA", "vB"],
        "junction" => ["j1", "j2", "j3", "j4"],
        "tissue" => ["testis", "testis", "lung", "lung"],
        "event_type" => ["psi5", "psi3", "psi5", "psi3"],
        "splice_site" => ["s1", "s2", "s3", "s4"],
        "gene_name" => ["BRCA1", "BRCA1", "BRCA1", "TP53"],
        "delta_psi" => [-0.4, 0.1, 0.3, 0.2],
    )
    .unwrap()
}

fn annotated() -> SpliceOutlierResult {
    let mut result = SpliceOutlierResult::new(predictions()).unwrap();
    result
        .add_samples(
            &df!(
                "variant" => ["vA", "vA", "vB"],
                "sample" => ["NA00002", "NA00003", "NA00002"],
                "genotype" => ["0/1", "1/1", "0/1"],
            )
            .unwrap(),
        )
        .unwrap();
    result
}

fn measurements(rows: &[(&str, &str, &str, f64)]) -> DataFrame {
    df!(
        "junction" => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
        "sample" => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
        "tissue" => rows.iter().map(|r| r.2).collect::<Vec<_>>(),
        "delta_psi_cat" => rows.iter().map(|r| r.3).collect::<Vec<_>>(),
    )
    .unwrap()
}

fn sources() -> Vec<Arc<dyn CatSource>> {
    vec![
        Arc::new(
            TableCatSource::new(
                "blood",
                measurements(&[("j1", "NA00002", "testis", -0.3), ("j4", "NA00002", "lung", 0.1)]),
            )
            .unwrap(),
        ),
        Arc::new(
            TableCatSource::new("fibroblasts", measurements(&[("j3", "NA00003", "lung", 0.2)])).unwrap(),
        ),
        Arc::new(
            TableCatSource::new("skin", measurements(&[("j9", "NA00002", "testis", 0.9)])).unwrap(),
        ),
    ]
}

#[test]
fn featurized_views_keep_one_row_per_entity() {
    let mut result = annotated();
    result.infer_cat(sources()).unwrap();

    for granularity in Granularity::ALL {
        let plain = result.view(granularity).unwrap().clone();
        let fused = result.cat_view(granularity, CatMode::Featurized).unwrap();
        assert_eq!(fused.height(), plain.height());
        assert_eq!(fused.index(), plain.index());
        for tissue in ["blood", "fibroblasts", "skin"] {
            assert!(fused.has_column(&format!("delta_psi_{tissue}")));
            assert!(fused.has_column(&format!("median_n_{tissue}")));
        }
    }

    let gene = result.cat_view(Granularity::Gene, CatMode::Featurized).unwrap();
    assert_eq!(gene.height(), 5);
    let row = gene.find_by_index(&["BRCA1", "NA00002", "testis"]).unwrap();
    assert_eq!(gene.float_at(row, "delta_psi_blood").unwrap(), Some(-0.3));
    assert_eq!(gene.float_at(row, "delta_psi_fibroblasts").unwrap(), None);
    let row = gene.find_by_index(&["BRCA1", "NA00003", "lung"]).unwrap();
    assert_eq!(gene.float_at(row, "delta_psi_fibroblasts").unwrap(), Some(0.2));
    let skin = floats(gene.frame(), "delta_psi_skin").unwrap();
    assert_eq!(skin.null_count(), skin.len());
}

#[test]
fn gene_evidence_is_collected_from_every_junction_of_the_gene() {
    // j1 (-0.4) represents BRCA1 for NA00002 in testis; blood only measured j2.
    let mut result = annotated();
    let blood: Arc<dyn CatSource> = Arc::new(
        TableCatSource::new("blood", measurements(&[("j2", "NA00002", "testis", -0.7)])).unwrap(),
    );
    result.infer_cat(vec![blood]).unwrap();

    let gene = result.gene().unwrap().clone();
    let row = gene.find_by_index(&["BRCA1", "NA00002", "testis"]).unwrap();
    assert_eq!(gene.str_at(row, "junction").unwrap().as_deref(), Some("j1"));

    let featurized = result.cat_view(Granularity::Gene, CatMode::Featurized).unwrap();
    let row = featurized.find_by_index(&["BRCA1", "NA00002", "testis"]).unwrap();
    assert_eq!(featurized.float_at(row, "delta_psi_blood").unwrap(), Some(-0.7));

    let concat = result
        .cat_view(Granularity::Gene, CatMode::Concatenated)
        .unwrap();
    assert_eq!(concat.height(), 5);
    let row = concat
        .find_by_index(&["BRCA1", "NA00002", "testis", "blood"])
        .unwrap();
    assert_eq!(concat.float_at(row, "delta_psi_cat").unwrap(), Some(-0.7));

    // At junction level the measurement stays on j2.
    let junction = result
        .cat_view(Granularity::Junction, CatMode::Featurized)
        .unwrap();
    let row = junction.find_by_index(&["j1", "NA00002", "testis"]).unwrap();
    assert_eq!(junction.float_at(row, "delta_psi_blood").unwrap(), None);
    let row = junction.find_by_index(&["j2", "NA00002", "testis"]).unwrap();
    assert_eq!(junction.float_at(row, "delta_psi_blood").unwrap(), Some(-0.7));
}

#[test]
fn concatenated_views_repeat_rows_per_matched_tissue() {
    let mut result = annotated();
    result.infer_cat(sources()).unwrap();

    for granularity in Granularity::ALL {
        let plain_rows = result.view(granularity).unwrap().height();
        let featurized_rows = result
            .cat_view(granularity, CatMode::Featurized)
            .unwrap()
            .height();
        let concat = result
            .cat_view(granularity, CatMode::Concatenated)
            .unwrap();
        let tissues = strings(concat.frame(), TISSUE_CAT_COLUMN).unwrap();
        let matched: BTreeSet<String> = tissues
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        assert_eq!(matched.len(), 2);
        assert!(!matched.contains("skin"));
        assert_eq!(concat.height(), plain_rows * matched.len());
        assert!(concat.height() >= featurized_rows);
        assert_eq!(concat.index().last().map(String::as_str), Some(TISSUE_CAT_COLUMN));
    }
}

#[test]
fn rna_seq_filter_after_cat_inference_recomputes_cat_views() {
    let mut result = annotated();
    result.infer_cat(sources()).unwrap();
    let concat = ViewName::Cat(Granularity::Gene, CatMode::Concatenated);
    let lung_rows = |frame: &DataFrame| -> Vec<(String, String, String)> {
        let genes = strings(frame, "gene_name").unwrap();
        let samples = strings(frame, "sample").unwrap();
        let tissues = strings(frame, "tissue").unwrap();
        let tissue_cat = strings(frame, TISSUE_CAT_COLUMN).unwrap();
        (0..frame.height())
            .filter(|&r| tissues.get(r) == Some("lung"))
            .map(|r| {
                (
                    genes.get(r).unwrap_or_default().to_string(),
                    samples.get(r).unwrap_or_default().to_string(),
                    tissue_cat.get(r).unwrap_or_default().to_string(),
                )
            })
            .collect()
    };

    let before = result.get(concat).unwrap().clone();
    assert!(result.is_cached(concat));
    let testis_samples: BTreeSet<String> = {
        let samples = strings(before.frame(), "sample").unwrap();
        let tissues = strings(before.frame(), "tissue").unwrap();
        (0..before.height())
            .filter(|&r| tissues.get(r) == Some("testis"))
            .filter_map(|r| samples.get(r).map(str::to_string))
            .collect()
    };
    assert!(testis_samples.contains("NA00003"));

    let mut allowed = SamplesForTissue::new();
    allowed.insert("testis".to_string(), vec!["NA00002".to_string()]);
    result.filter_by_rna_seq_samples(&allowed).unwrap();
    assert!(!result.is_cached(concat));

    let after = result.get(concat).unwrap().clone();
    let samples = strings(after.frame(), "sample").unwrap();
    let tissues = strings(after.frame(), "tissue").unwrap();
    let mut testis_rows = 0;
    for (sample, tissue) in samples.into_iter().zip(tissues.into_iter()) {
        if tissue == Some("testis") {
            testis_rows += 1;
            assert_eq!(sample, Some("NA00002"));
        }
    }
    assert!(testis_rows > 0);
    assert_eq!(lung_rows(after.frame()), lung_rows(before.frame()));
}

#[test]
fn cat_views_follow_score_changes() {
    let mut result = annotated();
    result.infer_cat(sources()).unwrap();
    let before = result
        .cat_view(Granularity::Gene, CatMode::Featurized)
        .unwrap()
        .clone();
    assert!(result.is_cached(ViewName::Cat(Granularity::Gene, CatMode::Featurized)));

    let scores = df!(
        "variant" => ["vA"],
        "delta_score" => [0.8],
    )
    .unwrap();
    result.add_score(ScoreSource::new("spliceAI", scores).unwrap()).unwrap();
    assert!(!result.is_cached(ViewName::Cat(Granularity::Gene, CatMode::Featurized)));

    let after = result
        .cat_view(Granularity::Gene, CatMode::Featurized)
        .unwrap();
    assert_eq!(after.height(), before.height());
    assert!(after.has_column("delta_score"));
    assert!(after.has_column("delta_psi_blood"));
}

#[test]
fn sources_can_be_read_from_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blood.tsv");
    write_table(
        &measurements(&[("j1", "NA00002", "testis", -0.3)]),
        &path,
    )
    .unwrap();

    let mut result = annotated();
    let source: Arc<dyn CatSource> = Arc::new(TableCatSource::from_path("blood", &path).unwrap());
    result.infer_cat(vec![source]).unwrap();
    let gene = result.cat_view(Granularity::Gene, CatMode::Concatenated).unwrap();
    assert_eq!(gene.height(), 5);
    let row = gene.find_by_index(&["BRCA1", "NA00002", "testis", "blood"]).unwrap();
    assert_eq!(gene.float_at(row, "delta_psi_cat").unwrap(), Some(-0.3));
}

#[test]
fn concatenation_without_matches_is_reported() {
    let mut result = annotated();
    result
        .infer_cat(vec![Arc::new(
            TableCatSource::new("skin", measurements(&[("j9", "NA00002", "testis", 0.9)])).unwrap(),
        )])
        .unwrap();
    let err = result
        .cat_view(Granularity::Gene, CatMode::Concatenated)
        .unwrap_err();
    assert!(matches!(err, OutlierError::InsufficientData(_)));

    let dir = tempdir().unwrap();
    let written = result.write_views(dir.path()).unwrap();
    let names: Vec<String> = written
        .iter()
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    assert!(names.contains(&"gene_cat_features".to_string()));
    assert!(!names.iter().any(|n| n.ends_with("cat_concat")));
    assert_eq!(names.len(), 6);
}

#[test]
fn cat_inference_rejects_samples_without_genotype() {
    let mut result = SpliceOutlierResult::new(predictions()).unwrap();
    result
        .add_samples(
            &df!(
                "variant" => ["vA", "vA", "vB"],
                "sample" => ["NA00002", "NA00003", "NA00002"],
                "genotype" => [Some("0/1"), None, Some("0/1")],
            )
            .unwrap(),
        )
        .unwrap();
    match result.infer_cat(sources()) {
        Err(OutlierError::Configuration(message)) => assert!(message.contains("NA00003"), "{message}"),
        other => panic!("expected a configuration error, got {other:?}"),
    }
    assert!(result.cat_sources().is_empty());
}

#[test]
fn duplicate_cat_tissues_are_rejected() {
    let mut result = annotated();
    let twice: Vec<Arc<dyn CatSource>> = vec![
        Arc::new(TableCatSource::new("blood", measurements(&[])).unwrap()),
        Arc::new(TableCatSource::new("blood", measurements(&[])).unwrap()),
    ];
    assert!(matches!(
        result.infer_cat(twice),
        Err(OutlierError::Configuration(_))
    ));
    assert!(result.cat_sources().is_empty());
}
