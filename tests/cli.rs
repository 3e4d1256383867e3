use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::Command;

use splice_outlier::frame::{float_values, has_column, strings};
use splice_outlier::io::read_table;
use tempfile::tempdir;

const GENES: usize = 8;
/// A numeric sample identifier, which must survive every read as text.
const SAMPLE: &str = "0042";

fn junction(g: usize) -> String {
    format!("1:{}-{}:+", 1000 * (g + 1) + 100, 1000 * (g + 1) + 500)
}

fn variant(g: usize) -> String {
    format!("1:{}:A>G", 1000 * (g + 1) + 120)
}

/// Scorer output, SpliceMaps for testis and lung, carriers, one blood CAT
/// table and a label file, plus the run configuration tying them together.
fn write_inputs(dir: &Path) {
    let mut scores = String::from("variant,junction,event_type,delta_logit_psi\n");
    for g in 0..GENES {
        writeln!(scores, "{},{},psi5,{}", variant(g), junction(g), g as f64 - 3.5).unwrap();
    }
    fs::write(dir.join("scores.csv"), scores).expect("write scorer output");

    for (tissue, ref_psi) in [("testis", 0.5), ("lung", 0.3)] {
        let mut map = String::from(
            "junction\ttissue\tevent_type\tChromosome\tStart\tEnd\tStrand\tref_psi\tmedian_n\tnovel_junction\tgene_name\n",
        );
        for g in 0..GENES {
            writeln!(
                map,
                "{}\t{tissue}\tpsi5\t1\t{}\t{}\t+\t{ref_psi}\t25\tFalse\tGENE{g}",
                junction(g),
                1000 * (g + 1) + 100,
                1000 * (g + 1) + 500
            )
            .unwrap();
        }
        fs::write(dir.join(format!("splicemap_{tissue}.tsv")), map).expect("write splicemap");
    }

    let mut carriers = String::from("variant,sample,genotype\n");
    for g in 0..GENES {
        writeln!(carriers, "{},{SAMPLE},0/1", variant(g)).unwrap();
    }
    fs::write(dir.join("var_samples.csv"), carriers).expect("write carriers");

    let cat = format!(
        "junction,sample,tissue,delta_psi_cat,median_n_cat\n{},{SAMPLE},testis,-0.35,40\n",
        junction(0)
    );
    fs::write(dir.join("blood.csv"), cat).expect("write CAT table");

    let mut labels = String::from("variant,gene_name,outlier\n");
    for g in 0..GENES {
        let outlier = u8::from((g >= 4) != (g == 5 || g == 2));
        writeln!(labels, "{},GENE{g},{outlier}", variant(g)).unwrap();
    }
    fs::write(dir.join("labels.csv"), labels).expect("write labels");

    let config = r#"
[[cat]]
tissue = "blood"
path = "blood.csv"

[[score]]
name = "labels"
path = "labels.csv"

[samples]
genotypes = "var_samples.csv"

[ensemble]
view = "gene"
features = ["delta_psi"]
label = "outlier"
fold_count = 2
"#;
    fs::write(dir.join("run.toml"), config).expect("write config");
}

fn run(dir: &Path, args: &[&str]) {
    let exe = env!("CARGO_BIN_EXE_splice-outlier");
    let output = Command::new(exe)
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run splice-outlier cli");
    assert!(
        output.status.success(),
        "CLI {args:?} exited with {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn assemble_aggregate_train_and_predict() {
    let tmp = tempdir().expect("temporary directory");
    let dir = tmp.path();
    write_inputs(dir);

    run(
        dir,
        &[
            "assemble",
            "scores.csv",
            "--splicemap",
            "splicemap_testis.tsv",
            "splicemap_lung.tsv",
            "--batch-size",
            "3",
            "--output",
            "predictions.csv",
        ],
    );
    let predictions = read_table(dir.join("predictions.csv")).expect("read predictions");
    assert_eq!(predictions.height(), 2 * GENES);
    assert!(has_column(&predictions, "delta_psi"));

    run(
        dir,
        &["aggregate", "predictions.csv", "--config", "run.toml", "--output-dir", "views"],
    );
    for view in [
        "junction",
        "splice_site",
        "gene",
        "junction_cat_concat",
        "gene_cat_concat",
        "gene_cat_features",
    ] {
        assert!(dir.join("views").join(format!("{view}.csv")).exists(), "{view}.csv missing");
    }
    let gene = read_table(dir.join("views/gene.csv")).expect("read gene view");
    assert_eq!(gene.height(), 2 * GENES);
    assert!(has_column(&gene, "outlier"));
    assert_eq!(strings(&gene, "sample").unwrap().get(0), Some(SAMPLE));
    let features = read_table(dir.join("views/gene_cat_features.csv")).expect("read CAT view");
    assert_eq!(features.height(), gene.height());
    let blood = float_values(&features, "delta_psi_blood").unwrap();
    assert_eq!(blood.iter().flatten().copied().collect::<Vec<_>>(), vec![-0.35]);

    run(
        dir,
        &["train", "predictions.csv", "--config", "run.toml", "--output-dir", "ensemble"],
    );
    let cv = read_table(dir.join("ensemble/cv_predictions.csv")).expect("read cv predictions");
    assert_eq!(cv.height(), 2 * GENES);
    for column in ["gene_name", "sample", "tissue", "fold", "y_test", "y_pred"] {
        assert!(has_column(&cv, column), "cv output lacks '{column}'");
    }
    assert!(dir.join("ensemble/model_fold0.toml").exists());
    assert!(dir.join("ensemble/model_fold1.toml").exists());

    run(
        dir,
        &[
            "predict",
            "predictions.csv",
            "--config",
            "run.toml",
            "--model",
            "ensemble/model_fold0.toml",
            "--output",
            "scored.csv",
        ],
    );
    let scored = read_table(dir.join("scored.csv")).expect("read scored view");
    assert_eq!(scored.height(), 2 * GENES);
    let preds = float_values(&scored, "ensemble_pred").unwrap();
    assert!(preds.iter().all(|p| p.is_some_and(|p| (0.0..=1.0).contains(&p))));
}

#[test]
fn failures_exit_non_zero_with_a_message() {
    let tmp = tempdir().expect("temporary directory");
    let exe = env!("CARGO_BIN_EXE_splice-outlier");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["aggregate", "missing.csv"])
        .output()
        .expect("run splice-outlier cli");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));

    fs::write(tmp.path().join("bad.toml"), "[ensemble]\nview = \"exon\"\n").expect("write config");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["train", "missing.csv", "--config", "bad.toml"])
        .output()
        .expect("run splice-outlier cli");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown view 'exon'"));
}
