//! # CAT Evidence Fusion
//!
//! Joins RNA-seq measurements from clinically accessible tissues (CAT) onto a
//! sample-level DNA view. Every source covers one CAT tissue and returns rows
//! keyed by `(junction, sample, tissue)`, where `tissue` is the DNA target
//! tissue the measurement was projected onto.
//!
//! Above junction level, measurements are first mapped to the entity of the
//! view (splice site or gene) through the junctions of the base table and
//! reduced to one row per `(entity, sample, tissue)`, keeping the measurement
//! with the largest `|delta_psi_cat|`. Evidence on any junction of an entity
//! therefore reaches the entity row, whichever junction represents it.
//!
//! Two output shapes are supported:
//!
//! - **concatenated**: one left-joined copy of the view per CAT tissue that
//!   matched anything, stacked vertically and told apart by `tissue_cat`.
//! - **featurized**: one row per view row; each source contributes its own
//!   measurement columns, renamed from `<name>_cat` to `<name>_<tissue>`.

use crate::aggregate::Granularity;
use crate::error::{OutlierError, Result};
use crate::frame::{
    IndexedFrame, duplicated_key, filter_rows, floats, has_column, inner_join, left_join,
    representative_rows, strings, vstack_all,
};
use crate::io::read_table;
use ahash::AHashSet;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Measurement columns every CAT source is normalised to.
pub const CAT_MEASUREMENT_COLUMNS: [&str; 8] = [
    "count_cat",
    "psi_cat",
    "ref_psi_cat",
    "k_cat",
    "n_cat",
    "median_n_cat",
    "delta_logit_psi_cat",
    "delta_psi_cat",
];

/// Columns a CAT measurement row is keyed by.
pub const CAT_JOIN_KEY: [&str; 3] = ["junction", "sample", "tissue"];

/// Measurement that picks the representative row of an entity.
pub const CAT_EFFECT_COLUMN: &str = "delta_psi_cat";

/// Discriminator column of the concatenated shape.
pub const TISSUE_CAT_COLUMN: &str = "tissue_cat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatMode {
    Concatenated,
    Featurized,
}

impl CatMode {
    pub const ALL: [CatMode; 2] = [CatMode::Concatenated, CatMode::Featurized];

    /// Suffix of the derived view name, as in `gene_cat_concat`.
    pub fn suffix(self) -> &'static str {
        match self {
            CatMode::Concatenated => "cat_concat",
            CatMode::Featurized => "cat_features",
        }
    }
}

impl fmt::Display for CatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Genes and samples a CAT source is asked about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatSelection {
    pub genes: AHashSet<String>,
    pub samples: AHashSet<String>,
}

impl CatSelection {
    /// Distinct non-missing genes and samples of a sample-level frame.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let collect = |name: &str| -> Result<AHashSet<String>> {
            if !has_column(df, name) {
                return Ok(AHashSet::new());
            }
            Ok(strings(df, name)?
                .into_iter()
                .flatten()
                .map(str::to_string)
                .collect())
        };
        Ok(Self {
            genes: collect("gene_name")?,
            samples: collect("sample")?,
        })
    }
}

/// A provider of RNA-seq measurements for one CAT tissue.
pub trait CatSource: Send + Sync + fmt::Debug {
    /// Name of the CAT tissue, used for `tissue_cat` and feature suffixes.
    fn tissue(&self) -> &str;

    /// Measurement rows for the selected genes and samples. The frame must
    /// contain the join key columns; measurement columns it lacks are treated
    /// as missing.
    fn measurements(&self, selection: &CatSelection) -> Result<DataFrame>;
}

/// A CAT source backed by a frame held in memory.
#[derive(Debug, Clone)]
pub struct TableCatSource {
    tissue: String,
    df: DataFrame,
}

impl TableCatSource {
    pub fn new(tissue: impl Into<String>, df: DataFrame) -> Result<Self> {
        let tissue = tissue.into();
        for key in CAT_JOIN_KEY {
            if !has_column(&df, key) {
                return Err(OutlierError::Configuration(format!(
                    "CAT source '{tissue}' lacks join column '{key}'"
                )));
            }
        }
        Ok(Self { tissue, df })
    }

    pub fn from_path(tissue: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        Self::new(tissue, read_table(path)?)
    }
}

impl CatSource for TableCatSource {
    fn tissue(&self) -> &str {
        &self.tissue
    }

    fn measurements(&self, selection: &CatSelection) -> Result<DataFrame> {
        let samples = strings(&self.df, "sample")?;
        let genes = if has_column(&self.df, "gene_name") {
            Some(strings(&self.df, "gene_name")?)
        } else {
            None
        };
        let mask: Vec<bool> = (0..self.df.height())
            .map(|row| {
                let sample_ok = samples
                    .get(row)
                    .is_some_and(|s| selection.samples.contains(s));
                let gene_ok = match &genes {
                    None => true,
                    Some(genes) => genes
                        .get(row)
                        .is_some_and(|g| selection.genes.contains(g)),
                };
                sample_ok && gene_ok
            })
            .collect();
        filter_rows(&self.df, &mask)
    }
}

/// Projects a source's rows onto the join key plus the full measurement set.
fn normalise_measurements(raw: &DataFrame, tissue: &str) -> Result<DataFrame> {
    let mut columns = Vec::with_capacity(CAT_JOIN_KEY.len() + CAT_MEASUREMENT_COLUMNS.len());
    for key in CAT_JOIN_KEY {
        let column = raw.column(key).map_err(|_| {
            OutlierError::Configuration(format!("CAT source '{tissue}' lacks join column '{key}'"))
        })?;
        columns.push(column.cast(&DataType::String)?);
    }
    for name in CAT_MEASUREMENT_COLUMNS {
        let column = if has_column(raw, name) {
            raw.column(name)?.cast(&DataType::Float64)?
        } else {
            Column::full_null(name.into(), raw.height(), &DataType::Float64)
        };
        columns.push(column);
    }
    Ok(DataFrame::new(columns)?)
}

/// Re-keys junction measurements to the entity of `granularity` and keeps one
/// row per `(entity, sample, tissue)`.
fn measurements_by_entity(
    measurements: &DataFrame,
    granularity: Granularity,
    junctions: &DataFrame,
) -> Result<DataFrame> {
    let entity = granularity.entity_column();
    let map = junctions
        .select(["junction", entity])?
        .lazy()
        .with_columns([
            col("junction").cast(DataType::String),
            col(entity).cast(DataType::String),
        ])
        .collect()?;
    let map = representative_rows(&map, &["junction", entity], None)?;

    let mut projected: Vec<&str> = vec![entity, "sample", "tissue"];
    projected.extend(CAT_MEASUREMENT_COLUMNS);
    let keyed = inner_join(measurements, &map, &["junction"], "_entity")?.select(projected)?;
    let reduced = representative_rows(&keyed, &granularity.key(true), Some(CAT_EFFECT_COLUMN))?;
    log::debug!(
        "Reduced {} CAT measurements to {} {} rows",
        measurements.height(),
        reduced.height(),
        granularity
    );
    Ok(reduced)
}

fn matched_rows(joined: &DataFrame) -> Result<usize> {
    let mut matched = vec![false; joined.height()];
    for name in CAT_MEASUREMENT_COLUMNS {
        for (flag, value) in matched.iter_mut().zip(floats(joined, name)?.into_iter()) {
            *flag |= value.is_some();
        }
    }
    Ok(matched.into_iter().filter(|m| *m).count())
}

/// Checks that CAT fusion can run on the sample-level frame `df`: at least one
/// source, unique CAT tissues, and a genotype for every annotated sample.
pub fn validate_cat_inputs(df: &DataFrame, sources: &[Arc<dyn CatSource>]) -> Result<()> {
    if sources.is_empty() {
        return Err(OutlierError::Configuration(
            "CAT fusion requires at least one CAT source".to_string(),
        ));
    }
    if !has_column(df, "sample") {
        return Err(OutlierError::Configuration(
            "CAT fusion requires per-sample genotypes; call add_samples before infer_cat".to_string(),
        ));
    }
    let samples = strings(df, "sample")?;
    let genotypes = if has_column(df, "genotype") {
        Some(strings(df, "genotype")?)
    } else {
        None
    };
    for (row, sample) in samples.into_iter().enumerate() {
        let Some(sample) = sample else { continue };
        let typed = genotypes.as_ref().is_some_and(|g| g.get(row).is_some());
        if !typed {
            return Err(OutlierError::Configuration(format!(
                "sample '{sample}' has no genotype; CAT fusion needs a genotype for every carrier sample"
            )));
        }
    }
    let mut seen = AHashSet::new();
    for source in sources {
        if !seen.insert(source.tissue()) {
            return Err(OutlierError::Configuration(format!(
                "CAT tissue '{}' is provided by more than one source",
                source.tissue()
            )));
        }
    }
    Ok(())
}

/// Fuses CAT measurements onto a sample-level `view` of `granularity`.
/// `junctions` is a junction-level frame of the same result; it maps
/// junctions to splice sites and genes.
pub fn fuse_cat(
    view: &IndexedFrame,
    granularity: Granularity,
    junctions: &DataFrame,
    sources: &[Arc<dyn CatSource>],
    mode: CatMode,
) -> Result<IndexedFrame> {
    validate_cat_inputs(view.frame(), sources)?;
    let selection = CatSelection::from_frame(view.frame())?;
    let key = granularity.key(true);

    let mut parts = Vec::with_capacity(sources.len());
    let mut fused = view.frame().clone();
    for source in sources {
        let tissue = source.tissue();
        let measurements = normalise_measurements(&source.measurements(&selection)?, tissue)?;
        let measurements = match granularity {
            Granularity::Junction => measurements,
            _ => measurements_by_entity(&measurements, granularity, junctions)?,
        };
        let joined = left_join(view.frame(), &measurements, &key, "_cat")?;
        if joined.height() != view.height() {
            return Err(OutlierError::JoinIntegrity {
                operation: format!("joining CAT tissue '{tissue}'"),
                expected: view.height(),
                found: joined.height(),
                key: duplicated_key(&measurements, &key)?
                    .unwrap_or_else(|| "<unknown>".to_string()),
            });
        }
        let matched = matched_rows(&joined)?;
        log::debug!(
            "CAT tissue '{}' matched {} of {} rows",
            tissue,
            matched,
            view.height()
        );

        match mode {
            CatMode::Concatenated => {
                if matched == 0 {
                    log::warn!("CAT tissue '{tissue}' has no measurements for this view; skipped");
                    continue;
                }
                let mut part = joined;
                part.with_column(Series::new(
                    TISSUE_CAT_COLUMN.into(),
                    vec![tissue; part.height()],
                ))?;
                parts.push(part);
            }
            CatMode::Featurized => {
                for name in CAT_MEASUREMENT_COLUMNS {
                    let base = name.strip_suffix("_cat").unwrap_or(name);
                    let renamed = joined
                        .column(name)?
                        .clone()
                        .with_name(format!("{base}_{tissue}").into());
                    fused.with_column(renamed)?;
                }
            }
        }
    }

    match mode {
        CatMode::Concatenated => {
            if parts.is_empty() {
                return Err(OutlierError::InsufficientData(
                    "no CAT source has measurements for any row of the view".to_string(),
                ));
            }
            let stacked = vstack_all(parts)?;
            let mut full_index = view.index().to_vec();
            full_index.push(TISSUE_CAT_COLUMN.to_string());
            IndexedFrame::new(stacked, &full_index)
        }
        CatMode::Featurized => IndexedFrame::new(fused, view.index()),
    }
}
