//! # RNA-seq Sample Filter
//!
//! Restricts predictions to samples that have RNA-seq evidence in the tissue
//! the prediction was made for. The restriction is evaluated per row against
//! that row's own tissue, so filtering one tissue never removes rows of
//! another tissue, even when both share a variant or gene.

use crate::error::{OutlierError, Result};
use crate::frame::{filter_rows, has_column, strings};
use ahash::AHashSet;
use polars::prelude::*;
use std::collections::BTreeMap;

/// Per-tissue list of samples with RNA-seq data.
pub type SamplesForTissue = BTreeMap<String, Vec<String>>;

/// Separator of the `samples` annotation.
pub const SAMPLE_SEPARATOR: char = ';';

/// Splits a `samples` cell into its identifiers.
pub fn split_samples(cell: &str) -> impl Iterator<Item = &str> {
    cell.split(SAMPLE_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Filters `df` on its sample annotation.
///
/// A frame with a multi-sample `samples` column has each cell rewritten to its
/// intersection with the allowed set of the row's tissue, and rows whose
/// intersection is empty are removed. A frame with a single-sample `sample`
/// column keeps rows whose sample is allowed. Rows of tissues without an entry
/// in `samples_for_tissue` pass through unchanged.
pub fn filter_by_rna_seq_samples(df: &DataFrame, samples_for_tissue: &SamplesForTissue) -> Result<DataFrame> {
    let allowed: BTreeMap<&str, AHashSet<&str>> = samples_for_tissue
        .iter()
        .map(|(tissue, samples)| {
            (
                tissue.as_str(),
                samples.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    let tissues = strings(df, "tissue")?;

    let out = if has_column(df, "samples") {
        let samples = strings(df, "samples")?;
        let mut mask = Vec::with_capacity(df.height());
        let mut rewritten: Vec<Option<String>> = Vec::with_capacity(df.height());
        for (tissue, cell) in tissues.into_iter().zip(samples.into_iter()) {
            match tissue.and_then(|t| allowed.get(t)) {
                None => {
                    mask.push(true);
                    rewritten.push(cell.map(str::to_string));
                }
                Some(allowed) => {
                    let kept: Vec<&str> = cell
                        .map(|c| split_samples(c).filter(|s| allowed.contains(s)).collect())
                        .unwrap_or_default();
                    mask.push(!kept.is_empty());
                    rewritten.push(Some(kept.join(";")));
                }
            }
        }
        let mut out = df.clone();
        out.with_column(Series::new("samples".into(), rewritten))?;
        filter_rows(&out, &mask)?
    } else if has_column(df, "sample") {
        let samples = strings(df, "sample")?;
        let mask: Vec<bool> = tissues
            .into_iter()
            .zip(samples.into_iter())
            .map(|(tissue, sample)| match tissue.and_then(|t| allowed.get(t)) {
                None => true,
                Some(allowed) => sample.is_some_and(|s| allowed.contains(s)),
            })
            .collect();
        filter_rows(df, &mask)?
    } else {
        return Err(OutlierError::Configuration(
            "filtering by RNA-seq samples requires a 'samples' or 'sample' column; add sample genotypes first"
                .to_string(),
        ));
    };
    log::info!(
        "RNA-seq sample filter kept {} of {} rows",
        out.height(),
        df.height()
    );
    Ok(out)
}
