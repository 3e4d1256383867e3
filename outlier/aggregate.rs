//! # Aggregation Engine
//!
//! Rolls junction-level rows up the containment hierarchy
//! junction → splice site → gene. Each granularity is a grouping key; within a
//! group the row carrying the most extreme effect (largest absolute value of
//! the effect column) is kept whole, so every aggregated row is a copy of
//! exactly one junction-level row.

use crate::error::Result;
use crate::frame::{IndexedFrame, reorder_front, representative_rows};
use itertools::Itertools;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three aggregation levels of a result object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Junction,
    SpliceSite,
    Gene,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [
        Granularity::Junction,
        Granularity::SpliceSite,
        Granularity::Gene,
    ];

    /// Column naming the entity at this level.
    pub fn entity_column(self) -> &'static str {
        match self {
            Granularity::Junction => "junction",
            Granularity::SpliceSite => "splice_site",
            Granularity::Gene => "gene_name",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Granularity::Junction => "junction",
            Granularity::SpliceSite => "splice_site",
            Granularity::Gene => "gene",
        }
    }

    /// Grouping key: `(entity, sample, tissue)`, or `(entity, tissue)` when the
    /// input carries no per-sample genotypes.
    pub fn key(self, with_samples: bool) -> Vec<&'static str> {
        if with_samples {
            vec![self.entity_column(), "sample", "tissue"]
        } else {
            vec![self.entity_column(), "tissue"]
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings of the reduction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Numeric column whose absolute value selects the representative row.
    pub effect_column: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            effect_column: "delta_psi".to_string(),
        }
    }
}

/// Groups `df` on `key` and keeps, per group, the row with maximal
/// `|effect_column|`. Missing effects rank lowest, the first occurrence wins
/// ties, and groups are ordered by first occurrence. Key columns are moved to
/// the front and become the index of the result.
pub fn aggregate<S: AsRef<str>>(df: &DataFrame, key: &[S], effect_column: &str) -> Result<IndexedFrame> {
    let reduced = representative_rows(df, key, Some(effect_column))?;
    log::debug!(
        "Aggregated {} rows into {} groups on [{}]",
        df.height(),
        reduced.height(),
        key.iter().map(AsRef::<str>::as_ref).join(", ")
    );
    IndexedFrame::new(reorder_front(&reduced, key)?, key)
}
