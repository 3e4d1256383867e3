//! External variant scores (for example SpliceAI) joined onto the gene view.

use crate::error::{OutlierError, Result};
use crate::frame::{IndexedFrame, duplicated_key, has_column, left_join, representative_rows};
use crate::io::read_table;
use polars::prelude::DataFrame;
use std::path::Path;

/// A named table of variant-level scores.
#[derive(Debug, Clone)]
pub struct ScoreSource {
    name: String,
    df: DataFrame,
}

impl ScoreSource {
    /// Wraps a score table. The table must carry a `variant` column; when it
    /// also has `gene_name`, scores are matched per variant and gene.
    pub fn new(name: impl Into<String>, df: DataFrame) -> Result<Self> {
        let name = name.into();
        if !has_column(&df, "variant") {
            return Err(OutlierError::Configuration(format!(
                "score source '{name}' has no 'variant' column"
            )));
        }
        Ok(Self { name, df })
    }

    pub fn from_path(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = Self::new(name, read_table(path)?)?;
        log::info!(
            "Loaded {} '{}' scores from '{}'",
            source.df.height(),
            source.name,
            path.display()
        );
        Ok(source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    /// Join key: `(variant, gene_name)` if the source is gene-resolved.
    pub fn key(&self) -> Vec<&'static str> {
        if has_column(&self.df, "gene_name") {
            vec!["variant", "gene_name"]
        } else {
            vec!["variant"]
        }
    }

    /// The score table with only the first row of every key kept.
    pub fn deduplicated(&self) -> Result<DataFrame> {
        let first = representative_rows(&self.df, &self.key(), None)?;
        if first.height() < self.df.height() {
            log::debug!(
                "Dropped {} duplicate rows from score source '{}'",
                self.df.height() - first.height(),
                self.name
            );
        }
        Ok(first)
    }
}

/// Left-joins a score source onto `view`. The DNA-side row count never changes;
/// unmatched rows receive missing scores.
pub fn fuse_score(view: &IndexedFrame, source: &ScoreSource) -> Result<IndexedFrame> {
    let key = source.key();
    for column in &key {
        if !view.has_column(column) {
            return Err(OutlierError::Configuration(format!(
                "cannot join score source '{}': view has no '{column}' column",
                source.name()
            )));
        }
    }
    let scores = source.deduplicated()?;
    let suffix = format!("_{}", source.name());
    let joined = left_join(view.frame(), &scores, &key, &suffix)?;
    if joined.height() != view.height() {
        return Err(OutlierError::JoinIntegrity {
            operation: format!("joining score source '{}'", source.name()),
            expected: view.height(),
            found: joined.height(),
            key: duplicated_key(&scores, &key)?.unwrap_or_else(|| "<unknown>".to_string()),
        });
    }
    IndexedFrame::new(joined, view.index())
}
