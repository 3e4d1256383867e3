//! # Run Configuration
//!
//! A run is described by one TOML file:
//!
//! ```toml
//! [aggregation]
//! effect_column = "delta_psi"
//!
//! [[cat]]
//! tissue = "blood"
//! path = "cat/blood.csv"
//!
//! [[score]]
//! name = "spliceAI"
//! path = "spliceai.csv"
//!
//! [samples]
//! genotypes = "var_samples.csv"
//! rna_seq = { testis = ["NA00002"], lung = ["NA00002", "NA00003"] }
//!
//! [ensemble]
//! view = "gene_cat_features"
//! features = ["delta_psi", "delta_psi_blood"]
//! fold_count = 5
//! ```
//!
//! Relative paths are resolved against the directory of the configuration
//! file. Every section is optional.

use crate::aggregate::AggregationConfig;
use crate::ensemble::{LogisticEnsembleFitter, TrainOptions};
use crate::error::{OutlierError, Result};
use crate::filter::SamplesForTissue;
use crate::result::ViewName;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A CAT measurement file for one tissue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatSourceConfig {
    pub tissue: String,
    pub path: PathBuf,
}

/// An external score file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSourceConfig {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplesConfig {
    /// `variant, sample[, genotype]` table of carriers.
    pub genotypes: Option<PathBuf>,
    /// Samples with RNA-seq data, per tissue.
    pub rna_seq: SamplesForTissue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// View the ensemble reads its features from.
    pub view: String,
    /// Persisted model used by `predict`.
    pub model: Option<PathBuf>,
    pub features: Vec<String>,
    pub label: String,
    pub fold_count: usize,
    pub features_train: Option<Vec<String>>,
    pub features_test: Option<Vec<String>>,
    pub feature_to_filter_na: Option<String>,
    pub group_by: Option<Vec<String>>,
    pub seed: u64,
    pub penalty: f64,
    pub max_iterations: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        let options = TrainOptions::default();
        let fitter = LogisticEnsembleFitter::default();
        Self {
            view: "gene".to_string(),
            model: None,
            features: options.features,
            label: options.label,
            fold_count: options.fold_count,
            features_train: options.features_train,
            features_test: options.features_test,
            feature_to_filter_na: options.feature_to_filter_na,
            group_by: options.group_by,
            seed: options.seed,
            penalty: fitter.penalty,
            max_iterations: fitter.max_iterations,
        }
    }
}

impl EnsembleConfig {
    pub fn view_name(&self) -> Result<ViewName> {
        self.view.parse()
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            features: self.features.clone(),
            label: self.label.clone(),
            fold_count: self.fold_count,
            features_train: self.features_train.clone(),
            features_test: self.features_test.clone(),
            feature_to_filter_na: self.feature_to_filter_na.clone(),
            group_by: self.group_by.clone(),
            seed: self.seed,
        }
    }

    pub fn fitter(&self) -> LogisticEnsembleFitter {
        LogisticEnsembleFitter {
            penalty: self.penalty,
            max_iterations: self.max_iterations,
            ..LogisticEnsembleFitter::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub aggregation: AggregationConfig,
    pub cat: Vec<CatSourceConfig>,
    pub score: Vec<ScoreSourceConfig>,
    pub samples: SamplesConfig,
    pub ensemble: EnsembleConfig,
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

impl RunConfig {
    /// Reads, resolves and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut config: RunConfig = toml::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        log::debug!("Loaded run configuration from '{}'", path.display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for cat in &mut self.cat {
            resolve(base, &mut cat.path);
        }
        for score in &mut self.score {
            resolve(base, &mut score.path);
        }
        if let Some(genotypes) = &mut self.samples.genotypes {
            resolve(base, genotypes);
        }
        if let Some(model) = &mut self.ensemble.model {
            resolve(base, model);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.aggregation.effect_column.is_empty() {
            return Err(OutlierError::Configuration(
                "aggregation.effect_column must not be empty".to_string(),
            ));
        }
        let mut tissues = AHashSet::new();
        for cat in &self.cat {
            if !tissues.insert(cat.tissue.as_str()) {
                return Err(OutlierError::Configuration(format!(
                    "CAT tissue '{}' is configured more than once",
                    cat.tissue
                )));
            }
        }
        let mut names = AHashSet::new();
        for score in &self.score {
            if !names.insert(score.name.as_str()) {
                return Err(OutlierError::Configuration(format!(
                    "score source '{}' is configured more than once",
                    score.name
                )));
            }
        }
        if !self.samples.rna_seq.is_empty() && self.samples.genotypes.is_none() {
            return Err(OutlierError::Configuration(
                "samples.rna_seq requires samples.genotypes".to_string(),
            ));
        }
        if !self.cat.is_empty() && self.samples.genotypes.is_none() {
            return Err(OutlierError::Configuration(
                "CAT sources require samples.genotypes".to_string(),
            ));
        }
        if let ViewName::Cat(..) = self.ensemble.view_name()? {
            if self.cat.is_empty() {
                return Err(OutlierError::Configuration(format!(
                    "ensemble view '{}' requires at least one [[cat]] source",
                    self.ensemble.view
                )));
            }
        }
        Ok(())
    }
}
