//! # Splice Outlier Result
//!
//! `SpliceOutlierResult` owns the junction-level base table of one prediction
//! run together with everything fused onto it: per-sample genotypes, CAT
//! sources and external score sources. Derived views are computed lazily and
//! memoised per view name.
//!
//! Every cached view records the generation stamps it was derived from. The
//! base table, the CAT sources and the score sources each carry their own
//! generation counter, and a mutation bumps only the counter it touches. A
//! cached view is served while its recorded stamps match the current ones and
//! is otherwise recomputed from the current base table on the next access, so
//! no view ever depends on the order in which earlier views were requested.

use crate::aggregate::{AggregationConfig, Granularity, aggregate};
use crate::cat::{CatMode, CatSource, fuse_cat, validate_cat_inputs};
use crate::error::{OutlierError, Result};
use crate::filter::{SamplesForTissue, filter_by_rna_seq_samples, split_samples};
use crate::frame::{
    IndexedFrame, duplicated_key, filter_rows, group_rows, has_column, left_join, require_columns,
    representative_rows, strings, take_rows, vstack_all,
};
use crate::io::write_table;
use crate::score::{ScoreSource, fuse_score};
use ahash::AHashMap;
use itertools::Itertools;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Columns the base table must provide.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "variant",
    "junction",
    "tissue",
    "event_type",
    "splice_site",
    "gene_name",
];

/// Name of a derived view, for example `gene` or `splice_site_cat_features`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewName {
    Plain(Granularity),
    Cat(Granularity, CatMode),
}

impl ViewName {
    pub fn all() -> Vec<ViewName> {
        let mut names: Vec<ViewName> = Granularity::ALL.iter().map(|&g| ViewName::Plain(g)).collect();
        for mode in CatMode::ALL {
            names.extend(Granularity::ALL.iter().map(|&g| ViewName::Cat(g, mode)));
        }
        names
    }

    pub fn granularity(self) -> Granularity {
        match self {
            ViewName::Plain(g) | ViewName::Cat(g, _) => g,
        }
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewName::Plain(g) => write!(f, "{g}"),
            ViewName::Cat(g, mode) => write!(f, "{g}_{mode}"),
        }
    }
}

impl FromStr for ViewName {
    type Err = OutlierError;

    fn from_str(s: &str) -> Result<Self> {
        ViewName::all()
            .into_iter()
            .find(|name| name.to_string() == s)
            .ok_or_else(|| {
                OutlierError::Configuration(format!(
                    "unknown view '{s}'; expected one of: {}",
                    ViewName::all().iter().join(", ")
                ))
            })
    }
}

/// Generation counters of the inputs a view can depend on. Irrelevant inputs
/// are recorded as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Stamps {
    base: u64,
    cat: u64,
    score: u64,
}

#[derive(Debug, Clone)]
struct CachedView {
    view: IndexedFrame,
    stamps: Stamps,
}

/// Sample carriers and genotypes per variant.
#[derive(Debug, Clone)]
struct SampleGenotypes {
    carriers: BTreeMap<String, BTreeSet<String>>,
    /// `variant, sample, genotype`, one row per carrier.
    genotype: DataFrame,
}

impl SampleGenotypes {
    fn from_frame(var_samples: &DataFrame) -> Result<Self> {
        require_columns(var_samples, &["variant", "sample"])?;
        let variants = strings(var_samples, "variant")?;
        let samples = strings(var_samples, "sample")?;
        let genotypes: Series = if has_column(var_samples, "genotype") {
            strings(var_samples, "genotype")?.into_series()
        } else {
            Series::full_null("genotype".into(), var_samples.height(), &DataType::String)
        };

        let typed = DataFrame::new(vec![
            variants.clone().into_series().into(),
            samples.clone().into_series().into(),
            genotypes.with_name("genotype".into()).into(),
        ])?;

        let mut carriers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut keep = Vec::with_capacity(var_samples.height());
        for (variant, sample) in variants.into_iter().zip(samples.into_iter()) {
            let (Some(variant), Some(sample)) = (variant, sample) else {
                keep.push(false);
                continue;
            };
            carriers
                .entry(variant.to_string())
                .or_default()
                .insert(sample.to_string());
            keep.push(true);
        }
        let genotype = representative_rows(&filter_rows(&typed, &keep)?, &["variant", "sample"], None)?;
        Ok(Self { carriers, genotype })
    }

    fn samples_of(&self, variant: &str) -> Option<String> {
        self.carriers
            .get(variant)
            .filter(|s| !s.is_empty())
            .map(|s| s.iter().join(";"))
    }

    /// `samples` column for the rows of `df`.
    fn carrier_column(&self, df: &DataFrame) -> Result<Series> {
        let samples: Vec<Option<String>> = strings(df, "variant")?
            .into_iter()
            .map(|v| v.and_then(|v| self.samples_of(v)))
            .collect();
        Ok(Series::new("samples".into(), samples))
    }
}

/// Results of one prediction run and all views derived from them.
#[derive(Debug, Clone)]
pub struct SpliceOutlierResult {
    df: DataFrame,
    genotypes: Option<SampleGenotypes>,
    /// RNA-seq restrictions applied so far, in order.
    rna_seq_filters: Vec<SamplesForTissue>,
    config: AggregationConfig,
    cat_sources: Vec<Arc<dyn CatSource>>,
    score_sources: Vec<ScoreSource>,
    stamps: Stamps,
    cache: AHashMap<ViewName, CachedView>,
}

const PREDICTION_KEY: [&str; 3] = ["variant", "junction", "tissue"];

fn ensure_unique_predictions(df: &DataFrame) -> Result<()> {
    if let Some(key) = duplicated_key(df, &PREDICTION_KEY)? {
        return Err(OutlierError::JoinIntegrity {
            operation: "building the junction prediction table".to_string(),
            expected: group_rows(df, &PREDICTION_KEY)?.len(),
            found: df.height(),
            key,
        });
    }
    Ok(())
}

impl SpliceOutlierResult {
    /// Wraps a junction-level prediction table. `(variant, junction, tissue)`
    /// must be unique.
    pub fn new(df: DataFrame) -> Result<Self> {
        for column in REQUIRED_COLUMNS {
            if !has_column(&df, column) {
                return Err(OutlierError::Schema(format!(
                    "junction prediction table lacks required column '{column}'"
                )));
            }
        }
        ensure_unique_predictions(&df)?;
        Ok(Self {
            df,
            genotypes: None,
            rna_seq_filters: Vec::new(),
            config: AggregationConfig::default(),
            cat_sources: Vec::new(),
            score_sources: Vec::new(),
            stamps: Stamps {
                base: 1,
                cat: 1,
                score: 1,
            },
            cache: AHashMap::new(),
        })
    }

    pub fn with_config(mut self, config: AggregationConfig) -> Self {
        self.config = config;
        self.invalidate_base();
        self
    }

    /// The junction-level base table.
    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Distinct tissues of the base table, sorted.
    pub fn tissues(&self) -> Result<Vec<String>> {
        let tissues: BTreeSet<String> = strings(&self.df, "tissue")?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        Ok(tissues.into_iter().collect())
    }

    /// Whether per-sample genotypes were added, making views sample-level.
    pub fn has_samples(&self) -> bool {
        self.genotypes.is_some()
    }

    pub fn cat_sources(&self) -> &[Arc<dyn CatSource>] {
        &self.cat_sources
    }

    pub fn score_sources(&self) -> &[ScoreSource] {
        &self.score_sources
    }

    fn invalidate_base(&mut self) {
        self.stamps.base += 1;
    }

    /// Adds sample genotypes from a `variant, sample[, genotype]` table. The
    /// base table gains a `samples` column listing the carriers of each
    /// variant, sorted and `;`-joined.
    pub fn add_samples(&mut self, var_samples: &DataFrame) -> Result<()> {
        let genotypes = SampleGenotypes::from_frame(var_samples)?;
        let samples = genotypes.carrier_column(&self.df)?;
        let annotated = samples.len() - samples.null_count();

        let mut df = self.df.clone();
        df.with_column(samples)?;
        self.df = df;
        self.genotypes = Some(genotypes);
        self.invalidate_base();
        log::info!(
            "Annotated {} of {} junction predictions with carrier samples",
            annotated,
            self.df.height()
        );
        Ok(())
    }

    /// The base table with one row per carrier sample when genotypes are
    /// present. Rows without carriers keep a single row with a missing sample.
    fn sample_level(&self) -> Result<DataFrame> {
        let Some(genotypes) = &self.genotypes else {
            return Ok(self.df.clone());
        };
        let cells = strings(&self.df, "samples")?;

        let mut rows = Vec::with_capacity(self.df.height());
        let mut sample_col: Vec<Option<&str>> = Vec::with_capacity(self.df.height());
        for (row, cell) in cells.into_iter().enumerate() {
            let ids: Vec<&str> = cell.map(|c| split_samples(c).collect()).unwrap_or_default();
            if ids.is_empty() {
                rows.push(row);
                sample_col.push(None);
                continue;
            }
            for id in ids {
                rows.push(row);
                sample_col.push(Some(id));
            }
        }

        let mut out = take_rows(&self.df, &rows)?.drop("samples")?;
        out.with_column(Series::new("sample".into(), sample_col))?;
        left_join(&out, &genotypes.genotype, &["variant", "sample"], "_genotype")
    }

    fn dependency(&self, name: ViewName) -> Stamps {
        let (granularity, uses_cat) = match name {
            ViewName::Plain(g) => (g, false),
            ViewName::Cat(g, _) => (g, true),
        };
        Stamps {
            base: self.stamps.base,
            cat: if uses_cat { self.stamps.cat } else { 0 },
            score: if granularity == Granularity::Gene {
                self.stamps.score
            } else {
                0
            },
        }
    }

    /// The cached view `name` if it is still current.
    fn current(&self, name: ViewName) -> Option<&IndexedFrame> {
        self.cache
            .get(&name)
            .filter(|cached| cached.stamps == self.dependency(name))
            .map(|cached| &cached.view)
    }

    /// Whether `name` is cached and current.
    pub fn is_cached(&self, name: ViewName) -> bool {
        self.current(name).is_some()
    }

    /// Computes `name` from the current inputs without touching the cache.
    pub fn derive(&self, name: ViewName) -> Result<IndexedFrame> {
        match name {
            ViewName::Plain(granularity) => {
                let base = self.sample_level()?;
                let key = granularity.key(self.has_samples());
                let mut view = aggregate(&base, &key, &self.config.effect_column)?;
                if granularity == Granularity::Gene {
                    for source in &self.score_sources {
                        view = fuse_score(&view, source)?;
                    }
                }
                Ok(view)
            }
            ViewName::Cat(granularity, mode) => {
                if self.cat_sources.is_empty() {
                    return Err(OutlierError::Configuration(format!(
                        "view '{name}' requires CAT sources; call infer_cat first"
                    )));
                }
                let plain = ViewName::Plain(granularity);
                match self.current(plain) {
                    Some(view) => fuse_cat(view, granularity, &self.df, &self.cat_sources, mode),
                    None => fuse_cat(
                        &self.derive(plain)?,
                        granularity,
                        &self.df,
                        &self.cat_sources,
                        mode,
                    ),
                }
            }
        }
    }

    /// The view `name`, computed on first access and served from the cache
    /// until one of its inputs changes.
    pub fn get(&mut self, name: ViewName) -> Result<&IndexedFrame> {
        let stamps = self.dependency(name);
        if !self.is_cached(name) {
            let view = self.derive(name)?;
            log::debug!("Derived view '{name}' with {} rows", view.height());
            self.cache.insert(name, CachedView { view, stamps });
        }
        self.cache
            .get(&name)
            .map(|cached| &cached.view)
            .ok_or_else(|| OutlierError::Configuration(format!("view '{name}' is not available")))
    }

    pub fn view(&mut self, granularity: Granularity) -> Result<&IndexedFrame> {
        self.get(ViewName::Plain(granularity))
    }

    pub fn junction(&mut self) -> Result<&IndexedFrame> {
        self.view(Granularity::Junction)
    }

    pub fn splice_site(&mut self) -> Result<&IndexedFrame> {
        self.view(Granularity::SpliceSite)
    }

    pub fn gene(&mut self) -> Result<&IndexedFrame> {
        self.view(Granularity::Gene)
    }

    pub fn cat_view(&mut self, granularity: Granularity, mode: CatMode) -> Result<&IndexedFrame> {
        self.get(ViewName::Cat(granularity, mode))
    }

    /// Registers CAT sources. Inputs are validated against the junction view
    /// before anything is stored.
    pub fn infer_cat(&mut self, sources: Vec<Arc<dyn CatSource>>) -> Result<()> {
        if !self.has_samples() {
            return Err(OutlierError::Configuration(
                "CAT inference requires per-sample genotypes; call add_samples first".to_string(),
            ));
        }
        validate_cat_inputs(self.junction()?.frame(), &sources)?;
        log::info!(
            "Registered CAT sources: {}",
            sources.iter().map(|s| s.tissue()).join(", ")
        );
        self.cat_sources = sources;
        self.stamps.cat += 1;
        Ok(())
    }

    /// Adds an external score source to the gene-level views.
    pub fn add_score(&mut self, source: ScoreSource) -> Result<()> {
        for column in source.key() {
            if !has_column(&self.df, column) {
                return Err(OutlierError::Configuration(format!(
                    "score source '{}' joins on '{column}', which the predictions lack",
                    source.name()
                )));
            }
        }
        if self.score_sources.iter().any(|s| s.name() == source.name()) {
            return Err(OutlierError::Configuration(format!(
                "score source '{}' was already added",
                source.name()
            )));
        }
        self.score_sources.push(source);
        self.stamps.score += 1;
        Ok(())
    }

    /// Keeps, per tissue, only carrier samples with RNA-seq data. Requires
    /// sample genotypes. The restriction also applies to rows injected later.
    pub fn filter_by_rna_seq_samples(&mut self, samples_for_tissue: &SamplesForTissue) -> Result<()> {
        if !has_column(&self.df, "samples") {
            return Err(OutlierError::Configuration(
                "filtering by RNA-seq samples requires sample genotypes; call add_samples first"
                    .to_string(),
            ));
        }
        self.df = filter_by_rna_seq_samples(&self.df, samples_for_tissue)?;
        self.rna_seq_filters.push(samples_for_tissue.clone());
        self.invalidate_base();
        Ok(())
    }

    /// Appends junction-level rows with the same schema as the base table.
    /// When genotypes were added, rows without a `samples` column are
    /// annotated with the known carriers first, and every RNA-seq restriction
    /// applied so far is applied to the new rows.
    pub fn inject_rows(&mut self, rows: &DataFrame) -> Result<()> {
        let mut rows = rows.clone();
        if let Some(genotypes) = &self.genotypes {
            if !has_column(&rows, "samples") {
                rows.with_column(genotypes.carrier_column(&rows)?)?;
            }
        }
        for samples_for_tissue in &self.rna_seq_filters {
            rows = filter_by_rna_seq_samples(&rows, samples_for_tissue)?;
        }
        let df = vstack_all(vec![self.df.clone(), rows])?;
        ensure_unique_predictions(&df)?;
        self.df = df;
        self.invalidate_base();
        Ok(())
    }

    fn restricted_to(&self, event_type: &str) -> Result<Self> {
        let mask: Vec<bool> = strings(&self.df, "event_type")?
            .into_iter()
            .map(|e| e == Some(event_type))
            .collect();
        let mut out = self.clone();
        out.df = filter_rows(&self.df, &mask)?;
        out.cache.clear();
        out.invalidate_base();
        Ok(out)
    }

    /// A new result holding only donor (`psi5`) events.
    pub fn psi5(&self) -> Result<Self> {
        self.restricted_to("psi5")
    }

    /// A new result holding only acceptor (`psi3`) events.
    pub fn psi3(&self) -> Result<Self> {
        self.restricted_to("psi3")
    }

    /// Writes every available view to `<dir>/<view>.csv`. CAT views are
    /// written only when CAT sources are registered; a concatenated view with
    /// no matching measurements is skipped with a warning.
    pub fn write_views(&mut self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for name in ViewName::all() {
            if matches!(name, ViewName::Cat(..)) && self.cat_sources.is_empty() {
                continue;
            }
            let path = dir.join(format!("{name}.csv"));
            match self.get(name) {
                Ok(view) => {
                    write_table(view.frame(), &path)?;
                    written.push(path);
                }
                Err(OutlierError::InsufficientData(reason)) => {
                    log::warn!("Skipping view '{name}': {reason}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}
