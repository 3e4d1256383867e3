//! # Ensemble Scoring and Training
//!
//! Combines evidence columns of a view into one outlier probability. The model
//! is reached only through two small traits: `EnsembleModel` predicts from a
//! feature matrix and `ModelFitter` produces a model from a matrix and labels.
//! The bundled implementation is a ridge-penalised logistic regression on
//! standardised features, fitted by iteratively reweighted least squares and
//! persisted as TOML.
//!
//! Training runs a grouped k-fold cross-validation: all rows sharing a group
//! key (by default the table index) land in the same fold, each fold is scored
//! by a model fitted on the other folds, and folds are fitted in parallel.

use crate::error::{ModelError, OutlierError, Result};
use crate::frame::{IndexedFrame, float_values, group_rows, has_column, take_rows};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Solve;
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Name of the column added by `predict_ensemble`.
pub const PREDICTION_COLUMN: &str = "ensemble_pred";

/// A fitted model that maps a feature matrix to scores.
pub trait EnsembleModel: Send + Sync {
    /// Feature names in the column order the model was fitted on.
    fn feature_names(&self) -> &[String];

    fn predict(&self, features: ArrayView2<f64>) -> std::result::Result<Array1<f64>, ModelError>;
}

/// Produces an `EnsembleModel` from training data.
pub trait ModelFitter: Send + Sync {
    type Model: EnsembleModel;

    fn fit(
        &self,
        features: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        feature_names: &[String],
    ) -> std::result::Result<Self::Model, ModelError>;
}

fn expit(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Ridge-penalised logistic regression on standardised features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticEnsemble {
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub penalty: f64,
}

impl LogisticEnsemble {
    /// Saves the model in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> std::result::Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path.as_ref())?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path.as_ref())?;
        let model: Self = toml::from_str(&toml_string)?;
        let p = model.feature_names.len();
        for len in [model.means.len(), model.scales.len(), model.coefficients.len()] {
            if len != p {
                return Err(ModelError::FeatureCountMismatch {
                    expected: p,
                    found: len,
                });
            }
        }
        Ok(model)
    }
}

impl EnsembleModel for LogisticEnsemble {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: ArrayView2<f64>) -> std::result::Result<Array1<f64>, ModelError> {
        if features.ncols() != self.coefficients.len() {
            return Err(ModelError::FeatureCountMismatch {
                expected: self.coefficients.len(),
                found: features.ncols(),
            });
        }
        let predictions = features
            .axis_iter(Axis(0))
            .map(|row| {
                let eta = row
                    .iter()
                    .zip(&self.means)
                    .zip(&self.scales)
                    .zip(&self.coefficients)
                    .fold(self.intercept, |acc, (((&x, &m), &s), &b)| {
                        acc + b * (x - m) / s
                    });
                expit(eta)
            })
            .collect();
        Ok(predictions)
    }
}

/// Fits `LogisticEnsemble` by penalised IRLS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticEnsembleFitter {
    /// Ridge penalty applied to every standardised coefficient and the intercept.
    pub penalty: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for LogisticEnsembleFitter {
    fn default() -> Self {
        Self {
            penalty: 1.0,
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

impl ModelFitter for LogisticEnsembleFitter {
    type Model = LogisticEnsemble;

    fn fit(
        &self,
        features: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        feature_names: &[String],
    ) -> std::result::Result<LogisticEnsemble, ModelError> {
        let (n, p) = features.dim();
        if labels.len() != n {
            return Err(ModelError::LabelLengthMismatch {
                labels: labels.len(),
                rows: n,
            });
        }
        if feature_names.len() != p {
            return Err(ModelError::FeatureCountMismatch {
                expected: feature_names.len(),
                found: p,
            });
        }
        for (j, column) in features.axis_iter(Axis(1)).enumerate() {
            if column.iter().any(|v| !v.is_finite()) {
                return Err(ModelError::NonFiniteFeature(feature_names[j].clone()));
            }
        }

        let means: Vec<f64> = features
            .axis_iter(Axis(1))
            .map(|c| if n == 0 { 0.0 } else { c.sum() / n as f64 })
            .collect();
        let scales: Vec<f64> = features
            .axis_iter(Axis(1))
            .zip(&means)
            .map(|(c, &m)| {
                let var = if n == 0 {
                    0.0
                } else {
                    c.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n as f64
                };
                if var > 0.0 { var.sqrt() } else { 1.0 }
            })
            .collect();

        // Design with a leading intercept column.
        let mut design = Array2::<f64>::ones((n, p + 1));
        for i in 0..n {
            for j in 0..p {
                design[[i, j + 1]] = (features[[i, j]] - means[j]) / scales[j];
            }
        }

        let mut beta = Array1::<f64>::zeros(p + 1);
        let mut last_step = f64::INFINITY;
        for iteration in 0..self.max_iterations {
            let eta = design.dot(&beta);
            let mu = eta.mapv(|e| expit(e).clamp(1e-10, 1.0 - 1e-10));
            let weights = mu.mapv(|m| m * (1.0 - m));
            let working = &eta + &((&labels - &mu) / &weights);

            let weighted_design = &design * &weights.view().insert_axis(Axis(1));
            let mut hessian = design.t().dot(&weighted_design);
            for d in 0..=p {
                hessian[[d, d]] += self.penalty;
            }
            let rhs = weighted_design.t().dot(&working);
            let next = hessian
                .solve(&rhs)
                .map_err(ModelError::LinearSystemSolveFailed)?;

            last_step = (&next - &beta)
                .iter()
                .fold(0.0_f64, |acc, d| acc.max(d.abs()));
            beta = next;
            log::trace!("IRLS iteration {iteration}: max coefficient change {last_step:.3e}");
            if last_step < self.tolerance {
                log::debug!(
                    "Logistic ensemble converged after {} iterations on {} rows",
                    iteration + 1,
                    n
                );
                return Ok(LogisticEnsemble {
                    feature_names: feature_names.to_vec(),
                    means,
                    scales,
                    intercept: beta[0],
                    coefficients: beta.iter().skip(1).copied().collect(),
                    penalty: self.penalty,
                });
            }
        }
        Err(ModelError::DidNotConverge {
            max_iterations: self.max_iterations,
            last_step,
        })
    }
}

fn require_features<S: AsRef<str>>(df: &DataFrame, columns: &[S], context: &str) -> Result<()> {
    for column in columns {
        if !has_column(df, column.as_ref()) {
            return Err(OutlierError::FeatureMismatch {
                column: column.as_ref().to_string(),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

/// The feature columns of a frame, cast to `Float64`, with a per-row
/// completeness flag.
struct Features {
    frame: DataFrame,
    complete: Vec<bool>,
}

impl Features {
    fn new<S: AsRef<str>>(df: &DataFrame, features: &[S]) -> Result<Self> {
        let frame = df
            .clone()
            .lazy()
            .select(
                features
                    .iter()
                    .map(|f| col(f.as_ref()).cast(DataType::Float64))
                    .collect::<Vec<_>>(),
            )
            .collect()?;
        let mut complete = vec![true; df.height()];
        for feature in features {
            for (flag, value) in complete.iter_mut().zip(float_values(&frame, feature.as_ref())?) {
                *flag &= value.is_some();
            }
        }
        Ok(Self { frame, complete })
    }

    fn complete_rows(&self, rows: &[usize]) -> Vec<usize> {
        rows.iter().copied().filter(|&r| self.complete[r]).collect()
    }

    /// Dense row-major matrix of `rows`, which must all be complete.
    fn matrix(&self, rows: &[usize]) -> Result<Array2<f64>> {
        Ok(take_rows(&self.frame, rows)?.to_ndarray::<Float64Type>(IndexOrder::C)?)
    }
}

/// Scores `rows`; rows with a missing feature get a missing prediction.
fn score_rows<M: EnsembleModel + ?Sized>(
    model: &M,
    features: &Features,
    rows: &[usize],
) -> Result<Vec<Option<f64>>> {
    let complete = features.complete_rows(rows);
    let mut scores = vec![None; rows.len()];
    if complete.is_empty() {
        return Ok(scores);
    }
    let predicted = model.predict(features.matrix(&complete)?.view())?;
    let mut next = complete.iter().zip(predicted.iter()).peekable();
    for (slot, &row) in scores.iter_mut().zip(rows) {
        if let Some(&(&r, &p)) = next.peek() {
            if r == row {
                *slot = Some(p);
                next.next();
            }
        }
    }
    Ok(scores)
}

/// Scores `view` with `model` and returns it with an added `ensemble_pred`
/// column. Rows with a missing value in any feature receive a missing
/// prediction; they are never imputed.
pub fn predict_ensemble<M, S>(model: &M, view: &IndexedFrame, features: &[S]) -> Result<IndexedFrame>
where
    M: EnsembleModel + ?Sized,
    S: AsRef<str>,
{
    require_features(view.frame(), features, "scoring")?;
    if features.len() != model.feature_names().len() {
        return Err(ModelError::FeatureCountMismatch {
            expected: model.feature_names().len(),
            found: features.len(),
        }
        .into());
    }
    let given: Vec<&str> = features.iter().map(|f| f.as_ref()).collect();
    let differing: Vec<&str> = given
        .iter()
        .zip(model.feature_names())
        .filter(|(given, fitted)| **given != fitted.as_str())
        .map(|(given, _)| *given)
        .collect();
    if !differing.is_empty() {
        log::warn!(
            "Scoring with features [{}] in place of the fitted ones",
            differing.join(", ")
        );
    }

    let matrix = Features::new(view.frame(), features)?;
    let rows: Vec<usize> = (0..view.height()).collect();
    let scores = score_rows(model, &matrix, &rows)?;
    let missing = scores.iter().filter(|s| s.is_none()).count();
    if missing > 0 {
        log::info!("{missing} of {} rows have missing features and were not scored", rows.len());
    }
    let mut out = view.frame().clone();
    out.with_column(Series::new(PREDICTION_COLUMN.into(), scores))?;
    IndexedFrame::new(out, view.index())
}

/// Settings of a cross-validated training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    /// Feature columns carried into the output table.
    pub features: Vec<String>,
    /// Binary (0/1) label column.
    pub label: String,
    pub fold_count: usize,
    /// Features the per-fold models are fitted on; defaults to `features`.
    pub features_train: Option<Vec<String>>,
    /// Features the held-out rows are scored with; defaults to `features`.
    pub features_test: Option<Vec<String>>,
    /// Rows with a missing value in this column are removed before anything else.
    pub feature_to_filter_na: Option<String>,
    /// Columns whose rows always share a fold; defaults to the table index.
    pub group_by: Option<Vec<String>>,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            features: Vec::new(),
            label: "outlier".to_string(),
            fold_count: 5,
            features_train: None,
            features_test: None,
            feature_to_filter_na: None,
            group_by: None,
            seed: 42,
        }
    }
}

impl TrainOptions {
    pub fn train_features(&self) -> &[String] {
        self.features_train.as_deref().unwrap_or(&self.features)
    }

    pub fn test_features(&self) -> &[String] {
        self.features_test.as_deref().unwrap_or(&self.features)
    }

    /// Whether held-out rows are scored with a different feature set than the
    /// one the models were fitted on.
    pub fn cross_apply(&self) -> bool {
        self.train_features() != self.test_features()
    }
}

struct FoldOutput<Model> {
    rows: Vec<usize>,
    y_pred: Vec<Option<f64>>,
    y_pred_on_train: Option<Vec<Option<f64>>>,
    model: Model,
}

/// Assigns each row a fold so that rows with equal group keys share a fold.
fn assign_folds(df: &DataFrame, group_by: &[String], fold_count: usize, seed: u64) -> Result<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = if group_by.is_empty() {
        (0..df.height()).map(|r| vec![r]).collect()
    } else {
        group_rows(df, group_by)?
    };
    if fold_count > groups.len() {
        return Err(OutlierError::InsufficientData(format!(
            "{fold_count} folds requested but only {} distinct entities are available",
            groups.len()
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    groups.shuffle(&mut rng);
    let mut folds = vec![0; df.height()];
    for (position, rows) in groups.iter().enumerate() {
        for &row in rows {
            folds[row] = position % fold_count;
        }
    }
    Ok(folds)
}

/// Cross-validated training. Returns one row per input row (after the optional
/// missing-value filter) with the index columns, `features`, `fold`, `y_test`,
/// `y_pred` and, when the train and test feature sets differ,
/// `y_pred_on_train_features`; plus the per-fold models in fold order.
pub fn train_ensemble<F: ModelFitter>(
    view: &IndexedFrame,
    options: &TrainOptions,
    fitter: &F,
) -> Result<(IndexedFrame, Vec<F::Model>)> {
    if options.fold_count <= 1 {
        return Err(OutlierError::Configuration(format!(
            "cross-validation needs at least two folds, got {}",
            options.fold_count
        )));
    }
    let train_features = options.train_features();
    let test_features = options.test_features();
    if train_features.len() != test_features.len() {
        return Err(OutlierError::Configuration(format!(
            "train features ({}) and test features ({}) must have the same length",
            train_features.len(),
            test_features.len()
        )));
    }
    if train_features.is_empty() {
        return Err(OutlierError::Configuration(
            "no features were given for training".to_string(),
        ));
    }
    let df = view.frame();
    require_features(df, &options.features, "training")?;
    require_features(df, train_features, "training")?;
    require_features(df, test_features, "training")?;
    require_features(df, &[options.label.as_str()], "training")?;

    let df = match &options.feature_to_filter_na {
        Some(column) => {
            require_features(df, &[column.as_str()], "training")?;
            let filtered = df.filter(&df.column(column)?.is_not_null())?;
            log::info!(
                "Removed {} rows with missing '{column}'",
                df.height() - filtered.height()
            );
            filtered
        }
        None => df.clone(),
    };
    let height = df.height();

    let labels = float_values(&df, &options.label)?;
    if let Some(bad) = labels.iter().flatten().find(|&&y| y != 0.0 && y != 1.0) {
        return Err(OutlierError::Configuration(format!(
            "label column '{}' must be binary (0/1); found {bad}",
            options.label
        )));
    }

    let group_by: Vec<String> = options
        .group_by
        .clone()
        .unwrap_or_else(|| view.index().to_vec());
    let folds = assign_folds(&df, &group_by, options.fold_count, options.seed)?;
    let train_matrix = Features::new(&df, train_features)?;
    let test_matrix = Features::new(&df, test_features)?;
    let cross_apply = options.cross_apply();
    log::info!(
        "Training {} folds on {} rows grouped by [{}]",
        options.fold_count,
        height,
        group_by.join(", ")
    );

    let outputs: Vec<FoldOutput<F::Model>> = (0..options.fold_count)
        .into_par_iter()
        .map(|fold| -> Result<FoldOutput<F::Model>> {
            let held_out: Vec<usize> = (0..height).filter(|&r| folds[r] == fold).collect();
            let labelled: Vec<usize> = (0..height)
                .filter(|&r| folds[r] != fold && labels[r].is_some())
                .collect();
            let fit_rows = train_matrix.complete_rows(&labelled);
            let matrix = train_matrix.matrix(&fit_rows)?;
            let y: Array1<f64> = fit_rows.iter().filter_map(|&r| labels[r]).collect();
            let model = fitter.fit(matrix.view(), y.view(), train_features)?;
            log::debug!(
                "Fold {fold}: fitted on {} rows, scoring {} held-out rows",
                fit_rows.len(),
                held_out.len()
            );

            let y_pred = score_rows(&model, &test_matrix, &held_out)?;
            let y_pred_on_train = if cross_apply {
                Some(score_rows(&model, &train_matrix, &held_out)?)
            } else {
                None
            };
            Ok(FoldOutput {
                rows: held_out,
                y_pred,
                y_pred_on_train,
                model,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut order = Vec::with_capacity(height);
    let mut fold_col: Vec<i64> = Vec::with_capacity(height);
    let mut y_pred = Vec::with_capacity(height);
    let mut y_pred_on_train = Vec::with_capacity(height);
    let mut models = Vec::with_capacity(outputs.len());
    for (fold, output) in outputs.into_iter().enumerate() {
        fold_col.extend(std::iter::repeat_n(fold as i64, output.rows.len()));
        order.extend(output.rows);
        y_pred.extend(output.y_pred);
        if let Some(preds) = output.y_pred_on_train {
            y_pred_on_train.extend(preds);
        }
        models.push(output.model);
    }

    let mut carried: Vec<String> = view.index().to_vec();
    for feature in &options.features {
        if !carried.contains(feature) {
            carried.push(feature.clone());
        }
    }
    let y_test: Vec<Option<f64>> = order.iter().map(|&r| labels[r]).collect();
    let mut out = take_rows(&df.select(carried)?, &order)?;
    out.with_column(Series::new("fold".into(), fold_col))?;
    out.with_column(Series::new("y_test".into(), y_test))?;
    out.with_column(Series::new("y_pred".into(), y_pred))?;
    if cross_apply {
        out.with_column(Series::new("y_pred_on_train_features".into(), y_pred_on_train))?;
    }
    Ok((IndexedFrame::new(out, view.index())?, models))
}
