use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use super::features::{FeatureColumn, TrainingSet};

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("model has not been fitted yet")]
    NotFitted,

    #[error("dimension mismatch: expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("normal equations are singular")]
    Singular,

    #[error("feature column {0} is required by this model")]
    MissingColumn(String),

    #[error("invalid ridge alpha: {0}")]
    InvalidAlpha(f64),
}

/// Model type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Ridge,
    Persistence,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Ridge => "ridge",
            ModelKind::Persistence => "persistence",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub kind: ModelKind,
    /// L2 penalty on the standardised coefficients.
    pub ridge_alpha: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            kind: ModelKind::Ridge,
            ridge_alpha: 1.0,
        }
    }
}

/// In-sample fit quality after a batch fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub samples: usize,
    pub skipped_rows: usize,
    pub rmse: f64,
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
}

/// A per-currency regressor. Serialised with a `kind` tag so any variant can
/// be restored from its file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecastModel {
    Ridge(RidgeRegressor),
    Persistence(PersistenceModel),
}

impl ForecastModel {
    pub fn new(settings: &ModelSettings) -> Self {
        match settings.kind {
            ModelKind::Ridge => ForecastModel::Ridge(RidgeRegressor::new(settings.ridge_alpha)),
            ModelKind::Persistence => ForecastModel::Persistence(PersistenceModel::default()),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ForecastModel::Ridge(_) => ModelKind::Ridge,
            ForecastModel::Persistence(_) => ModelKind::Persistence,
        }
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            ForecastModel::Ridge(m) => m.weights.is_some(),
            ForecastModel::Persistence(m) => m.inputs.is_some(),
        }
    }

    /// Full batch refit; every learned parameter is replaced.
    pub fn fit(&mut self, set: &TrainingSet) -> Result<FitReport, ModelError> {
        if set.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        match self {
            ForecastModel::Ridge(m) => m.fit(set)?,
            ForecastModel::Persistence(m) => m.fit(set)?,
        }

        let mut squared = 0.0;
        let mut pct = 0.0;
        let mut pct_count = 0usize;
        for (row, &actual) in set.features.outer_iter().zip(set.labels.iter()) {
            let predicted = self.predict(&row.to_vec())?;
            let err = predicted - actual;
            squared += err * err;
            if actual.abs() > f64::EPSILON {
                pct += (err / actual).abs();
                pct_count += 1;
            }
        }
        let n = set.len() as f64;
        let report = FitReport {
            samples: set.len(),
            skipped_rows: set.skipped_rows,
            rmse: (squared / n).sqrt(),
            mape: if pct_count > 0 { pct / pct_count as f64 * 100.0 } else { 0.0 },
        };
        debug!(
            "{} fit: {} samples, rmse={:.6}, mape={:.3}%",
            self.kind(),
            report.samples,
            report.rmse,
            report.mape
        );
        Ok(report)
    }

    pub fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        match self {
            ForecastModel::Ridge(m) => m.predict(features),
            ForecastModel::Persistence(m) => m.predict(features),
        }
    }
}

/// Standardised weights for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeWeights {
    pub columns: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
}

/// Ridge regression on z-scored features, solved in closed form:
/// beta = (Z'Z + alpha I)^-1 Z'(y - mean(y)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    alpha: f64,
    weights: Option<RidgeWeights>,
}

impl RidgeRegressor {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            weights: None,
        }
    }

    fn fit(&mut self, set: &TrainingSet) -> Result<(), ModelError> {
        if !(self.alpha > 0.0) {
            return Err(ModelError::InvalidAlpha(self.alpha));
        }
        let x = &set.features;
        let y = &set.labels;
        let n = x.nrows();
        let num_features = x.ncols();

        let means = x.mean_axis(Axis(0)).ok_or(ModelError::EmptyTrainingSet)?;
        let stds = x.std_axis(Axis(0), 0.0);
        let y_mean = y.mean().ok_or(ModelError::EmptyTrainingSet)?;

        // Constant columns carry no signal and are zeroed.
        let mut z = Array2::<f64>::zeros((n, num_features));
        for j in 0..num_features {
            if stds[j] > 1e-10 {
                for i in 0..n {
                    z[[i, j]] = (x[[i, j]] - means[j]) / stds[j];
                }
            }
        }

        let mut gram = z.t().dot(&z);
        for j in 0..num_features {
            gram[[j, j]] += self.alpha;
        }
        let centered: Array1<f64> = y.mapv(|v| v - y_mean);
        let rhs = z.t().dot(&centered);
        let coefficients = cholesky_solve(&gram, &rhs)?;

        self.weights = Some(RidgeWeights {
            columns: set.column_names(),
            coefficients: coefficients.to_vec(),
            intercept: y_mean,
            feature_means: means.to_vec(),
            feature_stds: stds.to_vec(),
        });
        Ok(())
    }

    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        let weights = self.weights.as_ref().ok_or(ModelError::NotFitted)?;
        if features.len() != weights.coefficients.len() {
            return Err(ModelError::DimensionMismatch {
                expected: weights.coefficients.len(),
                got: features.len(),
            });
        }

        let mut y = weights.intercept;
        for (j, &value) in features.iter().enumerate() {
            let std = weights.feature_stds[j];
            if std > 1e-10 {
                y += weights.coefficients[j] * (value - weights.feature_means[j]) / std;
            }
        }
        Ok(y)
    }
}

/// Solves `a x = b` for symmetric positive definite `a`.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, ModelError> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 1e-12 {
                    return Err(ModelError::Singular);
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (b[i] - sum) / l[[i, i]];
    }

    // L' x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }

    Ok(x)
}

/// Column positions the persistence baseline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceInputs {
    pub width: usize,
    pub lag_1: usize,
    pub diff_1: usize,
}

/// Naive "tomorrow equals today" baseline: reconstructs the latest value as
/// `lag_1 + value_lag_1` and predicts it unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceModel {
    inputs: Option<PersistenceInputs>,
}

impl PersistenceModel {
    /// Baseline bound to a column layout without needing a fit.
    pub fn for_columns(columns: &[FeatureColumn]) -> Result<Self, ModelError> {
        let find = |column: FeatureColumn| {
            columns
                .iter()
                .position(|c| *c == column)
                .ok_or_else(|| ModelError::MissingColumn(column.name()))
        };
        Ok(Self {
            inputs: Some(PersistenceInputs {
                width: columns.len(),
                lag_1: find(FeatureColumn::Lag(1))?,
                diff_1: find(FeatureColumn::Diff(1))?,
            }),
        })
    }

    fn fit(&mut self, set: &TrainingSet) -> Result<(), ModelError> {
        *self = Self::for_columns(&set.columns)?;
        Ok(())
    }

    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        let inputs = self.inputs.ok_or(ModelError::NotFitted)?;
        if features.len() != inputs.width {
            return Err(ModelError::DimensionMismatch {
                expected: inputs.width,
                got: features.len(),
            });
        }
        Ok(features[inputs.lag_1] + features[inputs.diff_1])
    }
}
