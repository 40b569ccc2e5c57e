//! Regression models behind the price and growth predictions.

/// Bagged regression trees.
pub mod forest;
/// Gradient-descent linear regression.
pub mod linear;
/// Error metrics and holdout splitting.
pub mod metrics;
/// Training reports.
pub mod report;

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

pub use forest::{ForestParams, RandomForestRegressor};
pub use linear::{LinearParams, LinearRegressionModel};
pub use metrics::ModelScore;
pub use report::TrainingReport;

use crate::{
    config::{ModelKind, ModelSettings},
    encoder::EncodedFeatureVector,
    error::PricingError,
};

/// Everything needed to fit one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Model family.
    pub kind: ModelKind,
    /// Forest settings, used when `kind` is `Forest`.
    pub forest: ForestParams,
    /// Linear settings, used when `kind` is `Linear`.
    pub linear: LinearParams,
}

impl FitOptions {
    /// Builds options from the `[model]` section with an explicit tree count.
    #[must_use]
    pub const fn from_settings(settings: &ModelSettings, trees: usize) -> Self {
        Self {
            kind: settings.kind,
            forest: ForestParams {
                trees,
                max_depth: settings.max_depth,
                min_samples_leaf: settings.min_samples_leaf,
                feature_fraction: settings.feature_fraction,
                seed: settings.seed,
            },
            linear: LinearParams {
                learning_rate: settings.learning_rate,
                epochs: settings.epochs,
                seed: settings.seed,
            },
        }
    }
}

/// A fitted regression model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressionModel {
    /// Random forest.
    Forest(RandomForestRegressor),
    /// Linear regression.
    Linear(LinearRegressionModel),
    /// Last-resort model that always predicts the same value.
    Constant {
        /// Predicted value.
        value: f64,
        /// Expected input width.
        n_features: usize,
    },
}

impl RegressionModel {
    /// Fits a model of the requested family.
    pub fn fit(
        options: &FitOptions,
        features: &Array2<f64>,
        labels: &[f64],
    ) -> Result<Self, PricingError> {
        match options.kind {
            ModelKind::Forest => {
                RandomForestRegressor::fit(features, labels, &options.forest).map(Self::Forest)
            }
            ModelKind::Linear => {
                LinearRegressionModel::fit(features, labels, &options.linear).map(Self::Linear)
            }
        }
    }

    /// Fits on a shuffled subset, scores on the rest, then refits on every
    /// row. The returned score belongs to the subset model.
    pub fn fit_scored(
        options: &FitOptions,
        features: &Array2<f64>,
        labels: &[f64],
        holdout_fraction: f64,
        seed: u64,
    ) -> Result<(Self, Option<ModelScore>), PricingError> {
        let split = metrics::holdout_split(features.nrows(), holdout_fraction, seed);
        let score = if split.holdout.is_empty() {
            None
        } else {
            let train_x = features.select(Axis(0), &split.train);
            let train_y: Vec<f64> = split.train.iter().map(|&i| labels[i]).collect();
            let holdout_x = features.select(Axis(0), &split.holdout);
            let holdout_y: Vec<f64> = split.holdout.iter().map(|&i| labels[i]).collect();
            let partial = Self::fit(options, &train_x, &train_y)?;
            let predictions = partial.predict_batch(&holdout_x)?;
            Some(ModelScore::compute(&predictions, &holdout_y))
        };
        let model = Self::fit(options, features, labels)?;
        Ok((model, score))
    }

    /// Predicts one encoded vector.
    pub fn predict(&self, features: &EncodedFeatureVector) -> Result<f64, PricingError> {
        self.predict_row(ArrayView1::from(features.as_slice()))
    }

    /// Predicts one row, rejecting rows of the wrong width.
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> Result<f64, PricingError> {
        let expected = self.n_features();
        if row.len() != expected {
            return Err(PricingError::ColumnMismatch {
                expected,
                actual: row.len(),
            });
        }
        let value = match self {
            Self::Forest(model) => model.predict_row(row),
            Self::Linear(model) => model.predict_row(row),
            Self::Constant { value, .. } => *value,
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(PricingError::Internal(format!(
                "{} model produced a non-finite prediction",
                self.name()
            )))
        }
    }

    /// Predicts every row of a matrix.
    pub fn predict_batch(&self, features: &Array2<f64>) -> Result<Vec<f64>, PricingError> {
        features
            .rows()
            .into_iter()
            .map(|row| self.predict_row(row))
            .collect()
    }

    /// Width the model was fitted with.
    #[must_use]
    pub fn n_features(&self) -> usize {
        match self {
            Self::Forest(model) => model.n_features(),
            Self::Linear(model) => model.n_features(),
            Self::Constant { n_features, .. } => *n_features,
        }
    }

    /// Family name used in reports and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Forest(_) => "random_forest",
            Self::Linear(_) => "linear_regression",
            Self::Constant { .. } => "constant",
        }
    }

    /// Structural check used after deserialization.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::Forest(model) => model.is_well_formed(),
            Self::Linear(model) => model.is_well_formed(),
            Self::Constant { value, .. } => value.is_finite(),
        }
    }
}
