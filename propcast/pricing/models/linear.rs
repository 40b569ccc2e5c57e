use ndarray::{Array1, Array2, ArrayView1};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::PricingError;

/// Gradient-descent settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearParams {
    /// Step size.
    pub learning_rate: f64,
    /// Full-batch passes over the data.
    pub epochs: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

/// Linear regression model with bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressionModel {
    weights: Vec<f64>,
    bias: f64,
}

impl LinearRegressionModel {
    /// Creates a model with small seeded weights and the given bias.
    #[must_use]
    pub fn new(feature_dim: usize, bias: f64, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        Self {
            weights: (0..feature_dim)
                .map(|_| rng.gen_range(-0.05..0.05))
                .collect(),
            bias,
        }
    }

    /// Trains with full-batch gradient descent and returns the fitted model.
    pub fn fit(
        features: &Array2<f64>,
        labels: &[f64],
        params: &LinearParams,
    ) -> Result<Self, PricingError> {
        let rows = features.nrows();
        if rows == 0 || rows != labels.len() {
            return Err(PricingError::Training(format!(
                "linear model needs matching non-empty inputs, got {rows} rows and {} labels",
                labels.len()
            )));
        }
        let targets = Array1::from(labels.to_vec());
        let mean = targets.sum() / rows as f64;
        let mut model = Self::new(features.ncols(), mean, params.seed);
        let mut weights = Array1::from(model.weights.clone());

        for _ in 0..params.epochs {
            let predictions = features.dot(&weights) + model.bias;
            let error = predictions - &targets;
            let grad = features.t().dot(&error) / rows as f64;
            weights.scaled_add(-params.learning_rate, &grad);
            model.bias -= params.learning_rate * error.sum() / rows as f64;
        }

        if !model.bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(PricingError::Training(
                "gradient descent diverged; lower the learning rate".into(),
            ));
        }
        model.weights = weights.to_vec();
        Ok(model)
    }

    /// Predicts one row. Caller guarantees the row width.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        row.iter()
            .zip(self.weights.iter())
            .map(|(feature, weight)| feature * weight)
            .sum::<f64>()
            + self.bias
    }

    /// Width the model was fitted with.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.weights.len()
    }

    /// Whether every parameter is finite.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.bias.is_finite() && self.weights.iter().all(|w| w.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fits_a_line() {
        let features = array![[-1.0], [-0.5], [0.0], [0.5], [1.0]];
        let labels = [1.0, 2.0, 3.0, 4.0, 5.0];
        let params = LinearParams {
            learning_rate: 0.1,
            epochs: 500,
            seed: 42,
        };
        let model = LinearRegressionModel::fit(&features, &labels, &params).unwrap();
        let prediction = model.predict_row(array![0.25].view());
        assert!((prediction - 3.5).abs() < 0.05, "prediction={prediction}");
        assert_eq!(model.n_features(), 1);
    }

    #[test]
    fn zero_epochs_predicts_label_mean() {
        let features = array![[0.0, 0.0], [0.0, 0.0]];
        let labels = [10.0, 20.0];
        let params = LinearParams {
            learning_rate: 0.1,
            epochs: 0,
            seed: 1,
        };
        let model = LinearRegressionModel::fit(&features, &labels, &params).unwrap();
        assert!((model.predict_row(array![0.0, 0.0].view()) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn divergence_is_an_error() {
        let features = array![[1000.0], [-1000.0], [500.0]];
        let labels = [1.0, 2.0, 3.0];
        let params = LinearParams {
            learning_rate: 10.0,
            epochs: 200,
            seed: 7,
        };
        assert!(LinearRegressionModel::fit(&features, &labels, &params).is_err());
    }
}
