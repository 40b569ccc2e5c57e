use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

/// Computes mean squared error between predictions and labels.
#[must_use]
pub fn mean_squared_error(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(labels.iter())
        .map(|(pred, label)| (pred - label).powi(2))
        .sum::<f64>()
        / predictions.len() as f64
}

/// Coefficient of determination. Zero when the labels are constant.
#[must_use]
pub fn r_squared(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return 0.0;
    }
    let mean = labels.iter().sum::<f64>() / labels.len() as f64;
    let total: f64 = labels.iter().map(|y| (y - mean).powi(2)).sum();
    if total <= f64::EPSILON {
        return 0.0;
    }
    let residual: f64 = predictions
        .iter()
        .zip(labels)
        .map(|(pred, label)| (label - pred).powi(2))
        .sum();
    1.0 - residual / total
}

/// Holdout score of one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    /// Mean squared error.
    pub mse: f64,
    /// Root mean squared error.
    pub rmse: f64,
    /// Coefficient of determination.
    pub r2: f64,
}

impl ModelScore {
    /// Scores predictions against labels.
    #[must_use]
    pub fn compute(predictions: &[f64], labels: &[f64]) -> Self {
        let mse = mean_squared_error(predictions, labels);
        Self {
            mse,
            rmse: mse.sqrt(),
            r2: r_squared(predictions, labels),
        }
    }
}

/// Row indices of a shuffled train/holdout partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldoutSplit {
    /// Rows used for fitting.
    pub train: Vec<usize>,
    /// Rows used for scoring.
    pub holdout: Vec<usize>,
}

/// Deterministically shuffles `rows` indices and sets aside
/// `holdout_fraction` of them. The holdout is empty when either side would
/// end up with fewer than two rows.
#[must_use]
pub fn holdout_split(rows: usize, holdout_fraction: f64, seed: u64) -> HoldoutSplit {
    let mut indices: Vec<usize> = (0..rows).collect();
    let holdout_len = (rows as f64 * holdout_fraction.clamp(0.0, 0.9)).round() as usize;
    if holdout_len < 2 || rows.saturating_sub(holdout_len) < 2 {
        return HoldoutSplit {
            train: indices,
            holdout: Vec::new(),
        };
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let holdout = indices.split_off(rows - holdout_len);
    HoldoutSplit {
        train: indices,
        holdout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_and_r2() {
        let labels = [1.0, 2.0, 3.0];
        assert_eq!(mean_squared_error(&labels, &labels), 0.0);
        assert!((r_squared(&labels, &labels) - 1.0).abs() < 1e-12);
        let score = ModelScore::compute(&[2.0, 2.0, 2.0], &labels);
        assert!((score.mse - 2.0 / 3.0).abs() < 1e-12);
        assert!(score.r2.abs() < 1e-12);
        assert_eq!(r_squared(&[1.0, 1.0], &[5.0, 5.0]), 0.0);
    }

    #[test]
    fn split_is_a_deterministic_partition() {
        let a = holdout_split(50, 0.2, 42);
        let b = holdout_split(50, 0.2, 42);
        assert_eq!(a, b);
        assert_eq!(a.holdout.len(), 10);
        let mut all: Vec<usize> = a.train.iter().chain(&a.holdout).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn tiny_datasets_skip_the_holdout() {
        let split = holdout_split(3, 0.2, 42);
        assert!(split.holdout.is_empty());
        assert_eq!(split.train.len(), 3);
        assert!(holdout_split(100, 0.0, 1).holdout.is_empty());
    }
}
