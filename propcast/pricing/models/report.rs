use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::ModelScore;

/// Report describing how a bundle was trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    /// Model family name.
    pub model: String,
    /// Where the training rows came from (`dataset`, `synthetic`, `fallback`).
    pub source: String,
    /// Rows used for fitting.
    pub samples: usize,
    /// Rows dropped because they failed validation.
    pub dropped: usize,
    /// Rows set aside for scoring.
    pub holdout: usize,
    /// Holdout score of the price model.
    pub price: Option<ModelScore>,
    /// Holdout score of the growth model, when one was trained.
    pub growth: Option<ModelScore>,
    /// Whether a growth-rate model was fitted.
    pub growth_model: bool,
    /// Completion time.
    pub trained_at: DateTime<Utc>,
}

impl TrainingReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        let score = |s: Option<&ModelScore>| {
            s.map_or_else(
                || "n/a".to_string(),
                |s| format!("rmse={:.4} r2={:.3}", s.rmse, s.r2),
            )
        };
        format!(
            "[pricing] model={} source={} samples={} dropped={} holdout={} price[{}] growth[{}]",
            self.model,
            self.source,
            self.samples,
            self.dropped,
            self.holdout,
            score(self.price.as_ref()),
            if self.growth_model {
                score(self.growth.as_ref())
            } else {
                "fallback-rate".to_string()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_mentions_scores() {
        let report = TrainingReport {
            model: "random_forest".into(),
            source: "synthetic".into(),
            samples: 200,
            dropped: 1,
            holdout: 40,
            price: Some(ModelScore {
                mse: 4.0,
                rmse: 2.0,
                r2: 0.9,
            }),
            growth: None,
            growth_model: false,
            trained_at: Utc::now(),
        };
        let summary = report.summary();
        assert!(summary.contains("model=random_forest"));
        assert!(summary.contains("rmse=2.0000"));
        assert!(summary.contains("growth[fallback-rate]"));
    }
}
