use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{dataset::DatasetError, geo::lookup::LookupError, store::StoreError};

/// How a failure is handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Has a defined fallback; never aborts a prediction.
    RecoverableDegrade,
    /// Caller supplied a malformed request.
    InputInvalid,
    /// Internal invariant violated; fatal for the current request only.
    Unrecoverable,
}

/// Errors surfaced by the pricing pipeline.
#[derive(Debug, Error)]
pub enum PricingError {
    /// Request failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Encoded vector width disagrees with the width a model was trained on.
    #[error("feature column mismatch: model expects {expected} columns, got {actual}")]
    ColumnMismatch {
        /// Width the model was fitted with.
        expected: usize,
        /// Width that was supplied.
        actual: usize,
    },
    /// Model fitting failed.
    #[error("training failed: {0}")]
    Training(String),
    /// Training data could not be obtained.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// Bundle persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// External geospatial lookup failed.
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PricingError {
    /// Classifies the error per the degrade-or-propagate policy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InputInvalid,
            Self::Dataset(_) | Self::Store(_) | Self::Lookup(_) => ErrorKind::RecoverableDegrade,
            Self::ColumnMismatch { .. }
            | Self::Training(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Unrecoverable,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Error payload returned to callers instead of a prediction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Human-readable description.
    pub error: String,
    /// Error classification.
    pub kind: ErrorKind,
}

impl From<&PricingError> for ErrorPayload {
    fn from(err: &PricingError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(
            PricingError::invalid("area must be positive").kind(),
            ErrorKind::InputInvalid
        );
        assert_eq!(
            PricingError::ColumnMismatch {
                expected: 4,
                actual: 3
            }
            .kind(),
            ErrorKind::Unrecoverable
        );
        assert_eq!(
            PricingError::from(LookupError::Timeout(5_000)).kind(),
            ErrorKind::RecoverableDegrade
        );
    }

    #[test]
    fn configuration_errors_are_not_caller_input() {
        let err = PricingError::Config("growth band inverted".into());
        assert_eq!(err.kind(), ErrorKind::Unrecoverable);
        assert_eq!(ErrorPayload::from(&err).kind, ErrorKind::Unrecoverable);
    }

    #[test]
    fn payload_serializes_kind() {
        let payload = ErrorPayload::from(&PricingError::invalid("years must be positive"));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "input_invalid");
        assert!(json["error"].as_str().unwrap().contains("years"));
    }
}
