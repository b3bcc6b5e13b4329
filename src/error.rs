use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure raised inside one fire's processing stages.
///
/// Stage errors are caught at the per-fire state machine boundary and
/// recorded on the job; they never abort the batch loop.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StageError {
    /// Required inputs are missing or invalid (empty perimeter, absent
    /// shared dataset). Never retried.
    #[error("input data error: {0}")]
    InputData(String),

    /// The external assessment model reported a computation fault.
    /// Retried only when the model classified the fault as transient
    /// (resource exhaustion and the like).
    #[error("assessment error: {message}")]
    Assessment { message: String, retryable: bool },

    /// The assessment model did not return within the configured bound.
    #[error("assessment timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Operator-initiated abort. The job stops at the next stage boundary.
    #[error("cancelled by operator")]
    Cancelled,
}

impl StageError {
    /// Whether the retry loop may re-run the current stage for this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::InputData(_) => false,
            StageError::Assessment { retryable, .. } => *retryable,
            StageError::Timeout { .. } => true,
            StageError::Cancelled => false,
        }
    }

    /// Stable kind tag persisted in job records and the aggregate report.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::InputData(_) => "InputDataError",
            StageError::Assessment { .. } => "AssessmentError",
            StageError::Timeout { .. } => "TimeoutError",
            StageError::Cancelled => "Cancelled",
        }
    }
}

/// Conditions outside any single fire's scope. These abort the batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Job store unreachable: {0}")]
    Store(String),

    #[error("No fires found under {0}. Check root_folder in debrisflow.toml.")]
    EmptyCatalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_data_is_never_retryable() {
        let err = StageError::InputData("perimeter missing".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "InputDataError");
    }

    #[test]
    fn assessment_retryability_follows_classification() {
        let transient = StageError::Assessment {
            message: "out of memory".into(),
            retryable: true,
        };
        let fatal = StageError::Assessment {
            message: "no stream network".into(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!fatal.is_retryable());
        assert_eq!(transient.kind(), "AssessmentError");
    }

    #[test]
    fn timeout_is_retryable_cancelled_is_not() {
        assert!(StageError::Timeout { seconds: 300 }.is_retryable());
        assert!(!StageError::Cancelled.is_retryable());
    }

    #[test]
    fn stage_error_display() {
        let err = StageError::Timeout { seconds: 120 };
        assert_eq!(err.to_string(), "assessment timed out after 120s");
    }
}
