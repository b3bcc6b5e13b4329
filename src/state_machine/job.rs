use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::state::JobState;
use crate::catalog::FireRecord;
use crate::error::StageError;
use crate::memory::OptimizationLevel;

/// The result of executing one processing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutcome {
    Success,
    Failure(StageError),
}

/// Configuration for stage retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts before a job is marked failed.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms * 2u64.pow(attempt.saturating_sub(1))
    }
}

/// The unit of work for one fire.
///
/// Created by the batch orchestrator when a fire is scheduled, mutated only
/// by the per-fire state machine, and serialized as a [`JobRecord`] once it
/// reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub fire: FireRecord,
    pub state: JobState,
    pub state_history: Vec<JobState>,
    /// Fixed once the job enters preprocessing; `None` before that.
    pub optimization_level: Option<OptimizationLevel>,
    pub attempt_count: u32,
    pub retry_policy: RetryPolicy,
    pub error: Option<StageError>,
    /// Elapsed seconds per stage name.
    pub timing: BTreeMap<String, f64>,
    /// Product name to written location.
    pub output_paths: BTreeMap<String, String>,
    /// Non-fatal findings, e.g. basins excluded from rasterization.
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(fire: FireRecord, retry_policy: RetryPolicy) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            fire,
            state: JobState::Initialized,
            state_history: Vec::new(),
            optimization_level: None,
            attempt_count: 0,
            retry_policy,
            error: None,
            timing: BTreeMap::new(),
            output_paths: BTreeMap::new(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fixes the optimization level for the remainder of the job. The first
    /// call wins; later calls are ignored so the level cannot change
    /// mid-job.
    pub fn fix_optimization_level(&mut self, level: OptimizationLevel) {
        self.optimization_level.get_or_insert(level);
        self.updated_at = Utc::now();
    }

    pub fn record_timing(&mut self, stage: &str, elapsed_seconds: f64) {
        self.timing.insert(stage.to_string(), elapsed_seconds);
        self.updated_at = Utc::now();
    }

    pub fn record_output(&mut self, product: &str, path: &str) {
        self.output_paths.insert(product.to_string(), path.to_string());
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Serialized error form carried by job records and the aggregate report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
}

impl From<&StageError> for ErrorRecord {
    fn from(err: &StageError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Durable audit record produced when a job reaches a terminal state.
/// One record per fire key; the aggregate report is a map of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: String,
    pub fire: FireRecord,
    pub state: JobState,
    pub state_transitions: Vec<JobState>,
    pub optimization_level: Option<OptimizationLevel>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub error: Option<ErrorRecord>,
    pub timing: BTreeMap<String, f64>,
    pub output_paths: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl JobRecord {
    /// Snapshots a terminal job into its durable form.
    pub fn from_job(job: &ProcessingJob) -> Self {
        let now = Utc::now();
        let mut transitions = job.state_history.clone();
        transitions.push(job.state);

        Self {
            key: job.fire.key(),
            fire: job.fire.clone(),
            state: job.state,
            state_transitions: transitions,
            optimization_level: job.optimization_level,
            attempt_count: job.attempt_count,
            max_attempts: job.retry_policy.max_attempts,
            error: job.error.as_ref().map(ErrorRecord::from),
            timing: job.timing.clone(),
            output_paths: job.output_paths.clone(),
            warnings: job.warnings.clone(),
            started_at: job.created_at,
            completed_at: now,
            duration_seconds: (now - job.created_at).num_milliseconds() as f64 / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fire() -> FireRecord {
        FireRecord {
            name: "caldor".into(),
            year: 2021,
            perimeter_present: true,
            severity_present: true,
            input_size_bytes: 42 * 1024 * 1024,
        }
    }

    #[test]
    fn job_creation_defaults() {
        let job = ProcessingJob::new(test_fire(), RetryPolicy::default());
        assert_eq!(job.state, JobState::Initialized);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.optimization_level, None);
        assert!(job.state_history.is_empty());
        assert!(job.error.is_none());
        assert!(job.timing.is_empty());
    }

    #[test]
    fn optimization_level_is_fixed_by_first_call() {
        let mut job = ProcessingJob::new(test_fire(), RetryPolicy::default());
        job.fix_optimization_level(OptimizationLevel::Moderate);
        job.fix_optimization_level(OptimizationLevel::Aggressive);
        assert_eq!(job.optimization_level, Some(OptimizationLevel::Moderate));
    }

    #[test]
    fn retry_policy_exponential_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1000,
        };
        assert_eq!(policy.delay_for_attempt(1), 1000);
        assert_eq!(policy.delay_for_attempt(2), 2000);
        assert_eq!(policy.delay_for_attempt(3), 4000);
        assert_eq!(policy.delay_for_attempt(4), 8000);
    }

    #[test]
    fn job_record_from_job() {
        let mut job = ProcessingJob::new(test_fire(), RetryPolicy::default());
        job.record_timing("preprocess", 12.5);
        job.record_output("basins", "/out/caldor/basins.geojson");

        let record = JobRecord::from_job(&job);
        assert_eq!(record.key, "2021_caldor");
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.timing["preprocess"], 12.5);
        assert_eq!(record.state_transitions, vec![JobState::Initialized]);
        assert!(record.error.is_none());
    }

    #[test]
    fn error_record_captures_kind_and_message() {
        let err = StageError::InputData("empty perimeter".into());
        let record = ErrorRecord::from(&err);
        assert_eq!(record.kind, "InputDataError");
        assert_eq!(record.message, "input data error: empty perimeter");
    }

    #[test]
    fn job_serialization_roundtrip() {
        let job = ProcessingJob::new(test_fire(), RetryPolicy::default());
        let json = serde_json::to_string(&job).unwrap();
        let deserialized: ProcessingJob = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.id, job.id);
        assert_eq!(deserialized.fire.key(), "2021_caldor");
        assert_eq!(deserialized.state, JobState::Initialized);
    }
}
