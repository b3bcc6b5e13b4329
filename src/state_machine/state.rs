use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::{ProcessingJob, StageOutcome};
use crate::error::StageError;

/// States of the per-fire processing state machine.
///
/// Each job flows through:
/// INITIALIZED → PREPROCESSING → PREPROCESSED → ASSESSING → ASSESSED →
/// EXPORTING → DONE. FAILED is reachable from any non-terminal state;
/// SKIPPED only from INITIALIZED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Initialized,
    Preprocessing,
    Preprocessed,
    Assessing,
    Assessed,
    Exporting,
    Done,
    Failed,
    Skipped,
}

impl JobState {
    /// DONE, FAILED and SKIPPED are terminal; no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Skipped)
    }

    /// The state reached from `self` on stage success.
    fn successor(&self) -> JobState {
        match self {
            JobState::Initialized => JobState::Preprocessing,
            JobState::Preprocessing => JobState::Preprocessed,
            JobState::Preprocessed => JobState::Assessing,
            JobState::Assessing => JobState::Assessed,
            JobState::Assessed => JobState::Exporting,
            JobState::Exporting => JobState::Done,
            terminal => *terminal,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Initialized => write!(f, "INITIALIZED"),
            JobState::Preprocessing => write!(f, "PREPROCESSING"),
            JobState::Preprocessed => write!(f, "PREPROCESSED"),
            JobState::Assessing => write!(f, "ASSESSING"),
            JobState::Assessed => write!(f, "ASSESSED"),
            JobState::Exporting => write!(f, "EXPORTING"),
            JobState::Done => write!(f, "DONE"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next state.
    Next(JobState),
    /// Re-run the current stage after a transient failure. Only the stage
    /// resets, never the whole job.
    Retry { state: JobState, reason: StageError },
    /// The job has reached a terminal state.
    Complete(JobState),
}

/// Drives a [`ProcessingJob`] through the state machine.
pub struct StateMachine;

impl StateMachine {
    /// Computes the next transition for the job based on its current state
    /// and the provided stage outcome, and applies it.
    ///
    /// Success advances to the successor state; failure retries when the
    /// error is retryable and attempts remain, otherwise completes with
    /// FAILED retaining the last error. Terminal states always return
    /// `Complete` unchanged.
    pub fn next(job: &mut ProcessingJob, outcome: StageOutcome) -> Transition {
        if job.state.is_terminal() {
            return Transition::Complete(job.state);
        }

        let transition = match &outcome {
            StageOutcome::Success => {
                // A success wipes any error left by an earlier retry.
                job.error = None;
                Transition::Next(job.state.successor())
            }
            StageOutcome::Failure(err) => Self::handle_failure(job, err.clone()),
        };

        // Apply the transition to the job.
        match &transition {
            Transition::Next(next_state) => {
                job.state_history.push(job.state);
                job.state = *next_state;
            }
            Transition::Retry { state, .. } => {
                // State stays the same; the attempt counter was already
                // incremented in handle_failure.
                job.state_history.push(*state);
            }
            Transition::Complete(terminal) => {
                job.state_history.push(job.state);
                job.state = *terminal;
            }
        }

        transition
    }

    /// Marks a job as skipped. Legal only from INITIALIZED; calls in any
    /// other state leave the job untouched and return false.
    pub fn skip(job: &mut ProcessingJob) -> bool {
        if job.state != JobState::Initialized {
            return false;
        }
        job.state_history.push(job.state);
        job.state = JobState::Skipped;
        true
    }

    fn handle_failure(job: &mut ProcessingJob, err: StageError) -> Transition {
        job.error = Some(err.clone());

        if !err.is_retryable() {
            return Transition::Complete(JobState::Failed);
        }

        job.attempt_count += 1;
        if job.attempt_count <= job.retry_policy.max_attempts {
            Transition::Retry {
                state: job.state,
                reason: err,
            }
        } else {
            Transition::Complete(JobState::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FireRecord;
    use crate::state_machine::RetryPolicy;

    fn make_job(max_attempts: u32) -> ProcessingJob {
        let fire = FireRecord {
            name: "creek".into(),
            year: 2020,
            perimeter_present: true,
            severity_present: true,
            input_size_bytes: 1024,
        };
        ProcessingJob::new(
            fire,
            RetryPolicy {
                max_attempts,
                ..Default::default()
            },
        )
    }

    fn transient() -> StageError {
        StageError::Assessment {
            message: "resource exhaustion".into(),
            retryable: true,
        }
    }

    #[test]
    fn happy_path_walks_all_states() {
        let mut job = make_job(3);
        assert_eq!(job.state, JobState::Initialized);

        let expected = [
            JobState::Preprocessing,
            JobState::Preprocessed,
            JobState::Assessing,
            JobState::Assessed,
            JobState::Exporting,
            JobState::Done,
        ];
        for state in expected {
            let t = StateMachine::next(&mut job, StageOutcome::Success);
            assert_eq!(t, Transition::Next(state));
            assert_eq!(job.state, state);
        }
        assert!(job.is_terminal());

        // Done is terminal.
        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Complete(JobState::Done));
    }

    #[test]
    fn transient_failure_retries_then_fails() {
        let mut job = make_job(2);
        // Move into the assessing stage.
        for _ in 0..3 {
            StateMachine::next(&mut job, StageOutcome::Success);
        }
        assert_eq!(job.state, JobState::Assessing);

        // First failure — retry 1/2.
        let t = StateMachine::next(&mut job, StageOutcome::Failure(transient()));
        assert!(matches!(t, Transition::Retry { .. }));
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.state, JobState::Assessing);

        // Second failure — retry 2/2.
        let t = StateMachine::next(&mut job, StageOutcome::Failure(transient()));
        assert!(matches!(t, Transition::Retry { .. }));
        assert_eq!(job.attempt_count, 2);

        // Third failure exceeds max attempts, terminal failure.
        let t = StateMachine::next(&mut job, StageOutcome::Failure(transient()));
        assert_eq!(t, Transition::Complete(JobState::Failed));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error, Some(transient()));
    }

    #[test]
    fn input_data_error_fails_without_retry() {
        let mut job = make_job(3);
        let err = StageError::InputData("perimeter is empty".into());

        let t = StateMachine::next(&mut job, StageOutcome::Failure(err.clone()));
        assert_eq!(t, Transition::Complete(JobState::Failed));
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.error, Some(err));
    }

    #[test]
    fn timeout_retries_with_attempts_counted() {
        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);

        let t = StateMachine::next(
            &mut job,
            StageOutcome::Failure(StageError::Timeout { seconds: 600 }),
        );
        assert!(matches!(t, Transition::Retry { .. }));
        assert_eq!(job.attempt_count, 1);

        // Succeed on retry; the retry error is cleared.
        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Next(JobState::Assessed));
        assert!(job.error.is_none());
    }

    #[test]
    fn zero_attempts_fails_on_first_transient_error() {
        let mut job = make_job(0);
        let t = StateMachine::next(&mut job, StageOutcome::Failure(transient()));
        assert_eq!(t, Transition::Complete(JobState::Failed));
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn skip_is_only_legal_from_initialized() {
        let mut job = make_job(3);
        assert!(StateMachine::skip(&mut job));
        assert_eq!(job.state, JobState::Skipped);

        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);
        assert!(!StateMachine::skip(&mut job));
        assert_eq!(job.state, JobState::Preprocessing);
    }

    #[test]
    fn failed_is_terminal() {
        let mut job = make_job(0);
        StateMachine::next(&mut job, StageOutcome::Failure(transient()));
        let t = StateMachine::next(&mut job, StageOutcome::Success);
        assert_eq!(t, Transition::Complete(JobState::Failed));
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn state_history_is_recorded() {
        let mut job = make_job(3);
        StateMachine::next(&mut job, StageOutcome::Success);
        StateMachine::next(&mut job, StageOutcome::Success);

        assert_eq!(
            job.state_history,
            vec![JobState::Initialized, JobState::Preprocessing]
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(JobState::Initialized.to_string(), "INITIALIZED");
        assert_eq!(JobState::Assessing.to_string(), "ASSESSING");
        assert_eq!(JobState::Done.to_string(), "DONE");
        assert_eq!(JobState::Skipped.to_string(), "SKIPPED");
    }
}
