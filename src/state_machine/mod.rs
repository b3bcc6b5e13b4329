mod job;
mod state;

pub use job::{ErrorRecord, JobRecord, ProcessingJob, RetryPolicy, StageOutcome};
pub use state::{JobState, StateMachine, Transition};
