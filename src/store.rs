//! Durable job records and the aggregate report.
//!
//! [`JobStore`] is the only resource multiple jobs write to. Each job owns
//! exactly one file under `jobs/`, named by its fire key, so concurrent
//! completions never contend on a shared file and a crash loses at most
//! the records still in flight. The aggregate report is assembled from the
//! same records at batch end and is what `skip_existing` resumption and
//! the `status` subcommand read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::catalog::FireRecord;
use crate::error::BatchError;
use crate::state_machine::{JobRecord, JobState};

/// Batch-level summary persisted at `report.json`, keyed by fire identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub jobs: BTreeMap<String, JobRecord>,
}

impl AggregateReport {
    /// Builds the report from terminal job records, counting final states.
    pub fn from_records(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        records: Vec<JobRecord>,
    ) -> Self {
        let mut done = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut jobs = BTreeMap::new();

        for record in records {
            match record.state {
                JobState::Done => done += 1,
                JobState::Failed => failed += 1,
                JobState::Skipped => skipped += 1,
                // Terminal states only; anything else is a runner bug and
                // counts as failed rather than vanishing from the report.
                _ => failed += 1,
            }
            jobs.insert(record.key.clone(), record);
        }

        Self {
            started_at,
            finished_at,
            done,
            failed,
            skipped,
            jobs,
        }
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }
}

/// Filesystem-backed store under the batch output folder.
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Opens (creating if needed) the store under the given folder.
    /// Failure here is batch-fatal: without the store there is no report
    /// and no resumability.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BatchError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("jobs"))
            .map_err(|e| BatchError::Store(format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    fn job_path(&self, key: &str) -> PathBuf {
        self.root.join("jobs").join(format!("{key}.json"))
    }

    fn report_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    /// Persists one job's terminal record. Written via a temp file and
    /// rename so readers never observe a half-written record.
    pub fn append_job_record(&self, record: &JobRecord) -> Result<(), BatchError> {
        let path = self.job_path(&record.key);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read_job_record(&self, key: &str) -> Result<Option<JobRecord>, BatchError> {
        let path = self.job_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Whether a prior invocation completed this fire successfully.
    /// Drives `skip_existing`.
    pub fn has_successful_output(&self, fire: &FireRecord) -> bool {
        matches!(
            self.read_job_record(&fire.key()),
            Ok(Some(record)) if record.state == JobState::Done
        )
    }

    pub fn write_report(&self, report: &AggregateReport) -> Result<(), BatchError> {
        let contents = serde_json::to_string_pretty(report)?;
        let tmp = self.report_path().with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, self.report_path())?;
        Ok(())
    }

    pub fn read_report(&self) -> Result<Option<AggregateReport>, BatchError> {
        let path = self.report_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Fire-specific folder for exported vectors and rasters.
    pub fn fire_output_dir(&self, fire: &FireRecord) -> PathBuf {
        self.root.join("fires").join(fire.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{ProcessingJob, RetryPolicy, StageOutcome, StateMachine};
    use tempfile::TempDir;

    fn fire(name: &str) -> FireRecord {
        FireRecord {
            name: name.into(),
            year: 2021,
            perimeter_present: true,
            severity_present: true,
            input_size_bytes: 1024,
        }
    }

    fn terminal_record(name: &str, state: JobState) -> JobRecord {
        let mut job = ProcessingJob::new(fire(name), RetryPolicy::default());
        match state {
            JobState::Done => {
                while !job.is_terminal() {
                    StateMachine::next(&mut job, StageOutcome::Success);
                }
            }
            JobState::Skipped => {
                StateMachine::skip(&mut job);
            }
            _ => {
                StateMachine::next(
                    &mut job,
                    StageOutcome::Failure(crate::error::StageError::InputData(
                        "missing perimeter".into(),
                    )),
                );
            }
        }
        JobRecord::from_job(&job)
    }

    #[test]
    fn job_record_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = JobStore::open(tmp.path()).unwrap();

        let record = terminal_record("caldor", JobState::Done);
        store.append_job_record(&record).unwrap();

        let restored = store.read_job_record("2021_caldor").unwrap().unwrap();
        assert_eq!(restored.state, JobState::Done);
        assert_eq!(restored.key, "2021_caldor");
    }

    #[test]
    fn missing_record_reads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = JobStore::open(tmp.path()).unwrap();
        assert!(store.read_job_record("2021_nothing").unwrap().is_none());
    }

    #[test]
    fn successful_output_requires_done_state() {
        let tmp = TempDir::new().unwrap();
        let store = JobStore::open(tmp.path()).unwrap();

        store
            .append_job_record(&terminal_record("caldor", JobState::Done))
            .unwrap();
        store
            .append_job_record(&terminal_record("dixie", JobState::Failed))
            .unwrap();

        assert!(store.has_successful_output(&fire("caldor")));
        assert!(!store.has_successful_output(&fire("dixie")));
        assert!(!store.has_successful_output(&fire("creek")));
    }

    #[test]
    fn records_for_different_fires_never_collide() {
        let tmp = TempDir::new().unwrap();
        let store = JobStore::open(tmp.path()).unwrap();

        store
            .append_job_record(&terminal_record("caldor", JobState::Done))
            .unwrap();
        store
            .append_job_record(&terminal_record("dixie", JobState::Done))
            .unwrap();

        assert!(store.read_job_record("2021_caldor").unwrap().is_some());
        assert!(store.read_job_record("2021_dixie").unwrap().is_some());
    }

    #[test]
    fn report_counts_final_states() {
        let records = vec![
            terminal_record("caldor", JobState::Done),
            terminal_record("dixie", JobState::Failed),
            terminal_record("creek", JobState::Skipped),
        ];
        let now = Utc::now();
        let report = AggregateReport::from_records(now, now, records);

        assert_eq!(report.done, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total(), 3);
        assert!(report.jobs.contains_key("2021_dixie"));
    }

    #[test]
    fn report_round_trips_through_store() {
        let tmp = TempDir::new().unwrap();
        let store = JobStore::open(tmp.path()).unwrap();

        let now = Utc::now();
        let report =
            AggregateReport::from_records(now, now, vec![terminal_record("caldor", JobState::Done)]);
        store.write_report(&report).unwrap();

        let restored = store.read_report().unwrap().unwrap();
        assert_eq!(restored.done, 1);
        assert_eq!(restored.total(), 1);
    }

    #[test]
    fn unwritable_store_root_is_fatal() {
        let result = JobStore::open("/proc/definitely/not/writable");
        assert!(result.is_err());
    }
}
