//! Batch orchestration across fires.
//!
//! [`BatchOrchestrator::run`] schedules one [`FireRunner`] per fire under a
//! semaphore-bounded task pool. Jobs share nothing but the append-only job
//! store; a fire that fails is recorded and the loop moves on, so a single
//! bad fire can never abort the batch. The orchestrator itself fails only
//! on conditions outside any one fire's scope, such as an unreachable
//! store.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::catalog::FireRecord;
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::memory::MemorySignal;
use crate::model::{AssessmentModel, DatasetClipper};
use crate::runner::FireRunner;
use crate::state_machine::{JobRecord, ProcessingJob, RetryPolicy, StateMachine};
use crate::store::{AggregateReport, JobStore};
use crate::ui::BatchProgress;

pub struct BatchOrchestrator {
    model: Arc<dyn AssessmentModel>,
    clipper: Arc<dyn DatasetClipper>,
    memory: Arc<dyn MemorySignal>,
    store: Arc<JobStore>,
    config: BatchConfig,
    cancel: watch::Receiver<bool>,
}

impl BatchOrchestrator {
    pub fn new(
        model: Arc<dyn AssessmentModel>,
        clipper: Arc<dyn DatasetClipper>,
        memory: Arc<dyn MemorySignal>,
        store: Arc<JobStore>,
        config: BatchConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            model,
            clipper,
            memory,
            store,
            config,
            cancel,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.max_attempts,
            base_delay_ms: self.config.base_delay_ms,
        }
    }

    /// Processes the given fires, at most `concurrency_limit` at a time,
    /// and returns the aggregate report.
    ///
    /// With `skip_existing`, fires already recorded as successful are
    /// reported as SKIPPED without touching the assessment model. Every
    /// submitted fire ends in exactly one terminal record; completion
    /// order is irrelevant because the report is keyed by fire identity.
    pub async fn run(
        &self,
        fires: Vec<FireRecord>,
        skip_existing: bool,
        progress: Option<&BatchProgress>,
    ) -> Result<AggregateReport, BatchError> {
        let started_at = Utc::now();
        let total = fires.len();
        info!(fires = total, concurrency = self.config.concurrency_limit, "batch started");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let mut join_set: JoinSet<JobRecord> = JoinSet::new();
        let mut records: Vec<JobRecord> = Vec::new();

        for fire in fires {
            if skip_existing && self.store.has_successful_output(&fire) {
                let mut job = ProcessingJob::new(fire, self.retry_policy());
                StateMachine::skip(&mut job);
                let record = JobRecord::from_job(&job);
                info!(fire = %record.key, "skipped, already processed");
                self.store.append_job_record(&record)?;
                if let Some(progress) = progress {
                    progress.job_finished(&record);
                }
                records.push(record);
                continue;
            }

            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let runner = FireRunner::new(
                Arc::clone(&self.model),
                Arc::clone(&self.clipper),
                Arc::clone(&self.memory),
                &self.config,
                self.cancel.clone(),
            );
            let output_dir = self.store.fire_output_dir(&fire);
            let policy = self.retry_policy();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("batch semaphore closed");
                let mut job = ProcessingJob::new(fire, policy);
                let record = runner.run(&mut job, &output_dir).await;
                // Each job writes only its own key. A persistence hiccup
                // must not take the batch down; the record still reaches
                // the report through the join handle.
                if let Err(e) = store.append_job_record(&record) {
                    error!(fire = %record.key, error = %e, "failed to persist job record");
                }
                record
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(record) => {
                    if let Some(progress) = progress {
                        progress.job_finished(&record);
                    }
                    records.push(record);
                }
                Err(join_err) => error!(%join_err, "job task panicked"),
            }
        }

        let report = AggregateReport::from_records(started_at, Utc::now(), records);
        self.store.write_report(&report)?;
        info!(
            done = report.done,
            failed = report.failed,
            skipped = report.skipped,
            "batch finished"
        );
        Ok(report)
    }
}
