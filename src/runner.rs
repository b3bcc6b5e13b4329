//! Per-fire stage driver.
//!
//! [`FireRunner`] takes one [`ProcessingJob`] from INITIALIZED to a
//! terminal state, delegating the geospatial work to the injected
//! collaborators and feeding each stage outcome to the state machine. All
//! failures are recorded on the job; `run` itself never propagates them,
//! which is what keeps one fire's failure from touching the rest of the
//! batch.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::error::StageError;
use crate::memory::{MemoryProfiler, MemorySignal};
use crate::model::{AssessmentModel, DatasetClipper};
use crate::raster::{self, BasinFeature};
use crate::state_machine::{
    JobRecord, JobState, ProcessingJob, StageOutcome, StateMachine, Transition,
};

pub struct FireRunner {
    model: Arc<dyn AssessmentModel>,
    clipper: Arc<dyn DatasetClipper>,
    memory: Arc<dyn MemorySignal>,
    profiler: MemoryProfiler,
    timeout_seconds: u64,
    resolution_meters: f64,
    scenarios: Vec<String>,
    cancel: watch::Receiver<bool>,
}

impl FireRunner {
    pub fn new(
        model: Arc<dyn AssessmentModel>,
        clipper: Arc<dyn DatasetClipper>,
        memory: Arc<dyn MemorySignal>,
        config: &BatchConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            model,
            clipper,
            memory,
            profiler: MemoryProfiler::from_config(config),
            timeout_seconds: config.timeout_seconds,
            resolution_meters: config.resolution_meters,
            scenarios: config.scenarios.clone(),
            cancel,
        }
    }

    /// Drives the job to a terminal state and returns its durable record.
    ///
    /// Cancellation is honored at stage boundaries only, so an in-flight
    /// stage always finishes or fails cleanly and outputs are never left
    /// half-written.
    pub async fn run(&self, job: &mut ProcessingJob, output_dir: &Path) -> JobRecord {
        // The assessment result lives between the assess and export stages.
        let mut basins: Vec<BasinFeature> = Vec::new();
        // Chunking directive from the profiler, consumed by preprocessing.
        let mut chunk_hint: Option<u32> = None;

        while !job.is_terminal() {
            let outcome = if *self.cancel.borrow() {
                StageOutcome::Failure(StageError::Cancelled)
            } else {
                self.execute_stage(job, &mut basins, &mut chunk_hint, output_dir)
                    .await
            };

            match StateMachine::next(job, outcome) {
                Transition::Next(state) => {
                    debug!(fire = %job.fire.key(), state = %state, "stage complete");
                }
                Transition::Retry { reason, .. } => {
                    let delay_ms = job.retry_policy.delay_for_attempt(job.attempt_count);
                    warn!(
                        fire = %job.fire.key(),
                        attempt = job.attempt_count,
                        max = job.retry_policy.max_attempts,
                        %reason,
                        delay_ms,
                        "stage failed, retrying"
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                Transition::Complete(state) => {
                    if state == JobState::Failed
                        && let Some(err) = &job.error
                    {
                        warn!(fire = %job.fire.key(), error = %err, "job failed");
                    }
                }
            }
        }

        if job.state == JobState::Done {
            info!(fire = %job.fire.key(), "job done");
        }
        JobRecord::from_job(job)
    }

    async fn execute_stage(
        &self,
        job: &mut ProcessingJob,
        basins: &mut Vec<BasinFeature>,
        chunk_hint: &mut Option<u32>,
        output_dir: &Path,
    ) -> StageOutcome {
        match job.state {
            JobState::Initialized => self.initialize(job, chunk_hint),
            JobState::Preprocessing => self.preprocess(job, *chunk_hint).await,
            JobState::Assessing => self.assess(job, basins).await,
            JobState::Exporting => self.export(job, basins, output_dir).await,
            // Rest states between stages carry no work of their own.
            JobState::Preprocessed | JobState::Assessed => StageOutcome::Success,
            JobState::Done | JobState::Failed | JobState::Skipped => StageOutcome::Success,
        }
    }

    /// Verifies required inputs exist and fixes the optimization level
    /// from a fresh memory reading. The reading is taken here, per job,
    /// because available memory drifts over the batch's lifetime.
    fn initialize(&self, job: &mut ProcessingJob, chunk_hint: &mut Option<u32>) -> StageOutcome {
        if !job.fire.perimeter_present {
            return StageOutcome::Failure(StageError::InputData(format!(
                "no perimeter for {}",
                job.fire.key()
            )));
        }
        if !self.model.has_required_inputs(&job.fire) {
            return StageOutcome::Failure(StageError::InputData(format!(
                "required inputs missing for {}",
                job.fire.key()
            )));
        }

        let available = self.memory.current_available_memory_bytes();
        let directive = self.profiler.profile(job.fire.input_size_bytes, available);
        info!(
            fire = %job.fire.key(),
            input_mb = directive.input_size_mb,
            available_gb = directive.available_gb,
            level = %directive.level,
            chunked = directive.chunking_hint.is_some(),
            "profiled"
        );
        job.fix_optimization_level(directive.level);
        *chunk_hint = directive.chunking_hint;
        StageOutcome::Success
    }

    /// Clips shared datasets to the fire extent, in bounded chunks when
    /// the profiler demanded them.
    async fn preprocess(&self, job: &mut ProcessingJob, chunk_hint: Option<u32>) -> StageOutcome {
        let clipper = Arc::clone(&self.clipper);
        let fire = job.fire.clone();

        let started = Instant::now();
        let result = task::spawn_blocking(move || clipper.clip(&fire, chunk_hint)).await;
        job.record_timing("preprocess", started.elapsed().as_secs_f64());

        match result {
            Ok(Ok(())) => StageOutcome::Success,
            Ok(Err(err)) => StageOutcome::Failure(err),
            Err(join_err) => StageOutcome::Failure(StageError::Assessment {
                message: format!("preprocessing task panicked: {join_err}"),
                retryable: false,
            }),
        }
    }

    /// Runs the hazard computation under the configured wall-clock bound.
    async fn assess(&self, job: &mut ProcessingJob, basins: &mut Vec<BasinFeature>) -> StageOutcome {
        let model = Arc::clone(&self.model);
        let fire = job.fire.clone();
        let level = job
            .optimization_level
            .unwrap_or(crate::memory::OptimizationLevel::None);

        let started = Instant::now();
        let bound = Duration::from_secs(self.timeout_seconds);
        let result = timeout(bound, task::spawn_blocking(move || model.assess(&fire, level))).await;
        job.record_timing("assess", started.elapsed().as_secs_f64());

        match result {
            Ok(Ok(Ok(result_basins))) => {
                *basins = result_basins;
                StageOutcome::Success
            }
            Ok(Ok(Err(err))) => StageOutcome::Failure(err),
            Ok(Err(join_err)) => StageOutcome::Failure(StageError::Assessment {
                message: format!("assessment task panicked: {join_err}"),
                retryable: false,
            }),
            Err(_elapsed) => StageOutcome::Failure(StageError::Timeout {
                seconds: self.timeout_seconds,
            }),
        }
    }

    /// Writes the vector products, then renders one probability raster per
    /// scenario. Basins with invalid geometry are excluded from the
    /// rasters and recorded as warnings; they never fail the fire.
    async fn export(
        &self,
        job: &mut ProcessingJob,
        basins: &[BasinFeature],
        output_dir: &Path,
    ) -> StageOutcome {
        let model = Arc::clone(&self.model);
        let fire = job.fire.clone();
        let export_basins = basins.to_vec();
        let destination = output_dir.join("exports");

        let started = Instant::now();
        let result =
            task::spawn_blocking(move || model.export(&fire, &export_basins, &destination)).await;
        job.record_timing("export", started.elapsed().as_secs_f64());

        let paths = match result {
            Ok(Ok(paths)) => paths,
            Ok(Err(err)) => return StageOutcome::Failure(err),
            Err(join_err) => {
                return StageOutcome::Failure(StageError::Assessment {
                    message: format!("export task panicked: {join_err}"),
                    retryable: false,
                });
            }
        };
        for (product, path) in &paths {
            job.record_output(product, path);
        }

        self.rasterize_outputs(job, basins, output_dir)
    }

    fn rasterize_outputs(
        &self,
        job: &mut ProcessingJob,
        basins: &[BasinFeature],
        output_dir: &Path,
    ) -> StageOutcome {
        let started = Instant::now();
        let rendered = match raster::rasterize(basins, &self.scenarios, self.resolution_meters) {
            Ok(rendered) => rendered,
            Err(err) => {
                return StageOutcome::Failure(StageError::InputData(err.to_string()));
            }
        };

        for excluded in &rendered.excluded {
            warn!(fire = %job.fire.key(), %excluded, "basin excluded from rasterization");
            job.warnings.push(excluded.to_string());
        }

        let raster_dir = output_dir.join("rasters");
        if let Err(e) = std::fs::create_dir_all(&raster_dir) {
            return StageOutcome::Failure(StageError::Assessment {
                message: format!("cannot create raster folder: {e}"),
                retryable: false,
            });
        }

        for (scenario, output) in &rendered.rasters {
            if output.empty {
                warn!(fire = %job.fire.key(), scenario = %scenario, "no valid basins, raster is all no-data");
            }
            let path = raster_dir.join(format!("{}_{scenario}.asc", job.fire.key()));
            if let Err(e) = raster::write_ascii_grid(output, &path) {
                return StageOutcome::Failure(StageError::Assessment {
                    message: format!("cannot write raster {scenario}: {e}"),
                    retryable: false,
                });
            }
            job.record_output(&format!("raster_{scenario}"), &path.display().to_string());
        }
        job.record_timing("rasterize", started.elapsed().as_secs_f64());

        StageOutcome::Success
    }
}
