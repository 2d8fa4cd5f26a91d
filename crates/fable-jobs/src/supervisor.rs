//! Job supervisor
//!
//! Owns job lifecycle: spawning workers, heartbeating, deriving frozen
//! status and gating resumes. Progress flows over a broadcast channel per
//! job, so any number of observers can attach and detach without touching
//! the worker.

use crate::events::ProgressEvent;
use crate::translate::TranslationJob;
use fable_core::{
    unit_order, FableConfig, FableError, Job, JobKind, JobStatus, Result, UsageMeter,
};
use fable_gateway::{CancelHandle, CancelToken, CompletionBackend, SamplingConfig};
use fable_ledger::Ledger;
use fable_pipeline::{RevisionOrchestrator, TrancheReviewer};
use fable_store::RecordStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// A started (or resumed) job as seen by its launcher
pub struct JobHandle {
    pub job_id: Uuid,
    pub events: broadcast::Receiver<ProgressEvent>,
    pub cancel: CancelHandle,
}

/// Job record plus the derived frozen flag
#[derive(Debug, Clone)]
pub struct JobView {
    pub job: Job,
    pub frozen: bool,
}

/// Spawns and tracks job workers for one store/backend pair
pub struct JobSupervisor<S: RecordStore + Clone + 'static> {
    store: S,
    backend: Arc<dyn CompletionBackend>,
    config: FableConfig,
    channels: Mutex<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
}

impl<S: RecordStore + Clone + 'static> JobSupervisor<S> {
    pub fn new(store: S, backend: Arc<dyn CompletionBackend>, config: FableConfig) -> Self {
        Self {
            store,
            backend,
            config,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Start a new job of the given kind
    pub async fn start(&self, project_id: Uuid, kind: JobKind) -> Result<JobHandle> {
        let job = Job::new(project_id, kind);
        self.store.upsert_job(&job).await?;
        Ok(self.launch(job))
    }

    /// Resume a pending or frozen job
    ///
    /// Errored and completed jobs are not resumable; neither is a running
    /// job with a live heartbeat (something is still working on it).
    pub async fn resume(&self, job_id: Uuid) -> Result<JobHandle> {
        let job = self.store.get_job(job_id).await?;
        let resumable = job.status == JobStatus::Pending
            || job.is_frozen(self.config.jobs.heartbeat_timeout_secs);
        if !resumable {
            return Err(FableError::JobNotResumable(
                job_id.to_string(),
                job.status.to_string(),
            ));
        }
        tracing::info!(job = %job_id, status = %job.status, "Resuming job");
        Ok(self.launch(job))
    }

    /// Current job record with the frozen flag derived
    pub async fn status(&self, job_id: Uuid) -> Result<JobView> {
        let job = self.store.get_job(job_id).await?;
        let frozen = job.is_frozen(self.config.jobs.heartbeat_timeout_secs);
        Ok(JobView { job, frozen })
    }

    /// Attach to a job's progress stream, if its worker is alive in this
    /// process
    pub fn subscribe(&self, job_id: Uuid) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.channels
            .lock()
            .ok()?
            .get(&job_id)
            .map(|tx| tx.subscribe())
    }

    fn launch(&self, job: Job) -> JobHandle {
        let (events, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        if let Ok(mut channels) = self.channels.lock() {
            channels.insert(job.id, events.clone());
        }
        let (cancel_handle, cancel) = CancelToken::pair();

        let store = self.store.clone();
        let backend = self.backend.clone();
        let config = self.config.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            run_job(store, backend, config, job, events, cancel).await;
        });

        JobHandle {
            job_id,
            events: receiver,
            cancel: cancel_handle,
        }
    }
}

/// Worker body shared by all job kinds
async fn run_job<S: RecordStore + Clone + 'static>(
    store: S,
    backend: Arc<dyn CompletionBackend>,
    config: FableConfig,
    mut job: Job,
    events: broadcast::Sender<ProgressEvent>,
    cancel: CancelToken,
) {
    job.status = JobStatus::Running;
    job.beat();
    if let Err(e) = store.upsert_job(&job).await {
        tracing::error!(job = %job.id, error = %e, "Failed to mark job running");
        return;
    }

    let beater = spawn_heartbeat(store.clone(), job.id);
    let outcome = dispatch(&store, backend, &config, &mut job, &events, &cancel).await;
    beater.abort();

    match outcome {
        Ok(result_ref) => {
            job.status = JobStatus::Completed;
            job.result_ref = result_ref;
            job.beat();
            if let Err(e) = store.upsert_job(&job).await {
                tracing::error!(job = %job.id, error = %e, "Failed to persist completion");
            }
            let _ = events.send(ProgressEvent::Completed {
                job_id: job.id,
                skipped_units: job.skipped_units.clone(),
            });
        }
        // A cancelled job keeps its Running status on purpose: once the
        // heartbeat goes stale it reads as frozen, hence resumable
        Err(FableError::Cancelled) => {
            tracing::info!(job = %job.id, "Job cancelled, leaving it resumable");
        }
        Err(e) => {
            tracing::error!(job = %job.id, error = %e, "Job failed");
            job.status = JobStatus::Error;
            job.error = Some(e.to_string());
            job.beat();
            if let Err(e) = store.upsert_job(&job).await {
                tracing::error!(job = %job.id, error = %e, "Failed to persist job error");
            }
            let _ = events.send(ProgressEvent::Failed {
                job_id: job.id,
                message: job.error.clone().unwrap_or_default(),
            });
        }
    }
}

async fn dispatch<S: RecordStore + Clone + 'static>(
    store: &S,
    backend: Arc<dyn CompletionBackend>,
    config: &FableConfig,
    job: &mut Job,
    events: &broadcast::Sender<ProgressEvent>,
    cancel: &CancelToken,
) -> Result<Option<String>> {
    let sampling = SamplingConfig::from(&config.model);
    match job.kind.clone() {
        JobKind::Generation => {
            let chapters = store.list_chapters(job.project_id).await?;
            job.progress.total = chapters.len();
            store.upsert_job(job).await?;
            let _ = events.send(ProgressEvent::Started {
                job_id: job.id,
                total: chapters.len(),
            });

            let orchestrator =
                RevisionOrchestrator::new(store.clone(), backend, config.clone());
            let report = orchestrator.run(job.project_id, cancel).await?;
            job.progress.current = job.progress.total;
            tracing::info!(
                job = %job.id,
                chapters = report.chapters_completed,
                forced = report.forced_approvals.len(),
                "Generation run finished"
            );
            Ok(None)
        }
        JobKind::Review => {
            let mut chapters = store.list_chapters(job.project_id).await?;
            chapters.sort_by_key(|c| unit_order(c.number));
            job.progress.total = chapters.len();
            store.upsert_job(job).await?;
            let _ = events.send(ProgressEvent::Started {
                job_id: job.id,
                total: chapters.len(),
            });

            let ledger = Ledger::new(store.clone(), backend.clone(), sampling.clone());
            // Author's-note slot sorts last, so the brief carries every rule
            let brief = ledger.constraints(job.project_id, 999).await?;

            let reviewer = TrancheReviewer::new(backend, sampling, config.review.clone());
            let mut meter = store
                .get_usage(job.project_id)
                .await?
                .unwrap_or_else(|| UsageMeter::new(job.project_id));
            let verdict = reviewer
                .review_pass(&chapters, &brief, &[], 1, &mut meter, cancel)
                .await?;
            store.save_usage(&meter).await?;

            // The verdict is the job's output; store it under the job's key
            let rendered = serde_json::to_string(&verdict)?;
            store.put_unit_output(job.id, 0, &rendered).await?;
            job.progress.current = chapters.len();
            Ok(Some(format!("unit_outputs/{}/0", job.id)))
        }
        JobKind::Translation { target_locale } => {
            let translator =
                TranslationJob::new(store.clone(), backend, sampling, target_locale);
            let result_ref = translator.run(job, events, cancel).await?;
            Ok(Some(result_ref))
        }
    }
}

/// Beat the job's heartbeat until aborted or the job stops running
///
/// The write touches only the heartbeat timestamp, so it can never clobber
/// progress the worker persisted concurrently.
fn spawn_heartbeat<S: RecordStore + Clone + 'static>(
    store: S,
    job_id: Uuid,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            match store.beat_job(job_id).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(job = %job_id, error = %e, "Heartbeat write failed");
                }
            }
        }
    })
}
