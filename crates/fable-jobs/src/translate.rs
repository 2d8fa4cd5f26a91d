//! Whole-manuscript translation
//!
//! Translation is the archetypal resumable job: one completion call per
//! unit, each output persisted before the progress counter moves, so a
//! resume re-derives the remaining work from the store instead of trusting
//! the counter. A unit that fails outright is skipped and reported; the job
//! still completes.

use crate::events::ProgressEvent;
use fable_core::{unit_order, Chapter, FableError, Job, Result, UsageMeter};
use fable_gateway::{
    complete_cancellable, CancelToken, CompletionBackend, CompletionRequest, SamplingConfig,
};
use fable_store::RecordStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const TRANSLATION_SYSTEM: &str = "You are a literary translator. Translate the unit \
faithfully, preserving register, names and formatting. Return only the translated text.";

/// Work split derived from persisted unit outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    /// Units with a persisted output, in narrative order
    pub already_done: Vec<i32>,
    /// Units still to process, in narrative order
    pub remaining: Vec<i32>,
}

/// Split the manuscript into done and remaining units
///
/// Pure over the persisted outputs: the plan never re-processes a unit whose
/// output survived the previous run, whatever the stored progress counter
/// said when the job froze.
pub fn plan_resume(chapters: &[Chapter], outputs: &BTreeMap<i32, String>) -> ResumePlan {
    let mut numbers: Vec<i32> = chapters.iter().map(|c| c.number).collect();
    numbers.sort_by_key(|n| unit_order(*n));

    let (already_done, remaining): (Vec<i32>, Vec<i32>) = numbers
        .into_iter()
        .partition(|n| outputs.contains_key(n));
    ResumePlan {
        already_done,
        remaining,
    }
}

/// Translates every unit of a project into a target locale
pub struct TranslationJob<S> {
    store: S,
    backend: Arc<dyn CompletionBackend>,
    sampling: SamplingConfig,
    target_locale: String,
}

impl<S: RecordStore> TranslationJob<S> {
    pub fn new(
        store: S,
        backend: Arc<dyn CompletionBackend>,
        sampling: SamplingConfig,
        target_locale: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backend,
            sampling,
            target_locale: target_locale.into(),
        }
    }

    /// Run (or resume) the translation, mutating the job's progress in place
    ///
    /// Returns the result reference on completion. Cancellation surfaces as
    /// `FableError::Cancelled` with the job left running; the stale heartbeat
    /// makes it frozen, hence resumable.
    pub async fn run(
        &self,
        job: &mut Job,
        events: &broadcast::Sender<ProgressEvent>,
        cancel: &CancelToken,
    ) -> Result<String> {
        let mut chapters = self.store.list_chapters(job.project_id).await?;
        chapters.sort_by_key(|c| unit_order(c.number));
        let outputs = self.store.list_unit_outputs(job.id).await?;
        let plan = plan_resume(&chapters, &outputs);

        if !plan.already_done.is_empty() {
            tracing::info!(
                job = %job.id,
                done = plan.already_done.len(),
                remaining = plan.remaining.len(),
                "Resuming translation from persisted outputs"
            );
        }

        let total = chapters.len();
        job.progress.current = plan.already_done.len();
        job.progress.total = total;
        job.beat();
        self.store.upsert_job(job).await?;
        let _ = events.send(ProgressEvent::Started {
            job_id: job.id,
            total,
        });

        let mut meter = self
            .store
            .get_usage(job.project_id)
            .await?
            .unwrap_or_else(|| UsageMeter::new(job.project_id));

        for unit in plan.remaining {
            let chapter = chapters
                .iter()
                .find(|c| c.number == unit)
                .ok_or_else(|| FableError::Job(format!("unit {} disappeared mid-job", unit)))?;

            let request = CompletionRequest::new(self.sampling.clone())
                .with_system(TRANSLATION_SYSTEM)
                .with_user(build_translation_prompt(chapter, &self.target_locale));

            match complete_cancellable(self.backend.as_ref(), &request, cancel).await {
                Ok(response) => {
                    meter.fold(response.usage);
                    // Output lands before the counter moves; a crash between
                    // the two only costs a redundant progress event on resume
                    self.store
                        .put_unit_output(job.id, unit, response.text.trim())
                        .await?;
                    job.progress.current += 1;
                    job.beat();
                    self.store.upsert_job(job).await?;
                    self.store.save_usage(&meter).await?;
                    let _ = events.send(ProgressEvent::Progress {
                        job_id: job.id,
                        unit,
                        current: job.progress.current,
                        total,
                    });
                }
                Err(FableError::Cancelled) => return Err(FableError::Cancelled),
                Err(e) => {
                    tracing::warn!(job = %job.id, unit, error = %e, "Unit failed, skipping");
                    job.skipped_units.push(unit);
                    job.beat();
                    self.store.upsert_job(job).await?;
                    let _ = events.send(ProgressEvent::UnitSkipped {
                        job_id: job.id,
                        unit,
                        message: e.to_string(),
                    });
                }
            }
        }

        if !job.skipped_units.is_empty() {
            tracing::warn!(
                job = %job.id,
                skipped = ?job.skipped_units,
                "Translation completed with skipped units"
            );
        }
        Ok(format!("unit_outputs/{}", job.id))
    }
}

fn build_translation_prompt(chapter: &Chapter, target_locale: &str) -> String {
    format!(
        "Translate the following unit into \"{}\".\n\n# UNIT {}: {}\n\n{}\n",
        target_locale, chapter.number, chapter.title, chapter.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fable_core::{JobKind, JobStatus, TokenUsage};
    use fable_gateway::CompletionResponse;
    use fable_store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct ScriptedBackend {
        responses: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| FableError::Gateway("script exhausted".to_string()))?;
            Ok(CompletionResponse {
                text,
                usage: TokenUsage::default(),
            })
        }
    }

    fn sampling() -> SamplingConfig {
        SamplingConfig {
            model: "test".to_string(),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    fn manuscript(project_id: Uuid, units: i32) -> Vec<Chapter> {
        (1..=units)
            .map(|n| {
                let mut c = Chapter::new(project_id, n, format!("Chapter {}", n));
                c.set_content(format!("Prose of chapter {}.", n));
                c
            })
            .collect()
    }

    #[test]
    fn test_plan_resume_splits_on_persisted_outputs() {
        let project_id = Uuid::new_v4();
        let chapters = manuscript(project_id, 20);
        let outputs: BTreeMap<i32, String> =
            (1..=12).map(|n| (n, format!("out {}", n))).collect();

        let plan = plan_resume(&chapters, &outputs);
        assert_eq!(plan.already_done.len(), 12);
        assert_eq!(plan.remaining.len(), 8);
        assert_eq!(plan.remaining, (13..=20).collect::<Vec<i32>>());
    }

    #[test]
    fn test_plan_resume_orders_narratively() {
        let project_id = Uuid::new_v4();
        // Prologue (0), two chapters, epilogue (998)
        let chapters = vec![
            Chapter::new(project_id, 998, "Epilogue"),
            Chapter::new(project_id, 2, "Two"),
            Chapter::new(project_id, 0, "Prologue"),
            Chapter::new(project_id, 1, "One"),
        ];
        let plan = plan_resume(&chapters, &BTreeMap::new());
        assert_eq!(plan.remaining, vec![0, 1, 2, 998]);
    }

    #[tokio::test]
    async fn test_resume_skips_persisted_units() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        for chapter in manuscript(project_id, 4) {
            store.upsert_chapter(&chapter).await.unwrap();
        }

        let mut job = Job::new(
            project_id,
            JobKind::Translation {
                target_locale: "fr".to_string(),
            },
        );
        job.status = JobStatus::Running;
        store.upsert_job(&job).await.unwrap();
        store.put_unit_output(job.id, 1, "Chapitre un").await.unwrap();
        store.put_unit_output(job.id, 2, "Chapitre deux").await.unwrap();

        let backend = ScriptedBackend::new(vec!["Chapitre trois", "Chapitre quatre"]);
        let translator = TranslationJob::new(store.clone(), backend.clone(), sampling(), "fr");
        let (events, _rx) = broadcast::channel(16);

        let result_ref = translator
            .run(&mut job, &events, &CancelToken::never())
            .await
            .unwrap();

        // Only the two missing units hit the backend
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(job.progress.current, 4);
        assert_eq!(result_ref, format!("unit_outputs/{}", job.id));

        let outputs = store.list_unit_outputs(job.id).await.unwrap();
        assert_eq!(outputs.len(), 4);
        assert_eq!(outputs[&1], "Chapitre un");
        assert_eq!(outputs[&3], "Chapitre trois");
    }

    #[tokio::test]
    async fn test_failed_unit_is_skipped_and_job_finishes() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        for chapter in manuscript(project_id, 3) {
            store.upsert_chapter(&chapter).await.unwrap();
        }

        let mut job = Job::new(
            project_id,
            JobKind::Translation {
                target_locale: "de".to_string(),
            },
        );
        store.upsert_job(&job).await.unwrap();

        // Two responses for three units: the last call fails hard
        let backend = ScriptedBackend::new(vec!["Kapitel eins", "Kapitel zwei"]);
        let translator = TranslationJob::new(store.clone(), backend, sampling(), "de");
        let (events, mut rx) = broadcast::channel(16);

        translator
            .run(&mut job, &events, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(job.skipped_units, vec![3]);
        assert_eq!(job.progress.current, 2);

        let mut saw_skip = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ProgressEvent::UnitSkipped { unit: 3, .. }) {
                saw_skip = true;
            }
        }
        assert!(saw_skip);
    }

    #[tokio::test]
    async fn test_cancellation_preserves_partial_output() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        for chapter in manuscript(project_id, 3) {
            store.upsert_chapter(&chapter).await.unwrap();
        }

        let mut job = Job::new(
            project_id,
            JobKind::Translation {
                target_locale: "fr".to_string(),
            },
        );
        job.status = JobStatus::Running;
        store.upsert_job(&job).await.unwrap();

        let backend = ScriptedBackend::new(vec!["Chapitre un"]);
        let translator = TranslationJob::new(store.clone(), backend, sampling(), "fr");
        let (events, _rx) = broadcast::channel(16);

        let (handle, token) = CancelToken::pair();
        handle.cancel();
        // Cancel is checked before each completion call
        let result = translator.run(&mut job, &events, &token).await;
        assert!(matches!(result, Err(FableError::Cancelled)));

        // Status untouched: still running, resumable once the heartbeat goes
        // stale
        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Running);
    }
}
