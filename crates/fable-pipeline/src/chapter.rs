//! Chapter revision loop
//!
//! Drives one unit through generate -> structural edit -> approve/reject,
//! bounded by the retry budget. The loop soft-fails forward: when the budget
//! is exhausted the latest draft is force-approved with a warning rather
//! than deadlocking the whole run. A final polish step enforces locale
//! typography and is forbidden from shrinking the text.

use crate::steps::{editor_step, polish_step, writer_step, SurgicalPlan};
use fable_core::{Chapter, Result, RevisionConfig, UsageMeter};
use fable_gateway::{CancelToken, CompletionBackend, SamplingConfig};
use std::sync::Arc;

/// Output of one full revision loop over a unit
#[derive(Debug, Clone)]
pub struct ProducedChapter {
    pub content: String,
    /// End-of-unit continuity snapshot, the only state handed to the next unit
    pub continuity_state: Option<String>,
    pub approved: bool,
    /// Approval was forced by budget exhaustion, not earned
    pub forced: bool,
    /// Writer invocations consumed
    pub attempts: u32,
}

/// The generate/edit/polish loop for a single unit
pub struct ChapterLoop {
    backend: Arc<dyn CompletionBackend>,
    sampling: SamplingConfig,
    config: RevisionConfig,
    locale: String,
}

impl ChapterLoop {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        sampling: SamplingConfig,
        config: RevisionConfig,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            sampling,
            config,
            locale: locale.into(),
        }
    }

    /// Produce an approved, polished draft for the unit
    ///
    /// Each attempt writes a fresh draft carrying forward the editor's
    /// surgical plan from the previous rejection. The retry budget bounds
    /// writer invocations; exhausting it force-approves the last draft.
    pub async fn produce(
        &self,
        chapter: &Chapter,
        world_brief: &str,
        prior_continuity: Option<&str>,
        meter: &mut UsageMeter,
        cancel: &CancelToken,
    ) -> Result<ProducedChapter> {
        let mut surgical: Option<SurgicalPlan> = None;
        let mut draft = String::new();
        let mut continuity = None;
        let mut approved = false;
        let mut attempts = 0;

        for attempt in 1..=self.config.retry_budget {
            attempts = attempt;

            let (output, usage) = writer_step(
                self.backend.as_ref(),
                &self.sampling,
                chapter,
                world_brief,
                prior_continuity,
                surgical.as_ref(),
                cancel,
            )
            .await?;
            meter.fold(usage);
            draft = output.content;
            continuity = output.continuity;

            let (verdict, usage) = editor_step(
                self.backend.as_ref(),
                &self.sampling,
                chapter,
                world_brief,
                &draft,
                self.config.approval_threshold,
                cancel,
            )
            .await?;
            meter.fold(usage);

            if verdict.score >= self.config.approval_threshold {
                tracing::info!(
                    unit = chapter.number,
                    attempt,
                    score = verdict.score,
                    "Draft approved"
                );
                approved = true;
                break;
            }

            tracing::info!(
                unit = chapter.number,
                attempt,
                score = verdict.score,
                "Draft rejected"
            );
            surgical = Some(verdict.surgical_plan.unwrap_or_default());
        }

        let forced = !approved;
        if forced {
            tracing::warn!(
                unit = chapter.number,
                attempts,
                "Retry budget exhausted, force-approving latest draft"
            );
        }

        let (polished, usage) = polish_step(
            self.backend.as_ref(),
            &self.sampling,
            &draft,
            &self.locale,
            cancel,
        )
        .await?;
        meter.fold(usage);

        Ok(ProducedChapter {
            content: polished,
            continuity_state: continuity,
            approved: true,
            forced,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sampling, ScriptedBackend};
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn chapter() -> Chapter {
        Chapter::new(Uuid::new_v4(), 1, "Opening").with_plan("Introduce the mill")
    }

    fn meter() -> UsageMeter {
        UsageMeter::new(Uuid::new_v4())
    }

    const DRAFT: &str = "The mill stood silent.\n\n<continuity>\nIrena: at the mill\n</continuity>";

    #[tokio::test]
    async fn test_first_draft_approved() {
        let backend = ScriptedBackend::new(vec![
            DRAFT,
            r#"{"score": 9.0}"#,
            "The mill stood silent, and silent it stayed.",
        ]);
        let looper = ChapterLoop::new(
            backend.clone(),
            sampling(),
            RevisionConfig::default(),
            "en",
        );

        let mut meter = meter();
        let produced = looper
            .produce(&chapter(), "brief", None, &mut meter, &CancelToken::never())
            .await
            .unwrap();

        assert!(produced.approved);
        assert!(!produced.forced);
        assert_eq!(produced.attempts, 1);
        assert_eq!(produced.continuity_state.as_deref(), Some("Irena: at the mill"));
        // writer + editor + polish
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(meter.steps, 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_forces_approval() {
        let reject = r#"{"score": 4.0, "surgical_plan": {"diagnosis": "flat", "procedure": "raise stakes", "target_outcome": "tension"}}"#;
        let backend = ScriptedBackend::new(vec![
            DRAFT, reject, DRAFT, reject, DRAFT, reject,
            "The mill stood silent, and silent it stayed.",
        ]);
        let looper = ChapterLoop::new(
            backend.clone(),
            sampling(),
            RevisionConfig::default(),
            "en",
        );

        let mut meter = meter();
        let produced = looper
            .produce(&chapter(), "brief", None, &mut meter, &CancelToken::never())
            .await
            .unwrap();

        // Budget of 3 means exactly 3 writer invocations, then forced approval
        assert!(produced.approved);
        assert!(produced.forced);
        assert_eq!(produced.attempts, 3);
        // 3 writers + 3 editors + 1 polish
        assert_eq!(backend.calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_polish_never_shrinks() {
        let backend = ScriptedBackend::new(vec![DRAFT, r#"{"score": 8.0}"#, "Short."]);
        let looper = ChapterLoop::new(backend, sampling(), RevisionConfig::default(), "fr");

        let mut meter = meter();
        let produced = looper
            .produce(&chapter(), "brief", None, &mut meter, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(produced.content, "The mill stood silent.");
    }

    #[tokio::test]
    async fn test_unparseable_editor_reply_approves_at_threshold() {
        let backend = ScriptedBackend::new(vec![
            DRAFT,
            "I think it's fine but I forgot the format.",
            "The mill stood silent, and silent it stayed.",
        ]);
        let looper = ChapterLoop::new(
            backend.clone(),
            sampling(),
            RevisionConfig::default(),
            "en",
        );

        let produced = looper
            .produce(&chapter(), "brief", None, &mut meter(), &CancelToken::never())
            .await
            .unwrap();

        assert!(produced.approved);
        assert!(!produced.forced);
        assert_eq!(produced.attempts, 1);
    }
}
