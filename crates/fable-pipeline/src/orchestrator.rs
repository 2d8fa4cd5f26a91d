//! Revision orchestrator
//!
//! Sequences a whole manuscript run: chapters are produced in narrative
//! order with the world-model brief injected before each one and the unit
//! validated against the ledger after. Every N completed chapters a
//! consistency checkpoint reviews the recent window, and the run ends with
//! the multi-pass full-manuscript review, rewriting flagged units between
//! passes.
//!
//! The continuity snapshot handed from one unit to the next is the only
//! generation state that crosses a unit boundary; everything else flows
//! through the store and the ledger.

use crate::chapter::ChapterLoop;
use crate::prompt::summarize_issues;
use crate::review::TrancheReviewer;
use crate::steps::SurgicalPlan;
use fable_core::{
    unit_order, Chapter, ChapterStatus, FableConfig, Issue, Result, TokenUsage, UsageMeter,
    Verdict,
};
use fable_gateway::{CancelToken, CompletionBackend, SamplingConfig};
use fable_ledger::Ledger;
use fable_store::RecordStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Summary of one orchestrated run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub chapters_completed: usize,
    /// Units whose approval was forced by retry-budget exhaustion
    pub forced_approvals: Vec<i32>,
    /// Units rewritten after a blocking consistency validation
    pub corrective_cycles: u32,
    pub checkpoints_run: u32,
    pub review_passes: u32,
    pub final_verdict: Option<Verdict>,
    pub usage: TokenUsage,
}

/// Drives generation, validation, checkpoints and final review for a project
pub struct RevisionOrchestrator<S: RecordStore + Clone> {
    store: S,
    backend: Arc<dyn CompletionBackend>,
    sampling: SamplingConfig,
    config: FableConfig,
    ledger: Ledger<S>,
}

impl<S: RecordStore + Clone> RevisionOrchestrator<S> {
    pub fn new(store: S, backend: Arc<dyn CompletionBackend>, config: FableConfig) -> Self {
        let sampling = SamplingConfig::from(&config.model);
        let ledger = Ledger::new(store.clone(), backend.clone(), sampling.clone());
        Self {
            store,
            backend,
            sampling,
            config,
            ledger,
        }
    }

    /// Run the full pipeline for a project
    pub async fn run(&self, project_id: Uuid, cancel: &CancelToken) -> Result<RunReport> {
        let project = self.store.get_project(project_id).await?;
        let looper = ChapterLoop::new(
            self.backend.clone(),
            self.sampling.clone(),
            self.config.revision.clone(),
            &project.locale,
        );

        let mut chapters = self.store.list_chapters(project_id).await?;
        chapters.sort_by_key(|c| unit_order(c.number));

        let mut meter = self
            .store
            .get_usage(project_id)
            .await?
            .unwrap_or_else(|| UsageMeter::new(project_id));
        let mut report = RunReport::default();
        let mut prior_continuity: Option<String> = None;
        let mut since_checkpoint = 0usize;

        for index in 0..chapters.len() {
            let mut chapter = chapters[index].clone();

            // Already-completed units are resume state, not work
            if chapter.status == ChapterStatus::Completed {
                prior_continuity = chapter.continuity_state.clone();
                continue;
            }

            tracing::info!(unit = chapter.number, title = %chapter.title, "Producing unit");
            // Stage transitions are persisted, so a crash mid-unit leaves the
            // interrupted stage visible to the next run
            chapter.status = ChapterStatus::Writing;
            self.store.upsert_chapter(&chapter).await?;
            let brief = self.ledger.constraints(project_id, chapter.number).await?;
            let produced = looper
                .produce(&chapter, &brief, prior_continuity.as_deref(), &mut meter, cancel)
                .await?;
            if produced.forced {
                report.forced_approvals.push(chapter.number);
            }
            chapter.set_content(produced.content);
            chapter.continuity_state = produced.continuity_state;
            chapter.status = ChapterStatus::Editing;
            self.store.upsert_chapter(&chapter).await?;

            let (outcome, usage) = self
                .ledger
                .validate(&chapter.content, project_id, chapter.number, cancel)
                .await?;
            meter.fold(usage);

            if !outcome.is_valid {
                // One corrective cycle, then move on either way
                report.corrective_cycles += 1;
                let correction = outcome
                    .correction_instructions
                    .or(outcome.critical_error)
                    .unwrap_or_default();
                let plan = SurgicalPlan {
                    diagnosis: "Consistency validation rejected the unit".to_string(),
                    procedure: correction,
                    target_outcome: "A unit consistent with the world model".to_string(),
                };

                let mut corrective = chapter.clone();
                corrective.plan = format!(
                    "{}\n\n## Required corrections\n\n{}\n{}",
                    chapter.plan, plan.diagnosis, plan.procedure
                );
                // Back to writing for the corrective draft
                chapter.status = ChapterStatus::Writing;
                self.store.upsert_chapter(&chapter).await?;
                let produced = looper
                    .produce(&corrective, &brief, prior_continuity.as_deref(), &mut meter, cancel)
                    .await?;
                chapter.set_content(produced.content);
                chapter.continuity_state = produced.continuity_state;
                chapter.status = ChapterStatus::Editing;
                self.store.upsert_chapter(&chapter).await?;

                let (retry_outcome, usage) = self
                    .ledger
                    .validate(&chapter.content, project_id, chapter.number, cancel)
                    .await?;
                meter.fold(usage);
                if !retry_outcome.is_valid {
                    tracing::warn!(
                        unit = chapter.number,
                        error = retry_outcome.critical_error.as_deref().unwrap_or(""),
                        "Unit still inconsistent after corrective cycle, accepting"
                    );
                }
            }

            chapter.status = ChapterStatus::Completed;
            self.store.upsert_chapter(&chapter).await?;
            self.store.save_usage(&meter).await?;
            prior_continuity = chapter.continuity_state.clone();
            chapters[index] = chapter;
            report.chapters_completed += 1;
            since_checkpoint += 1;

            if since_checkpoint >= self.config.revision.checkpoint_interval {
                since_checkpoint = 0;
                report.checkpoints_run += 1;
                self.checkpoint(project_id, &chapters[..=index], &looper, &mut meter, cancel)
                    .await?;
            }
        }

        self.final_review(project_id, &looper, &mut meter, cancel, &mut report)
            .await?;

        self.store.save_usage(&meter).await?;
        report.usage = meter.total;
        Ok(report)
    }

    /// Consistency checkpoint over the recent window of completed units
    async fn checkpoint(
        &self,
        project_id: Uuid,
        completed: &[Chapter],
        looper: &ChapterLoop,
        meter: &mut UsageMeter,
        cancel: &CancelToken,
    ) -> Result<()> {
        let window_start = completed
            .len()
            .saturating_sub(self.config.revision.checkpoint_window);
        let window = &completed[window_start..];
        tracing::info!(
            units = window.len(),
            "Running consistency checkpoint"
        );

        let reviewer = TrancheReviewer::new(
            self.backend.clone(),
            self.sampling.clone(),
            self.config.review.clone(),
        );
        let brief = self
            .ledger
            .constraints(project_id, window[window.len() - 1].number)
            .await?;
        let verdict = reviewer
            .review_pass(window, &brief, &[], 1, meter, cancel)
            .await?;

        if verdict.verdict == Verdict::RequiresRevision {
            let window_units: BTreeSet<i32> = window.iter().map(|c| c.number).collect();
            let targets: BTreeSet<i32> = verdict
                .units_to_rewrite
                .intersection(&window_units)
                .copied()
                .collect();
            self.rewrite_units(project_id, &targets, &verdict.issues, looper, meter, cancel)
                .await?;
        }
        Ok(())
    }

    /// Multi-pass full-manuscript review with rewrite cycles between passes
    async fn final_review(
        &self,
        project_id: Uuid,
        looper: &ChapterLoop,
        meter: &mut UsageMeter,
        cancel: &CancelToken,
        report: &mut RunReport,
    ) -> Result<()> {
        let reviewer = TrancheReviewer::new(
            self.backend.clone(),
            self.sampling.clone(),
            self.config.review.clone(),
        );
        let mut already_fixed: Vec<Issue> = Vec::new();

        for pass in 1..=self.config.review.max_passes {
            let mut chapters = self.store.list_chapters(project_id).await?;
            chapters.sort_by_key(|c| unit_order(c.number));
            // Author's-note slot sorts after every other unit, so the brief
            // carries every active rule
            let brief = self.ledger.constraints(project_id, 999).await?;

            tracing::info!(pass, "Starting review pass");
            let verdict = reviewer
                .review_pass(&chapters, &brief, &already_fixed, pass, meter, cancel)
                .await?;
            report.review_passes = pass;
            report.final_verdict = Some(verdict.verdict);
            self.store.save_usage(meter).await?;

            if verdict.verdict != Verdict::RequiresRevision {
                tracing::info!(pass, verdict = %verdict.verdict, score = verdict.score, "Review settled");
                return Ok(());
            }

            self.rewrite_units(
                project_id,
                &verdict.units_to_rewrite,
                &verdict.issues,
                looper,
                meter,
                cancel,
            )
            .await?;
            already_fixed.extend(verdict.issues);
        }
        Ok(())
    }

    /// Rewrite the flagged units, carrying the relevant findings into the plan
    async fn rewrite_units(
        &self,
        project_id: Uuid,
        units: &BTreeSet<i32>,
        issues: &[Issue],
        looper: &ChapterLoop,
        meter: &mut UsageMeter,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut chapters = self.store.list_chapters(project_id).await?;
        chapters.sort_by_key(|c| unit_order(c.number));

        for &unit in units {
            let Some(position) = chapters.iter().position(|c| c.number == unit) else {
                tracing::warn!(unit, "Review flagged an unknown unit, skipping");
                continue;
            };
            let prior_continuity = if position > 0 {
                chapters[position - 1].continuity_state.clone()
            } else {
                None
            };

            let relevant: Vec<Issue> = issues
                .iter()
                .filter(|i| i.affected_units.contains(&unit))
                .cloned()
                .collect();
            let mut target = chapters[position].clone();
            target.plan = format!(
                "{}\n\n## Review findings to resolve\n\n{}",
                target.plan,
                summarize_issues(&relevant)
            );

            tracing::info!(unit, findings = relevant.len(), "Rewriting unit");
            let mut chapter = chapters[position].clone();
            chapter.status = ChapterStatus::Revision;
            self.store.upsert_chapter(&chapter).await?;
            let brief = self.ledger.constraints(project_id, unit).await?;
            let produced = looper
                .produce(&target, &brief, prior_continuity.as_deref(), meter, cancel)
                .await?;

            chapter.set_content(produced.content);
            chapter.continuity_state = produced.continuity_state;
            chapter.status = ChapterStatus::Completed;
            let (_, usage) = self
                .ledger
                .validate(&chapter.content, project_id, unit, cancel)
                .await?;
            meter.fold(usage);
            self.store.upsert_chapter(&chapter).await?;
            chapters[position] = chapter;
        }
        Ok(())
    }
}
