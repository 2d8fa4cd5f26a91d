//! Tranche review protocol
//!
//! A full manuscript does not fit one completion call, so review runs over
//! tranches of bounded size with explicit context propagation: each tranche
//! sees the world brief, the aggregate pattern findings, every issue raised
//! by earlier tranches and everything fixed in earlier passes. Results
//! combine through deduplication, severity ordering and the score-coherence
//! clamp.

use crate::clamp::clamp_score;
use crate::dedup::dedup_issues;
use crate::patterns::{builtin_detectors, pre_analysis, PatternDetector};
use crate::steps::tranche_review_step;
use fable_core::{
    unit_order, Chapter, Issue, Result, ReviewConfig, ReviewVerdict, Severity, UsageMeter, Verdict,
};
use fable_gateway::{CancelToken, CompletionBackend, SamplingConfig};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Full-manuscript reviewer
pub struct TrancheReviewer {
    backend: Arc<dyn CompletionBackend>,
    sampling: SamplingConfig,
    config: ReviewConfig,
    detectors: Vec<PatternDetector>,
}

impl TrancheReviewer {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        sampling: SamplingConfig,
        config: ReviewConfig,
    ) -> Self {
        Self {
            backend,
            sampling,
            config,
            detectors: builtin_detectors(),
        }
    }

    pub fn with_detectors(mut self, detectors: Vec<PatternDetector>) -> Self {
        self.detectors = detectors;
        self
    }

    /// Run one review pass over the whole manuscript
    ///
    /// `pass` is 1-based; on the last allowed pass the verdict can no longer
    /// be `RequiresRevision` (unresolved findings are carried into the
    /// verdict as reservations instead, so the run terminates).
    pub async fn review_pass(
        &self,
        chapters: &[Chapter],
        world_brief: &str,
        already_fixed: &[Issue],
        pass: u32,
        meter: &mut UsageMeter,
        cancel: &CancelToken,
    ) -> Result<ReviewVerdict> {
        // Narrative order, not insertion order: prologue first, epilogue and
        // author's note after every numbered unit
        let mut ordered: Vec<&Chapter> = chapters.iter().collect();
        ordered.sort_by_key(|c| unit_order(c.number));

        let report = pre_analysis(chapters, &self.detectors);

        let mut issues: Vec<Issue> = Vec::new();
        let mut scores: Vec<f32> = Vec::new();

        for tranche_refs in ordered.chunks(self.config.tranche_size.max(1)) {
            let tranche: Vec<Chapter> = tranche_refs.iter().map(|c| (*c).clone()).collect();
            let tranche_units: BTreeSet<i32> = tranche.iter().map(|c| c.number).collect();

            let (record, usage) = tranche_review_step(
                self.backend.as_ref(),
                &self.sampling,
                world_brief,
                &report,
                &issues,
                already_fixed,
                &tranche,
                cancel,
            )
            .await?;
            meter.fold(usage);

            let Some(record) = record else { continue };
            scores.push(record.score.clamp(0.0, 10.0));
            issues.extend(
                record
                    .issues
                    .into_iter()
                    .map(|raw| raw.into_issue(&tranche_units)),
            );
        }

        let mut issues = dedup_issues(issues, self.config.dedup_similarity);
        // Severity enum orders most severe first; the sort is stable so
        // first-seen order survives within a severity
        issues.sort_by_key(|i| i.severity);

        let raw_score = if !scores.is_empty() {
            scores.iter().sum::<f32>() / scores.len() as f32
        } else if ordered.is_empty() {
            10.0
        } else {
            // Every tranche verdict was unparseable; a score of zero keeps an
            // unreviewed manuscript from reading as approved
            tracing::warn!("No tranche verdict parsed, scoring zero");
            0.0
        };
        let (score, cap) = clamp_score(raw_score, &issues);
        if let Some(cap) = cap {
            tracing::info!(
                raw_score,
                cap,
                critical = count(&issues, Severity::Critical),
                major = count(&issues, Severity::Major),
                minor = count(&issues, Severity::Minor),
                "Score clamped to match findings"
            );
        }

        issues.truncate(self.config.max_retained_issues);
        // Rewrites are demanded only for units a retained issue explains
        let mut units_to_rewrite: BTreeSet<i32> = BTreeSet::new();
        for issue in &issues {
            units_to_rewrite.extend(issue.affected_units.iter().copied());
        }

        let verdict = self.decide(score, &issues, pass);
        Ok(ReviewVerdict {
            verdict,
            score,
            issues,
            units_to_rewrite,
        })
    }

    fn decide(&self, score: f32, issues: &[Issue], pass: u32) -> Verdict {
        if issues.is_empty() && score >= 9.0 {
            return Verdict::Approved;
        }

        if pass >= self.config.max_passes {
            // Forced resolution: the protocol must terminate
            tracing::warn!(
                pass,
                score,
                critical = count(issues, Severity::Critical),
                major = count(issues, Severity::Major),
                minor = count(issues, Severity::Minor),
                "Final pass cannot demand revision, approving with reservations"
            );
            Verdict::ApprovedWithReservations
        } else {
            Verdict::RequiresRevision
        }
    }
}

fn count(issues: &[Issue], severity: Severity) -> usize {
    issues.iter().filter(|i| i.severity == severity).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sampling, ScriptedBackend};
    use uuid::Uuid;

    fn manuscript(units: i32) -> Vec<Chapter> {
        (1..=units)
            .map(|n| {
                let mut c = Chapter::new(Uuid::new_v4(), n, format!("Chapter {}", n));
                c.set_content(format!("Content of chapter {}.", n));
                c
            })
            .collect()
    }

    fn reviewer(backend: Arc<ScriptedBackend>) -> TrancheReviewer {
        TrancheReviewer::new(backend, sampling(), ReviewConfig::default())
            .with_detectors(Vec::new())
    }

    const CLEAN: &str = r#"{"score": 9.5, "issues": []}"#;

    #[tokio::test]
    async fn test_critical_in_one_tranche_caps_the_whole_verdict() {
        // 20 units split into tranches of 8, 8 and 4; the second tranche
        // reports a critical continuity break in units 10-11
        let critical = r#"{
            "score": 9.0,
            "issues": [{
                "category": "continuity",
                "description": "Dead character speaks",
                "severity": "critical",
                "affected_units": [10, 11],
                "correction_instructions": "Remove the dialogue or the death"
            }]
        }"#;
        let backend = ScriptedBackend::new(vec![CLEAN, critical, CLEAN]);

        let verdict = reviewer(backend)
            .review_pass(
                &manuscript(20),
                "brief",
                &[],
                1,
                &mut UsageMeter::new(Uuid::new_v4()),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert!(verdict.score <= 6.0);
        assert_eq!(verdict.verdict, Verdict::RequiresRevision);
        assert!(verdict.units_to_rewrite.contains(&10));
        assert!(verdict.units_to_rewrite.contains(&11));
    }

    #[tokio::test]
    async fn test_clean_manuscript_approved() {
        let backend = ScriptedBackend::new(vec![CLEAN, CLEAN, CLEAN]);
        let verdict = reviewer(backend)
            .review_pass(
                &manuscript(20),
                "brief",
                &[],
                1,
                &mut UsageMeter::new(Uuid::new_v4()),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(verdict.verdict, Verdict::Approved);
        assert!(verdict.issues.is_empty());
        assert!(verdict.units_to_rewrite.is_empty());
    }

    #[tokio::test]
    async fn test_final_pass_never_demands_revision() {
        // Even a critical finding cannot make the final pass loop
        let flawed = r#"{
            "score": 5.0,
            "issues": [{
                "category": "continuity",
                "description": "Dead character acts in the finale",
                "severity": "critical",
                "affected_units": [2]
            }]
        }"#;
        let backend = ScriptedBackend::new(vec![flawed]);

        let config = ReviewConfig::default();
        let verdict = reviewer(backend)
            .review_pass(
                &manuscript(4),
                "brief",
                &[],
                config.max_passes,
                &mut UsageMeter::new(Uuid::new_v4()),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(verdict.verdict, Verdict::ApprovedWithReservations);
        assert_eq!(verdict.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_issues_across_tranches_merge() {
        let first = r#"{
            "score": 8.0,
            "issues": [{
                "category": "continuity",
                "description": "The sword vanished between chapters",
                "severity": "major",
                "affected_units": [3]
            }]
        }"#;
        let second = r#"{
            "score": 8.0,
            "issues": [{
                "category": "continuity",
                "description": "Sword vanished again without explanation",
                "severity": "major",
                "affected_units": [12]
            }]
        }"#;
        let backend = ScriptedBackend::new(vec![first, second]);

        let mut config = ReviewConfig::default();
        config.dedup_similarity = 0.3;
        let verdict = TrancheReviewer::new(backend, sampling(), config)
            .with_detectors(Vec::new())
            .review_pass(
                &manuscript(16),
                "brief",
                &[],
                1,
                &mut UsageMeter::new(Uuid::new_v4()),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(verdict.issues.len(), 1);
        assert_eq!(
            verdict.issues[0].affected_units,
            BTreeSet::from([3, 12])
        );
    }

    #[tokio::test]
    async fn test_unattributed_finding_targets_its_tranche() {
        let vague = r#"{
            "score": 7.5,
            "issues": [{
                "category": "tone",
                "description": "Register wobbles",
                "severity": "minor"
            }]
        }"#;
        let backend = ScriptedBackend::new(vec![vague]);

        let verdict = reviewer(backend)
            .review_pass(
                &manuscript(3),
                "brief",
                &[],
                1,
                &mut UsageMeter::new(Uuid::new_v4()),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(
            verdict.issues[0].affected_units,
            BTreeSet::from([1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_unparseable_tranche_contributes_nothing() {
        let backend = ScriptedBackend::new(vec!["Not JSON at all.", CLEAN]);
        let verdict = reviewer(backend)
            .review_pass(
                &manuscript(16),
                "brief",
                &[],
                1,
                &mut UsageMeter::new(Uuid::new_v4()),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert!(verdict.issues.is_empty());
        // The malformed tranche is excluded, so the clean 9.5 stands alone
        assert!((verdict.score - 9.5).abs() < f32::EPSILON);
        assert_eq!(verdict.verdict, Verdict::Approved);
    }

    #[tokio::test]
    async fn test_all_tranches_unparseable_is_never_approved() {
        let backend = ScriptedBackend::new(vec!["Not JSON.", "Still not JSON."]);
        let verdict = reviewer(backend)
            .review_pass(
                &manuscript(16),
                "brief",
                &[],
                1,
                &mut UsageMeter::new(Uuid::new_v4()),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(verdict.score, 0.0);
        assert_eq!(verdict.verdict, Verdict::RequiresRevision);
    }

    #[tokio::test]
    async fn test_rewrites_come_only_from_retained_issues() {
        // A low score with no findings demands no rewrites; the rewrite set
        // is derived from the retained issues alone
        let scored = r#"{"score": 6.5, "issues": []}"#;
        let backend = ScriptedBackend::new(vec![scored]);
        let verdict = reviewer(backend)
            .review_pass(
                &manuscript(3),
                "brief",
                &[],
                1,
                &mut UsageMeter::new(Uuid::new_v4()),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert!(verdict.units_to_rewrite.is_empty());
        assert_eq!(verdict.verdict, Verdict::RequiresRevision);
    }
}
