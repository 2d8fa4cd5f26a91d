//! # fable-pipeline
//!
//! The orchestration layer of Fable:
//!
//! - **Chapter revision loop**: drives one chapter through
//!   generate -> structural edit -> approve/reject -> polish, bounded by a
//!   retry budget that soft-fails forward instead of deadlocking
//! - **Tranche review protocol**: reviews an arbitrarily large manuscript in
//!   bounded slices with cross-tranche context propagation, issue
//!   deduplication and a score-coherence clamp
//! - **Revision orchestrator**: sequences chapter production, periodic
//!   consistency checkpoints and final-review-triggered rewrite cycles
//!
//! Steps are plain async functions composed by explicit orchestration code;
//! there is no agent hierarchy.

mod chapter;
mod clamp;
mod dedup;
mod orchestrator;
mod patterns;
mod prompt;
mod review;
mod steps;
#[cfg(test)]
pub(crate) mod testutil;

pub use chapter::{ChapterLoop, ProducedChapter};
pub use clamp::{clamp_score, max_allowed_score};
pub use dedup::{dedup_issues, keyword_similarity, normalized_keywords};
pub use orchestrator::{RevisionOrchestrator, RunReport};
pub use patterns::{builtin_detectors, pre_analysis, PatternDetector};
pub use review::TrancheReviewer;
pub use steps::SurgicalPlan;
