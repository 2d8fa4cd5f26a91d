//! # fable-core
//!
//! Core types for the Fable manuscript orchestration pipeline.
//!
//! Fable coordinates many calls to an external text-completion service to
//! generate, revise and translate long-form manuscripts. This crate holds the
//! shared vocabulary of the pipeline:
//!
//! - Chapters and their lifecycle status
//! - World-model rows (entities, rules, relationships)
//! - Review findings (issues, verdicts) and their merge rules
//! - Long-running jobs with heartbeat-based liveness
//! - Canonical unit ordering (prologue < numbered < epilogue < author's note)
//! - Configuration with named, overridable pipeline constants

mod config;
mod error;
mod order;
mod types;
mod usage;

pub use config::{
    FableConfig, JobConfig, ModelConfig, ReviewConfig, RevisionConfig,
};
pub use error::{FableError, Result};
pub use order::{unit_order, UnitKind, UnitOrder};
pub use types::*;
pub use usage::{TokenUsage, UsageMeter};
