//! # fable-ledger
//!
//! The consistency ledger owns the mutable world model (entities, rules,
//! relationships) and sits on both sides of generation:
//!
//! - **Read side**: `constraints()` renders the known world as a structured
//!   brief injected into writer prompts, visually separating immutable
//!   attributes from mutable ones
//! - **Write side**: `validate()` checks generated text against the world
//!   model with a deliberately permissive bias (only four violation classes
//!   ever block), and grows the ledger with newly revealed facts whether or
//!   not the text was accepted
//!
//! Writes are serialized per project; immutable attributes reject overwrites
//! by dropping the write and appending a conflict-recording rule instead.

mod brief;
mod ledger;
mod validate;

pub use brief::render_brief;
pub use ledger::Ledger;
pub use validate::{
    ExtractedFact, ExtractedRelationship, ExtractedRule, ValidationOutcome, ViolationClass,
};
