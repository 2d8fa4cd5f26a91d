//! # fable-store
//!
//! Record-oriented persistence boundary for Fable.
//!
//! Storage is a collaborator, not a component: simple get/list/upsert
//! operations over projects, chapters, world-model rows, jobs, usage meters
//! and per-job unit outputs. No transactions are assumed anywhere, so all
//! invariants (immutable-attribute protection, single-writer ledger updates)
//! are enforced by callers, never relied upon from storage.

mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::RecordStore;
