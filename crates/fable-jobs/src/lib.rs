//! # fable-jobs
//!
//! Long-running, resumable jobs over whole manuscripts.
//!
//! A job outlives any single observer: workers persist their partial output
//! after every unit and beat a heartbeat, so a crashed or cancelled run is
//! distinguishable from a stuck one and can be resumed from what was already
//! done. "Frozen" is never stored; it is derived at status time from a stale
//! heartbeat on a running job.

mod events;
mod supervisor;
mod translate;

pub use events::ProgressEvent;
pub use supervisor::{JobHandle, JobSupervisor, JobView};
pub use translate::{plan_resume, ResumePlan, TranslationJob};
