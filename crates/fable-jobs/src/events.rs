//! Progress events emitted by job workers

use serde::Serialize;
use uuid::Uuid;

/// One observable step of a running job
///
/// Events are broadcast; a reattaching observer missed past events by design
/// and re-derives overall progress from [`crate::JobSupervisor::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ProgressEvent {
    Started {
        job_id: Uuid,
        total: usize,
    },
    Progress {
        job_id: Uuid,
        unit: i32,
        current: usize,
        total: usize,
    },
    /// A unit failed and was skipped; the job continues
    UnitSkipped {
        job_id: Uuid,
        unit: i32,
        message: String,
    },
    Completed {
        job_id: Uuid,
        skipped_units: Vec<i32>,
    },
    Failed {
        job_id: Uuid,
        message: String,
    },
}
