//! The record store trait

use async_trait::async_trait;
use fable_core::{
    Chapter, Job, Project, Relationship, Result, UsageMeter, WorldEntity, WorldRule,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Record-oriented CRUD over everything Fable persists
///
/// Implementations only need to be durable key/value stores; upserts are
/// last-write-wins and there is no cross-record atomicity.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Projects
    async fn upsert_project(&self, project: &Project) -> Result<()>;
    async fn get_project(&self, id: Uuid) -> Result<Project>;

    // Chapters, keyed by (project, unit number)
    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<()>;
    async fn get_chapter(&self, project_id: Uuid, number: i32) -> Result<Chapter>;
    async fn list_chapters(&self, project_id: Uuid) -> Result<Vec<Chapter>>;

    // World entities, keyed by (project, name)
    async fn upsert_entity(&self, entity: &WorldEntity) -> Result<()>;
    async fn get_entity(&self, project_id: Uuid, name: &str) -> Result<Option<WorldEntity>>;
    async fn list_entities(&self, project_id: Uuid) -> Result<Vec<WorldEntity>>;

    // World rules (append-mostly; upsert also covers deactivation)
    async fn upsert_rule(&self, rule: &WorldRule) -> Result<()>;
    async fn list_rules(&self, project_id: Uuid) -> Result<Vec<WorldRule>>;

    // Relationships
    async fn add_relationship(&self, project_id: Uuid, rel: &Relationship) -> Result<()>;
    async fn list_relationships(&self, project_id: Uuid) -> Result<Vec<Relationship>>;

    // Jobs
    async fn upsert_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, id: Uuid) -> Result<Job>;
    async fn list_jobs(&self, project_id: Uuid) -> Result<Vec<Job>>;
    /// Touch only the heartbeat timestamp of a running job, leaving progress
    /// and skipped units alone; returns whether the job is still running
    async fn beat_job(&self, id: Uuid) -> Result<bool>;

    // Token usage meters, one per project
    async fn save_usage(&self, meter: &UsageMeter) -> Result<()>;
    async fn get_usage(&self, project_id: Uuid) -> Result<Option<UsageMeter>>;

    // Per-job unit outputs (the persisted partial output a resume re-derives
    // completed units from)
    async fn put_unit_output(&self, job_id: Uuid, unit: i32, text: &str) -> Result<()>;
    async fn list_unit_outputs(&self, job_id: Uuid) -> Result<BTreeMap<i32, String>>;
}
