//! In-memory record store
//!
//! The default backing store for tests and single-process runs. State lives
//! behind one `RwLock`; clones share the same state.

use crate::store::RecordStore;
use async_trait::async_trait;
use fable_core::{
    Chapter, FableError, Job, JobStatus, Project, Relationship, Result, UsageMeter, WorldEntity,
    WorldRule,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    projects: HashMap<Uuid, Project>,
    chapters: HashMap<(Uuid, i32), Chapter>,
    entities: HashMap<(Uuid, String), WorldEntity>,
    rules: HashMap<Uuid, Vec<WorldRule>>,
    relationships: HashMap<Uuid, Vec<Relationship>>,
    jobs: HashMap<Uuid, Job>,
    usage: HashMap<Uuid, UsageMeter>,
    unit_outputs: HashMap<Uuid, BTreeMap<i32, String>>,
}

/// Shared in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_project(&self, project: &Project) -> Result<()> {
        self.inner
            .write()
            .await
            .projects
            .insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Project> {
        self.inner
            .read()
            .await
            .projects
            .get(&id)
            .cloned()
            .ok_or_else(|| FableError::NotFound(format!("project {}", id)))
    }

    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<()> {
        self.inner
            .write()
            .await
            .chapters
            .insert((chapter.project_id, chapter.number), chapter.clone());
        Ok(())
    }

    async fn get_chapter(&self, project_id: Uuid, number: i32) -> Result<Chapter> {
        self.inner
            .read()
            .await
            .chapters
            .get(&(project_id, number))
            .cloned()
            .ok_or_else(|| FableError::NotFound(format!("chapter {} of {}", number, project_id)))
    }

    async fn list_chapters(&self, project_id: Uuid) -> Result<Vec<Chapter>> {
        Ok(self
            .inner
            .read()
            .await
            .chapters
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn upsert_entity(&self, entity: &WorldEntity) -> Result<()> {
        self.inner
            .write()
            .await
            .entities
            .insert((entity.project_id, entity.name.clone()), entity.clone());
        Ok(())
    }

    async fn get_entity(&self, project_id: Uuid, name: &str) -> Result<Option<WorldEntity>> {
        Ok(self
            .inner
            .read()
            .await
            .entities
            .get(&(project_id, name.to_string()))
            .cloned())
    }

    async fn list_entities(&self, project_id: Uuid) -> Result<Vec<WorldEntity>> {
        Ok(self
            .inner
            .read()
            .await
            .entities
            .values()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn upsert_rule(&self, rule: &WorldRule) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rules = inner.rules.entry(rule.project_id).or_default();
        if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule.clone();
        } else {
            rules.push(rule.clone());
        }
        Ok(())
    }

    async fn list_rules(&self, project_id: Uuid) -> Result<Vec<WorldRule>> {
        Ok(self
            .inner
            .read()
            .await
            .rules
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_relationship(&self, project_id: Uuid, rel: &Relationship) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rels = inner.relationships.entry(project_id).or_default();
        if !rels.contains(rel) {
            rels.push(rel.clone());
        }
        Ok(())
    }

    async fn list_relationships(&self, project_id: Uuid) -> Result<Vec<Relationship>> {
        Ok(self
            .inner
            .read()
            .await
            .relationships
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_job(&self, job: &Job) -> Result<()> {
        self.inner.write().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.inner
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| FableError::JobNotFound(id.to_string()))
    }

    async fn list_jobs(&self, project_id: Uuid) -> Result<Vec<Job>> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn beat_job(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.beat();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_usage(&self, meter: &UsageMeter) -> Result<()> {
        self.inner
            .write()
            .await
            .usage
            .insert(meter.project_id, meter.clone());
        Ok(())
    }

    async fn get_usage(&self, project_id: Uuid) -> Result<Option<UsageMeter>> {
        Ok(self.inner.read().await.usage.get(&project_id).cloned())
    }

    async fn put_unit_output(&self, job_id: Uuid, unit: i32, text: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .unit_outputs
            .entry(job_id)
            .or_default()
            .insert(unit, text.to_string());
        Ok(())
    }

    async fn list_unit_outputs(&self, job_id: Uuid) -> Result<BTreeMap<i32, String>> {
        Ok(self
            .inner
            .read()
            .await
            .unit_outputs
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fable_core::{AttributeValue, EntityType, JobKind};

    #[tokio::test]
    async fn test_chapter_round_trip() {
        let store = MemoryStore::new();
        let project = Project::new("Test", "en");
        store.upsert_project(&project).await.unwrap();

        let mut chapter = Chapter::new(project.id, 1, "Opening");
        chapter.set_content("Some prose here");
        store.upsert_chapter(&chapter).await.unwrap();

        let loaded = store.get_chapter(project.id, 1).await.unwrap();
        assert_eq!(loaded.title, "Opening");
        assert_eq!(loaded.word_count, 3);

        assert!(store.get_chapter(project.id, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_entity_keyed_by_name() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();

        let entity = WorldEntity::new(project_id, "Irena", EntityType::Character)
            .with_attribute("eye_color", AttributeValue::immutable("green"));
        store.upsert_entity(&entity).await.unwrap();

        let loaded = store.get_entity(project_id, "Irena").await.unwrap().unwrap();
        assert_eq!(loaded.attributes["eye_color"].value, "green");
        assert!(store.get_entity(project_id, "Nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rule_upsert_replaces_by_id() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();

        let mut rule = WorldRule::new(project_id, "X died in unit 7", "death", 7);
        store.upsert_rule(&rule).await.unwrap();
        rule.deactivate();
        store.upsert_rule(&rule).await.unwrap();

        let rules = store.list_rules(project_id).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].is_active);
    }

    #[tokio::test]
    async fn test_unit_outputs_ordered_by_unit() {
        let store = MemoryStore::new();
        let job = Job::new(Uuid::new_v4(), JobKind::Generation);

        store.put_unit_output(job.id, 3, "three").await.unwrap();
        store.put_unit_output(job.id, 1, "one").await.unwrap();

        let outputs = store.list_unit_outputs(job.id).await.unwrap();
        assert_eq!(outputs.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_beat_job_touches_only_the_heartbeat() {
        let store = MemoryStore::new();
        let mut job = Job::new(Uuid::new_v4(), JobKind::Generation);
        job.status = JobStatus::Running;
        job.progress.current = 3;
        job.progress.total = 9;
        job.skipped_units = vec![2];
        store.upsert_job(&job).await.unwrap();

        let before = store.get_job(job.id).await.unwrap().heartbeat_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.beat_job(job.id).await.unwrap());

        let after = store.get_job(job.id).await.unwrap();
        assert!(after.heartbeat_at > before);
        assert_eq!(after.progress.current, 3);
        assert_eq!(after.skipped_units, vec![2]);

        // Beating stops reporting true once the job is no longer running
        job.status = JobStatus::Completed;
        store.upsert_job(&job).await.unwrap();
        assert!(!store.beat_job(job.id).await.unwrap());
        assert!(!store.beat_job(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_relationship_dedup() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        let rel = Relationship::new("Irena", "Tomas", "sibling");

        store.add_relationship(project_id, &rel).await.unwrap();
        store.add_relationship(project_id, &rel).await.unwrap();

        assert_eq!(store.list_relationships(project_id).await.unwrap().len(), 1);
    }
}
