//! Core type definitions for the Fable pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A writing project (one manuscript plus its world model and jobs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    /// BCP-47-ish locale tag driving typography rules (e.g. "en", "fr")
    pub locale: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(title: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            locale: locale.into(),
            created_at: Utc::now(),
        }
    }
}

/// Kinds of world-model entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Location,
    Object,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Character => write!(f, "character"),
            Self::Location => write!(f, "location"),
            Self::Object => write!(f, "object"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "character" => Ok(Self::Character),
            "location" => Ok(Self::Location),
            "object" => Ok(Self::Object),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

/// One attribute of a world entity
///
/// Immutable attributes (eye color, birthplace) must never be overwritten once
/// set; the ledger enforces this on write, storage does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub value: String,
    pub immutable: bool,
}

impl AttributeValue {
    pub fn mutable(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            immutable: false,
        }
    }

    pub fn immutable(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            immutable: true,
        }
    }
}

/// A world-model entity (character, location, object)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEntity {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub entity_type: EntityType,
    pub attributes: HashMap<String, AttributeValue>,
    /// Free-form narrative status ("alive", "dead", "missing", ...)
    pub status: String,
    /// Last unit in which the entity appeared
    pub last_seen_unit: Option<i32>,
}

impl WorldEntity {
    pub fn new(project_id: Uuid, name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            entity_type,
            attributes: HashMap::new(),
            status: "active".to_string(),
            last_seen_unit: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Whether this entity is flagged dead in the world model
    pub fn is_dead(&self) -> bool {
        self.status.eq_ignore_ascii_case("dead")
    }
}

/// An atomic world fact that must hold from `source_unit` onward
///
/// Immutable once created except for deactivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldRule {
    pub id: Uuid,
    pub project_id: Uuid,
    pub description: String,
    pub category: String,
    pub is_active: bool,
    pub source_unit: i32,
}

impl WorldRule {
    pub fn new(
        project_id: Uuid,
        description: impl Into<String>,
        category: impl Into<String>,
        source_unit: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            description: description.into(),
            category: category.into(),
            is_active: true,
            source_unit,
        }
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

/// A directional relationship between two named entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub subject: String,
    pub target: String,
    pub relation_type: String,
    pub meta: Option<String>,
}

impl Relationship {
    pub fn new(
        subject: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            target: target.into(),
            relation_type: relation_type.into(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }
}

/// Chapter lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    #[default]
    Pending,
    Writing,
    Editing,
    Revision,
    Completed,
}

impl std::fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Writing => write!(f, "writing"),
            Self::Editing => write!(f, "editing"),
            Self::Revision => write!(f, "revision"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for ChapterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "writing" => Ok(Self::Writing),
            "editing" => Ok(Self::Editing),
            "revision" => Ok(Self::Revision),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid chapter status: {}", s)),
        }
    }
}

/// One chapter-equivalent unit of the manuscript
///
/// Special segments (prologue, epilogue, author's note) use out-of-band
/// sentinel numbers; ordering always goes through [`crate::unit_order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub project_id: Uuid,
    pub number: i32,
    pub title: String,
    pub content: String,
    pub status: ChapterStatus,
    /// Opaque end-of-unit snapshot of character locations/injuries/possessions,
    /// produced by the writer and consumed by the next unit's writer
    pub continuity_state: Option<String>,
    pub word_count: usize,
    /// Plan for what this chapter should accomplish
    pub plan: String,
}

impl Chapter {
    pub fn new(project_id: Uuid, number: i32, title: impl Into<String>) -> Self {
        Self {
            project_id,
            number,
            title: title.into(),
            content: String::new(),
            status: ChapterStatus::Pending,
            continuity_state: None,
            word_count: 0,
            plan: String::new(),
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    /// Replace the content and recompute the word count
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.word_count = self.content.split_whitespace().count();
    }
}

/// Severity of a review finding, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical = 0,
    Major = 1,
    Minor = 2,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Major => write!(f, "major"),
            Self::Minor => write!(f, "minor"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// A review finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub affected_units: BTreeSet<i32>,
    pub category: String,
    pub description: String,
    pub severity: Severity,
    pub correction_instructions: String,
}

impl Issue {
    pub fn new(
        category: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            affected_units: BTreeSet::new(),
            category: category.into(),
            description: description.into(),
            severity,
            correction_instructions: String::new(),
        }
    }

    pub fn with_units(mut self, units: impl IntoIterator<Item = i32>) -> Self {
        self.affected_units.extend(units);
        self
    }

    pub fn with_correction(mut self, instructions: impl Into<String>) -> Self {
        self.correction_instructions = instructions.into();
        self
    }

    /// Merge a duplicate finding into this one
    ///
    /// Affected units are unioned and correction detail is appended, never
    /// discarded. Severity keeps the more severe of the two.
    pub fn merge(&mut self, other: &Issue) {
        self.affected_units.extend(other.affected_units.iter().copied());
        self.severity = self.severity.min(other.severity);
        if !other.correction_instructions.is_empty()
            && !self
                .correction_instructions
                .contains(&other.correction_instructions)
        {
            if !self.correction_instructions.is_empty() {
                self.correction_instructions.push_str("\n");
            }
            self.correction_instructions
                .push_str(&other.correction_instructions);
        }
    }
}

/// Final outcome of a manuscript review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    ApprovedWithReservations,
    RequiresRevision,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "APPROVED"),
            Self::ApprovedWithReservations => write!(f, "APPROVED_WITH_RESERVATIONS"),
            Self::RequiresRevision => write!(f, "REQUIRES_REVISION"),
        }
    }
}

/// Combined result of a full-manuscript review
///
/// Invariant: `score` never exceeds the cap implied by the issue severities
/// present (enforced by the score-coherence clamp in the review protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub verdict: Verdict,
    /// 0.0 - 10.0
    pub score: f32,
    pub issues: Vec<Issue>,
    pub units_to_rewrite: BTreeSet<i32>,
}

/// Job lifecycle status as persisted
///
/// "Frozen" is never stored: it is derived at status time from a stale
/// heartbeat on a `Running` job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What a job does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobKind {
    /// Generate all pending chapters for a project
    Generation,
    /// Run the full-manuscript review protocol
    Review,
    /// Translate every unit into a target locale
    Translation { target_locale: String },
}

/// Progress of a long-running job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: usize,
    pub total: usize,
}

/// A long-running document-wide job
///
/// Jobs outlive a single client connection; observers reattach via
/// `status()` plus a fresh progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub heartbeat_at: DateTime<Utc>,
    /// Reference to where the job's output lives (store key, path, ...)
    pub result_ref: Option<String>,
    pub error: Option<String>,
    /// Units skipped due to per-unit failures
    pub skipped_units: Vec<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(project_id: Uuid, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            kind,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            heartbeat_at: now,
            result_ref: None,
            error: None,
            skipped_units: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the job looks frozen: running but no heartbeat within the
    /// threshold. Frozen jobs are safe to resume, unlike errored ones.
    pub fn is_frozen(&self, heartbeat_timeout_secs: u64) -> bool {
        self.status == JobStatus::Running
            && (Utc::now() - self.heartbeat_at).num_seconds() > heartbeat_timeout_secs as i64
    }

    pub fn beat(&mut self) {
        let now = Utc::now();
        self.heartbeat_at = now;
        self.updated_at = now;
    }
}
