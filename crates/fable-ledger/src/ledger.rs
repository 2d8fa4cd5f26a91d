//! The ledger itself: world-model ownership, constraint injection and
//! post-generation validation

use crate::brief::render_brief;
use crate::validate::{ExtractedFact, ValidationOutcome, ValidationRecord};
use fable_core::{
    AttributeValue, EntityType, Relationship, Result, TokenUsage, WorldEntity, WorldRule,
};
use fable_gateway::{
    complete_cancellable, extract_or, CancelToken, CompletionBackend, CompletionRequest,
    SamplingConfig,
};
use fable_store::RecordStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Category of the rule appended when an immutable-attribute write is dropped
pub(crate) const CONFLICT_CATEGORY: &str = "attribute_conflict";

/// The consistency ledger for all projects
///
/// Writes are serialized per project (single-writer discipline) so concurrent
/// jobs can never race the immutable-attribute check.
pub struct Ledger<S> {
    store: S,
    backend: Arc<dyn CompletionBackend>,
    sampling: SamplingConfig,
    write_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<S: RecordStore> Ledger<S> {
    pub fn new(store: S, backend: Arc<dyn CompletionBackend>, sampling: SamplingConfig) -> Self {
        Self {
            store,
            backend,
            sampling,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Render the constraint brief injected before generating `unit_number`
    pub async fn constraints(&self, project_id: Uuid, unit_number: i32) -> Result<String> {
        let entities = self.store.list_entities(project_id).await?;
        let relationships = self.store.list_relationships(project_id).await?;
        let rules = self.store.list_rules(project_id).await?;
        Ok(render_brief(&entities, &relationships, &rules, unit_number))
    }

    /// Validate one unit of generated text against the world model
    ///
    /// Extraction happens regardless of validity: newly revealed facts, rules
    /// and relationships are applied to the ledger even when the text is
    /// rejected. Returns the outcome plus the token usage of the call.
    pub async fn validate(
        &self,
        unit_text: &str,
        project_id: Uuid,
        unit_number: i32,
        cancel: &CancelToken,
    ) -> Result<(ValidationOutcome, TokenUsage)> {
        let brief = self.constraints(project_id, unit_number).await?;
        let prompt = build_validation_prompt(&brief, unit_text, unit_number);

        let request = CompletionRequest::new(self.sampling.clone())
            .with_system(VALIDATION_SYSTEM.to_string())
            .with_user(prompt);
        let response = complete_cancellable(self.backend.as_ref(), &request, cancel).await?;

        // Extractor never fails: an unparseable response validates cleanly
        // and extracts nothing
        let record = extract_or::<ValidationRecord>(&response.text, |_| ValidationRecord::default());
        let outcome = ValidationOutcome::from_record(record);

        if !outcome.is_valid {
            tracing::warn!(
                unit = unit_number,
                error = outcome.critical_error.as_deref().unwrap_or(""),
                "Unit blocked by consistency validation"
            );
        }
        for warning in &outcome.warnings {
            tracing::debug!(unit = unit_number, warning, "Non-blocking consistency finding");
        }

        self.apply_outcome(project_id, unit_number, &outcome).await?;

        Ok((outcome, response.usage))
    }

    /// Apply extracted rows under the project's write lock
    async fn apply_outcome(
        &self,
        project_id: Uuid,
        unit_number: i32,
        outcome: &ValidationOutcome,
    ) -> Result<()> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        for fact in &outcome.new_facts {
            self.apply_fact(project_id, unit_number, fact).await?;
        }
        for rule in &outcome.new_rules {
            let rule = WorldRule::new(project_id, &rule.description, &rule.category, unit_number);
            self.store.upsert_rule(&rule).await?;
        }
        for rel in &outcome.new_relationships {
            let rel = Relationship::new(&rel.subject, &rel.target, &rel.relation_type);
            self.store.add_relationship(project_id, &rel).await?;
        }
        Ok(())
    }

    /// Write one extracted attribute, enforcing immutable-attribute protection
    ///
    /// A write that conflicts with an existing immutable value is dropped and
    /// exactly one rule recording the conflict is appended instead.
    async fn apply_fact(
        &self,
        project_id: Uuid,
        unit_number: i32,
        fact: &ExtractedFact,
    ) -> Result<()> {
        let mut entity = match self.store.get_entity(project_id, &fact.entity).await? {
            Some(entity) => entity,
            None => {
                let entity_type = fact
                    .entity_type
                    .parse::<EntityType>()
                    .unwrap_or(EntityType::Character);
                WorldEntity::new(project_id, &fact.entity, entity_type)
            }
        };

        if let Some(existing) = entity.attributes.get(&fact.attribute) {
            if existing.immutable && existing.value != fact.value {
                tracing::warn!(
                    entity = %fact.entity,
                    attribute = %fact.attribute,
                    kept = %existing.value,
                    dropped = %fact.value,
                    "Immutable attribute conflict, write dropped"
                );
                let conflict = WorldRule::new(
                    project_id,
                    format!(
                        "Unit {} asserted {}.{} = \"{}\" but it was fixed as \"{}\"",
                        unit_number, fact.entity, fact.attribute, fact.value, existing.value
                    ),
                    CONFLICT_CATEGORY,
                    unit_number,
                );
                self.store.upsert_rule(&conflict).await?;
                return Ok(());
            }
        }

        let value = if fact.immutable {
            AttributeValue::immutable(&fact.value)
        } else {
            AttributeValue::mutable(&fact.value)
        };
        entity.attributes.insert(fact.attribute.clone(), value);
        entity.last_seen_unit = Some(unit_number);
        self.store.upsert_entity(&entity).await
    }

    async fn project_lock(&self, project_id: Uuid) -> Arc<Mutex<()>> {
        self.write_locks
            .lock()
            .await
            .entry(project_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

const VALIDATION_SYSTEM: &str = "You are a continuity editor. Compare the chapter text \
against the world model and reply with a single JSON object: \
{\"violations\": [{\"category\", \"description\", \"correction\"}], \
\"new_facts\": [{\"entity\", \"entity_type\", \"attribute\", \"value\", \"immutable\"}], \
\"new_rules\": [{\"description\", \"category\"}], \
\"new_relationships\": [{\"subject\", \"target\", \"relation_type\"}]}. \
Blocking categories are exactly: dead_character_acts, character_in_two_places, \
immutable_attribute_changed, direct_contradiction. Report anything else under a \
descriptive category of your own.";

fn build_validation_prompt(brief: &str, unit_text: &str, unit_number: i32) -> String {
    let mut prompt = String::new();
    prompt.push_str(brief);
    prompt.push_str(&format!("\n# UNIT {} TEXT\n\n", unit_number));
    prompt.push_str(unit_text);
    prompt.push_str("\n\nValidate the unit against the world model.\n");
    prompt
}
