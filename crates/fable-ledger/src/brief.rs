//! Constraint brief rendering
//!
//! The brief is the prompt fragment injected before generation. It must make
//! the immutable/mutable split impossible to miss, and carries only rules
//! already established at the target unit.

use fable_core::{unit_order, Relationship, WorldEntity, WorldRule};

/// Rules with this category describe travel-time constraints between
/// locations and render into their own timeline section.
pub(crate) const TRAVEL_TIME_CATEGORY: &str = "travel_time";

/// Render the world-model brief for a unit about to be generated
pub fn render_brief(
    entities: &[WorldEntity],
    relationships: &[Relationship],
    rules: &[WorldRule],
    unit_number: i32,
) -> String {
    let mut brief = String::new();
    brief.push_str("# WORLD MODEL\n\n");

    if !entities.is_empty() {
        brief.push_str("## Entities\n\n");
        for entity in entities {
            brief.push_str(&format!(
                "### {} ({}) - status: {}\n",
                entity.name, entity.entity_type, entity.status
            ));

            let mut immutable: Vec<_> = entity
                .attributes
                .iter()
                .filter(|(_, v)| v.immutable)
                .collect();
            immutable.sort_by(|a, b| a.0.cmp(b.0));
            if !immutable.is_empty() {
                brief.push_str("IMMUTABLE (never contradict):\n");
                for (key, value) in immutable {
                    brief.push_str(&format!("- {}: {}\n", key, value.value));
                }
            }

            let mut mutable: Vec<_> = entity
                .attributes
                .iter()
                .filter(|(_, v)| !v.immutable)
                .collect();
            mutable.sort_by(|a, b| a.0.cmp(b.0));
            if !mutable.is_empty() {
                brief.push_str("Mutable (may evolve):\n");
                for (key, value) in mutable {
                    brief.push_str(&format!("- {}: {}\n", key, value.value));
                }
            }
            brief.push('\n');
        }
    }

    if !relationships.is_empty() {
        brief.push_str("## Relationships\n\n");
        for rel in relationships {
            match &rel.meta {
                Some(meta) => brief.push_str(&format!(
                    "- {} --[{}]--> {} ({})\n",
                    rel.subject, rel.relation_type, rel.target, meta
                )),
                None => brief.push_str(&format!(
                    "- {} --[{}]--> {}\n",
                    rel.subject, rel.relation_type, rel.target
                )),
            }
        }
        brief.push('\n');
    }

    // Only rules established at or before this unit apply
    let applicable: Vec<&WorldRule> = rules
        .iter()
        .filter(|r| r.is_active && unit_order(r.source_unit) <= unit_order(unit_number))
        .collect();

    let (timeline, general): (Vec<&&WorldRule>, Vec<&&WorldRule>) = applicable
        .iter()
        .partition(|r| r.category == TRAVEL_TIME_CATEGORY);

    if !general.is_empty() {
        brief.push_str("## Active rules\n\n");
        for rule in general {
            brief.push_str(&format!(
                "- [{}] {} (since unit {})\n",
                rule.category, rule.description, rule.source_unit
            ));
        }
        brief.push('\n');
    }

    if !timeline.is_empty() {
        brief.push_str("## Timeline and travel constraints\n\n");
        for rule in timeline {
            brief.push_str(&format!("- {}\n", rule.description));
        }
        brief.push('\n');
    }

    brief
}
