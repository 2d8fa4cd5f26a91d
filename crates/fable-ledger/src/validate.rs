//! Validation record types and blocking-class policy
//!
//! The validation bias is permissive: exactly four violation classes block
//! acceptance. Everything else the reviewer reports is surfaced as a
//! non-blocking warning.

use serde::{Deserialize, Serialize};

/// The four violation classes that block acceptance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationClass {
    /// A character flagged dead acts in the text
    DeadCharacterActs,
    /// The same character in two locations at one narrative instant
    CharacterInTwoPlaces,
    /// An immutable physical attribute changed without in-world justification
    ImmutableAttributeChanged,
    /// A direct textual self-contradiction
    DirectContradiction,
}

impl ViolationClass {
    /// Map a reported category onto a blocking class, if it is one
    pub fn from_category(category: &str) -> Option<Self> {
        match category.trim().to_lowercase().as_str() {
            "dead_character_acts" | "dead_character" => Some(Self::DeadCharacterActs),
            "character_in_two_places" | "dual_location" => Some(Self::CharacterInTwoPlaces),
            "immutable_attribute_changed" | "immutable_attribute" => {
                Some(Self::ImmutableAttributeChanged)
            }
            "direct_contradiction" | "self_contradiction" => Some(Self::DirectContradiction),
            _ => None,
        }
    }
}

/// Raw validation record parsed from completion output
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ValidationRecord {
    #[serde(default)]
    pub violations: Vec<RawViolation>,
    #[serde(default)]
    pub new_facts: Vec<ExtractedFact>,
    #[serde(default)]
    pub new_rules: Vec<ExtractedRule>,
    #[serde(default)]
    pub new_relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawViolation {
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub correction: String,
}

/// A newly revealed entity attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub entity: String,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    pub attribute: String,
    pub value: String,
    #[serde(default)]
    pub immutable: bool,
}

fn default_entity_type() -> String {
    "character".to_string()
}

/// A newly established world rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRule {
    pub description: String,
    #[serde(default = "default_rule_category")]
    pub category: String,
}

fn default_rule_category() -> String {
    "plot".to_string()
}

/// A newly revealed relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub subject: String,
    pub target: String,
    pub relation_type: String,
}

/// Outcome of validating one unit of text
///
/// Validation and extraction are independent: the extracted rows are present
/// (and already applied to the ledger) whether or not the text was accepted.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    /// First blocking violation, if any
    pub critical_error: Option<String>,
    /// Corrective instructions for a rewrite, when blocked
    pub correction_instructions: Option<String>,
    /// Non-blocking findings (tone shifts, ambiguous rule readings, ...)
    pub warnings: Vec<String>,
    pub new_facts: Vec<ExtractedFact>,
    pub new_rules: Vec<ExtractedRule>,
    pub new_relationships: Vec<ExtractedRelationship>,
}

impl ValidationOutcome {
    /// Classify the raw record into blocking errors and warnings
    pub(crate) fn from_record(record: ValidationRecord) -> Self {
        let mut critical_error = None;
        let mut corrections = Vec::new();
        let mut warnings = Vec::new();

        for violation in &record.violations {
            match ViolationClass::from_category(&violation.category) {
                Some(class) => {
                    if critical_error.is_none() {
                        critical_error =
                            Some(format!("{:?}: {}", class, violation.description));
                    }
                    if !violation.correction.is_empty() {
                        corrections.push(violation.correction.clone());
                    } else {
                        corrections.push(violation.description.clone());
                    }
                }
                None => {
                    warnings.push(format!("{}: {}", violation.category, violation.description));
                }
            }
        }

        Self {
            is_valid: critical_error.is_none(),
            critical_error,
            correction_instructions: if corrections.is_empty() {
                None
            } else {
                Some(corrections.join("\n"))
            },
            warnings,
            new_facts: record.new_facts,
            new_rules: record.new_rules,
            new_relationships: record.new_relationships,
        }
    }
}
