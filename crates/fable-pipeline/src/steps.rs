//! Pipeline steps
//!
//! Each step is a plain async function: build a prompt, call the completion
//! backend, extract a typed record. Steps never loop or branch on each
//! other; composition lives in the chapter loop, the reviewer and the
//! orchestrator.

use crate::prompt::{
    build_editor_prompt, build_polish_prompt, build_tranche_prompt, build_writer_prompt,
};
use fable_core::{Chapter, Issue, Result, Severity, TokenUsage};
use fable_gateway::{
    complete_cancellable, extract_json, extract_or, extract_tag, CancelToken, CompletionBackend,
    CompletionRequest, SamplingConfig,
};
use serde::Deserialize;
use std::collections::BTreeSet;

const WRITER_SYSTEM: &str = "You are a novelist. Write the requested unit in full, \
respecting the world model and the continuity snapshot. Never contradict an \
attribute marked IMMUTABLE.";

const EDITOR_SYSTEM: &str = "You are a structural editor. Judge drafts against their \
plan and world model, harshly but fairly.";

const POLISH_SYSTEM: &str = "You are a copy editor. You adjust typography and register \
only; you never rewrite scenes or cut content.";

const REVIEW_SYSTEM: &str = "You are reviewing part of a full manuscript. Report only \
findings not already raised. Judge the units in front of you, in context.";

/// Structured rejection from the editor step
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SurgicalPlan {
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub procedure: String,
    #[serde(default)]
    pub target_outcome: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EditorRecord {
    pub score: f32,
    #[serde(default)]
    pub surgical_plan: Option<SurgicalPlan>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TrancheRecord {
    #[serde(default = "default_tranche_score")]
    pub score: f32,
    #[serde(default)]
    pub issues: Vec<RawIssue>,
}

fn default_tranche_score() -> f32 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawIssue {
    pub category: String,
    pub description: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub affected_units: Vec<i32>,
    #[serde(default)]
    pub correction_instructions: String,
}

fn default_severity() -> String {
    "minor".to_string()
}

impl RawIssue {
    /// Convert to a domain issue; unattributed findings fall back to the
    /// whole tranche
    pub(crate) fn into_issue(self, tranche_units: &BTreeSet<i32>) -> Issue {
        let severity = self.severity.parse::<Severity>().unwrap_or(Severity::Minor);
        let units: BTreeSet<i32> = if self.affected_units.is_empty() {
            tranche_units.clone()
        } else {
            self.affected_units.into_iter().collect()
        };
        Issue::new(self.category, self.description, severity)
            .with_units(units)
            .with_correction(self.correction_instructions)
    }
}

/// Writer output: prose plus the end-of-unit continuity snapshot
pub(crate) struct WriterOutput {
    pub content: String,
    pub continuity: Option<String>,
}

/// Generate a draft for one unit
pub(crate) async fn writer_step(
    backend: &dyn CompletionBackend,
    sampling: &SamplingConfig,
    chapter: &Chapter,
    world_brief: &str,
    prior_continuity: Option<&str>,
    surgical: Option<&SurgicalPlan>,
    cancel: &CancelToken,
) -> Result<(WriterOutput, TokenUsage)> {
    let prompt = build_writer_prompt(chapter, world_brief, prior_continuity, surgical);
    let request = CompletionRequest::new(sampling.clone())
        .with_system(WRITER_SYSTEM)
        .with_user(prompt);
    let response = complete_cancellable(backend, &request, cancel).await?;

    let continuity = extract_tag(&response.text, "continuity");
    let content = strip_tag_block(&response.text, "continuity");

    if continuity.is_none() {
        tracing::warn!(unit = chapter.number, "Writer emitted no continuity block");
    }

    Ok((WriterOutput { content, continuity }, response.usage))
}

/// Score a draft against its plan; returns the structured verdict
pub(crate) async fn editor_step(
    backend: &dyn CompletionBackend,
    sampling: &SamplingConfig,
    chapter: &Chapter,
    world_brief: &str,
    draft: &str,
    approval_threshold: f32,
    cancel: &CancelToken,
) -> Result<(EditorRecord, TokenUsage)> {
    let prompt = build_editor_prompt(chapter, world_brief, draft);
    let request = CompletionRequest::new(sampling.clone())
        .with_system(EDITOR_SYSTEM)
        .with_user(prompt);
    let response = complete_cancellable(backend, &request, cancel).await?;

    // Fallback approves at exactly the threshold: parse noise must not burn
    // retry budget, and the tranche review downstream is the safety net
    let record = extract_or::<EditorRecord>(&response.text, |_| EditorRecord {
        score: approval_threshold,
        surgical_plan: None,
    });
    Ok((record, response.usage))
}

/// Enforce locale typography; never shrinks the content
pub(crate) async fn polish_step(
    backend: &dyn CompletionBackend,
    sampling: &SamplingConfig,
    draft: &str,
    locale: &str,
    cancel: &CancelToken,
) -> Result<(String, TokenUsage)> {
    let prompt = build_polish_prompt(draft, locale);
    let request = CompletionRequest::new(sampling.clone())
        .with_system(POLISH_SYSTEM)
        .with_user(prompt);
    let response = complete_cancellable(backend, &request, cancel).await?;

    let polished = response.text.trim().to_string();
    if polished.len() < draft.len() {
        tracing::warn!(
            draft_len = draft.len(),
            polished_len = polished.len(),
            "Polish shrank the text, keeping the draft"
        );
        return Ok((draft.to_string(), response.usage));
    }
    Ok((polished, response.usage))
}

/// Review one tranche of units with accumulated cross-tranche context
pub(crate) async fn tranche_review_step(
    backend: &dyn CompletionBackend,
    sampling: &SamplingConfig,
    world_brief: &str,
    pre_analysis_report: &str,
    prior_issues: &[Issue],
    already_fixed: &[Issue],
    tranche: &[Chapter],
    cancel: &CancelToken,
) -> Result<(Option<TrancheRecord>, TokenUsage)> {
    let prompt = build_tranche_prompt(
        world_brief,
        pre_analysis_report,
        prior_issues,
        already_fixed,
        tranche,
    );
    let request = CompletionRequest::new(sampling.clone())
        .with_system(REVIEW_SYSTEM)
        .with_user(prompt);
    let response = complete_cancellable(backend, &request, cancel).await?;

    // An unparseable partial verdict is excluded from the combined one; it
    // must neither poison nor pad the aggregate score
    let record = extract_json::<TrancheRecord>(&response.text);
    if record.is_none() {
        tracing::warn!(
            units = tranche.len(),
            "Tranche verdict unparseable, excluding it"
        );
    }
    Ok((record, response.usage))
}

/// Remove a `<tag>...</tag>` block from the text
fn strip_tag_block(text: &str, tag: &str) -> String {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);
    match (text.find(&start_tag), text.find(&end_tag)) {
        (Some(start), Some(end)) if end > start => {
            let mut stripped = String::new();
            stripped.push_str(text[..start].trim_end());
            stripped.push_str(text[end + end_tag.len()..].trim_end());
            stripped
        }
        _ => text.trim().to_string(),
    }
}
