//! Prompt builders for pipeline steps
//!
//! Every prompt is assembled from the same ingredients: the world-model
//! brief, the unit plan, and whatever corrective context the current loop
//! iteration carries. Nothing else may smuggle state between steps.

use crate::steps::SurgicalPlan;
use fable_core::{Chapter, Issue};

pub(crate) fn build_writer_prompt(
    chapter: &Chapter,
    world_brief: &str,
    prior_continuity: Option<&str>,
    surgical: Option<&SurgicalPlan>,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(world_brief);
    prompt.push_str(&format!(
        "\n# UNIT {}: {}\n\n## Plan\n\n{}\n",
        chapter.number, chapter.title, chapter.plan
    ));

    if let Some(continuity) = prior_continuity {
        prompt.push_str("\n## Continuity entering this unit\n\n");
        prompt.push_str(continuity);
        prompt.push('\n');
    }

    if let Some(plan) = surgical {
        prompt.push_str("\n## CORRECTIVE INSTRUCTIONS (from the previous rejected draft)\n\n");
        prompt.push_str(&format!("Diagnosis: {}\n", plan.diagnosis));
        prompt.push_str(&format!("Procedure: {}\n", plan.procedure));
        prompt.push_str(&format!("Target outcome: {}\n", plan.target_outcome));
    }

    prompt.push_str(
        "\nWrite the full unit text. After the prose, emit a <continuity> block \
         describing each character's location, injuries and possessions at the \
         end of the unit.\n",
    );
    prompt
}

pub(crate) fn build_editor_prompt(chapter: &Chapter, world_brief: &str, draft: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(world_brief);
    prompt.push_str(&format!(
        "\n# UNIT {} PLAN\n\n{}\n\n# DRAFT\n\n{}\n",
        chapter.number, chapter.plan, draft
    ));
    prompt.push_str(
        "\nScore the draft 1-10 against the plan and world model. Reply with one \
         JSON object: {\"score\": <number>, \"surgical_plan\": {\"diagnosis\", \
         \"procedure\", \"target_outcome\"}}. Omit surgical_plan if the draft \
         needs no structural work.\n",
    );
    prompt
}

pub(crate) fn build_polish_prompt(draft: &str, locale: &str) -> String {
    let rules = match locale {
        "fr" => {
            "Apply French typography: guillemets for dialogue, non-breaking \
             space before ; : ! ?, spelled-out numbers under one hundred."
        }
        "de" => "Apply German typography: \u{201e}low-high\u{201c} quotation marks.",
        _ => "Apply English typography: curly quotes, em dashes for interruptions.",
    };

    format!(
        "{}\nKeep the register consistent. Do not cut scenes, dialogue or \
         description; the polished text must not be shorter than the draft. \
         Return only the polished text.\n\n# DRAFT\n\n{}\n",
        rules, draft
    )
}

pub(crate) fn build_tranche_prompt(
    world_brief: &str,
    pre_analysis_report: &str,
    prior_issues: &[Issue],
    already_fixed: &[Issue],
    tranche: &[Chapter],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(world_brief);

    if !pre_analysis_report.is_empty() {
        prompt.push('\n');
        prompt.push_str(pre_analysis_report);
    }

    if !prior_issues.is_empty() {
        prompt.push_str("\n# ISSUES ALREADY RAISED (do not re-report)\n\n");
        prompt.push_str(&summarize_issues(prior_issues));
    }

    if !already_fixed.is_empty() {
        prompt.push_str("\n# ISSUES FIXED IN EARLIER PASSES (do not re-report)\n\n");
        prompt.push_str(&summarize_issues(already_fixed));
    }

    prompt.push_str("\n# UNITS UNDER REVIEW\n");
    for chapter in tranche {
        prompt.push_str(&format!(
            "\n## Unit {}: {}\n\n{}\n",
            chapter.number, chapter.title, chapter.content
        ));
    }

    prompt.push_str(
        "\nReview these units for consistency, pacing and quality in the context \
         of the whole manuscript. Reply with one JSON object: {\"score\": <0-10>, \
         \"issues\": [{\"category\", \"description\", \"severity\": \
         \"critical|major|minor\", \"affected_units\": [..], \
         \"correction_instructions\"}]}.\n",
    );
    prompt
}

pub(crate) fn summarize_issues(issues: &[Issue]) -> String {
    let mut summary = String::new();
    for issue in issues {
        summary.push_str(&format!(
            "- [{}/{}] {} (units {})\n",
            issue.severity,
            issue.category,
            issue.description,
            issue
                .affected_units
                .iter()
                .map(|u| u.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use fable_core::Severity;
    use uuid::Uuid;

    #[test]
    fn test_writer_prompt_carries_continuity_and_surgery() {
        let chapter = Chapter::new(Uuid::new_v4(), 2, "The Crossing").with_plan("Cross the river");
        let plan = SurgicalPlan {
            diagnosis: "Stakes unclear".to_string(),
            procedure: "Open on the flood".to_string(),
            target_outcome: "Tension from line one".to_string(),
        };

        let prompt = build_writer_prompt(&chapter, "# WORLD MODEL\n", Some("Irena: wounded"), Some(&plan));
        assert!(prompt.contains("Cross the river"));
        assert!(prompt.contains("Irena: wounded"));
        assert!(prompt.contains("Stakes unclear"));
        assert!(prompt.contains("<continuity>"));
    }

    #[test]
    fn test_tranche_prompt_suppresses_known_issues() {
        let issue = Issue::new("continuity", "Sword vanishes", Severity::Major).with_units([3]);
        let fixed = Issue::new("pacing", "Slow middle", Severity::Minor).with_units([5]);

        let prompt = build_tranche_prompt("brief", "", &[issue], &[fixed], &[]);
        assert!(prompt.contains("ISSUES ALREADY RAISED"));
        assert!(prompt.contains("Sword vanishes"));
        assert!(prompt.contains("FIXED IN EARLIER PASSES"));
        assert!(prompt.contains("Slow middle"));
    }

    #[test]
    fn test_polish_prompt_localizes() {
        assert!(build_polish_prompt("text", "fr").contains("guillemets"));
        assert!(build_polish_prompt("text", "en").contains("curly quotes"));
    }
}
