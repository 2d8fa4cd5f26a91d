//! Issue deduplication
//!
//! Two issues are duplicates when they share a category and their
//! descriptions overlap in normalized keywords. The overlap measure is a
//! heuristic (it can over-merge shared vocabulary and under-merge
//! paraphrases), so the threshold is configuration, not a constant here.

use fable_core::Issue;
use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "their", "there", "this", "to", "was",
    "were", "which", "with",
];

/// Lowercased, punctuation-stripped, stop-word-free keyword set
pub fn normalized_keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard similarity of the two keyword sets
pub fn keyword_similarity(a: &str, b: &str) -> f32 {
    let ka = normalized_keywords(a);
    let kb = normalized_keywords(b);
    if ka.is_empty() && kb.is_empty() {
        return 1.0;
    }
    let intersection = ka.intersection(&kb).count();
    let union = ka.union(&kb).count();
    intersection as f32 / union as f32
}

/// Merge duplicate issues
///
/// Duplicates merge by unioning affected units and appending correction
/// detail; nothing is discarded. The result keeps first-seen order and the
/// operation is idempotent.
pub fn dedup_issues(issues: Vec<Issue>, similarity_threshold: f32) -> Vec<Issue> {
    let mut retained: Vec<Issue> = Vec::new();

    for issue in issues {
        let duplicate_of = retained.iter_mut().find(|kept| {
            kept.category == issue.category
                && keyword_similarity(&kept.description, &issue.description)
                    >= similarity_threshold
        });
        match duplicate_of {
            Some(kept) => kept.merge(&issue),
            None => retained.push(issue),
        }
    }

    retained
}

#[cfg(test)]
mod tests {
    use super::*;
    use fable_core::Severity;
    use std::collections::BTreeSet;

    fn issue(category: &str, description: &str, units: &[i32]) -> Issue {
        Issue::new(category, description, Severity::Major).with_units(units.iter().copied())
    }

    #[test]
    fn test_keywords_normalize() {
        let keywords = normalized_keywords("The sword, which vanished: IN unit seven!");
        assert!(keywords.contains("sword"));
        assert!(keywords.contains("vanished"));
        assert!(keywords.contains("unit"));
        assert!(!keywords.contains("the"));
        assert!(!keywords.contains("in"));
    }

    #[test]
    fn test_similar_same_category_merges() {
        let issues = vec![
            issue("continuity", "The sword vanished between chapters", &[3]),
            issue("continuity", "Sword vanished again without explanation", &[5]),
        ];
        let deduped = dedup_issues(issues, 0.3);
        assert_eq!(deduped.len(), 1);
        assert_eq!(
            deduped[0].affected_units,
            BTreeSet::from([3, 5]),
        );
    }

    #[test]
    fn test_different_category_never_merges() {
        let issues = vec![
            issue("continuity", "The sword vanished between chapters", &[3]),
            issue("pacing", "The sword vanished between chapters", &[3]),
        ];
        assert_eq!(dedup_issues(issues, 0.3).len(), 2);
    }

    #[test]
    fn test_dissimilar_descriptions_kept_apart() {
        let issues = vec![
            issue("continuity", "The sword vanished between chapters", &[3]),
            issue("continuity", "Weather flips from winter to summer overnight", &[8]),
        ];
        assert_eq!(dedup_issues(issues, 0.5).len(), 2);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let issues = vec![
            issue("continuity", "The sword vanished between chapters", &[3]),
            issue("continuity", "Sword vanished without explanation", &[5]),
            issue("pacing", "Middle chapters drag badly", &[10, 11]),
        ];
        let once = dedup_issues(issues, 0.3);
        let twice = dedup_issues(once.clone(), 0.3);

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.affected_units, b.affected_units);
            assert_eq!(a.description, b.description);
            assert_eq!(a.correction_instructions, b.correction_instructions);
        }
    }

    #[test]
    fn test_merge_preserves_all_units() {
        let issues = vec![
            issue("continuity", "Sword vanished from the scene", &[1, 2]),
            issue("continuity", "Sword vanished from the scene", &[2, 3]),
            issue("continuity", "Sword vanished from the scene", &[9]),
        ];
        let deduped = dedup_issues(issues, 0.9);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].affected_units, BTreeSet::from([1, 2, 3, 9]));
    }
}
