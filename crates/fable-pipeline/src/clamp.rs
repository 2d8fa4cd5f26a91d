//! Score-coherence clamp
//!
//! A review must not assert a high score while simultaneously reporting
//! disqualifying findings. The clamp computes the maximum score the
//! deduplicated issue counts allow and pulls the raw average down to it.

use fable_core::{Issue, Severity};

/// Maximum score permitted by the given issue counts
pub fn max_allowed_score(critical: usize, major: usize, minor: usize) -> f32 {
    if critical > 0 {
        return 6.0;
    }
    match major {
        0 => {}
        1 => return 8.0,
        2 => return 7.5,
        _ => return 7.0,
    }
    match minor {
        0 => 10.0,
        1 => 9.0,
        2 => 8.5,
        _ => 8.0,
    }
}

/// Clamp a raw score against the issues present
///
/// Returns the effective score and, when the clamp fired, the cap it
/// applied. The adjustment is logged by the caller with the issue counts so
/// an accepted-despite-findings result can always be reconstructed.
pub fn clamp_score(raw: f32, issues: &[Issue]) -> (f32, Option<f32>) {
    let critical = issues.iter().filter(|i| i.severity == Severity::Critical).count();
    let major = issues.iter().filter(|i| i.severity == Severity::Major).count();
    let minor = issues.iter().filter(|i| i.severity == Severity::Minor).count();

    let cap = max_allowed_score(critical, major, minor);
    if raw > cap {
        (cap, Some(cap))
    } else {
        (raw, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issues_with(critical: usize, major: usize, minor: usize) -> Vec<Issue> {
        let mut issues = Vec::new();
        for i in 0..critical {
            issues.push(Issue::new("c", format!("critical {}", i), Severity::Critical));
        }
        for i in 0..major {
            issues.push(Issue::new("m", format!("major {}", i), Severity::Major));
        }
        for i in 0..minor {
            issues.push(Issue::new("n", format!("minor {}", i), Severity::Minor));
        }
        issues
    }

    #[test]
    fn test_critical_caps_at_six() {
        assert_eq!(max_allowed_score(1, 0, 0), 6.0);
        assert_eq!(max_allowed_score(2, 5, 9), 6.0);
    }

    #[test]
    fn test_major_caps() {
        assert_eq!(max_allowed_score(0, 1, 0), 8.0);
        assert_eq!(max_allowed_score(0, 2, 0), 7.5);
        assert_eq!(max_allowed_score(0, 3, 0), 7.0);
        assert_eq!(max_allowed_score(0, 7, 0), 7.0);
    }

    #[test]
    fn test_minor_caps() {
        assert_eq!(max_allowed_score(0, 0, 1), 9.0);
        assert_eq!(max_allowed_score(0, 0, 2), 8.5);
        assert_eq!(max_allowed_score(0, 0, 3), 8.0);
        assert_eq!(max_allowed_score(0, 0, 6), 8.0);
    }

    #[test]
    fn test_no_issues_no_cap() {
        assert_eq!(max_allowed_score(0, 0, 0), 10.0);
        let (score, cap) = clamp_score(9.6, &[]);
        assert_eq!(score, 9.6);
        assert!(cap.is_none());
    }

    #[test]
    fn test_clamp_never_exceeds_cap_for_any_combination() {
        for critical in 0..3 {
            for major in 0..5 {
                for minor in 0..5 {
                    let issues = issues_with(critical, major, minor);
                    let (score, _) = clamp_score(10.0, &issues);
                    assert!(score <= max_allowed_score(critical, major, minor));
                }
            }
        }
    }

    #[test]
    fn test_low_raw_score_untouched() {
        let issues = issues_with(0, 1, 0);
        let (score, cap) = clamp_score(5.5, &issues);
        assert_eq!(score, 5.5);
        assert!(cap.is_none());
    }
}
