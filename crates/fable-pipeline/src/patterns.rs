//! Pre-analysis pattern bank
//!
//! Some problems are only visible in aggregate: a plot-convenience device
//! that fires in half the chapters, a physical gesture repeated until it
//! becomes a tic. These are detected with plain regex scans over the whole
//! manuscript, independent of the completion service, and the findings are
//! prepended to every review tranche's context.
//!
//! Detectors are data, not code: a `(pattern, label, threshold)` tuple where
//! the threshold is the number of distinct units that must match before the
//! detector reports.

use fable_core::Chapter;
use regex::Regex;

/// One data-driven detector
pub struct PatternDetector {
    pub pattern: Regex,
    pub label: String,
    /// Minimum number of distinct units that must match
    pub threshold: usize,
}

impl PatternDetector {
    pub fn new(pattern: &str, label: impl Into<String>, threshold: usize) -> Self {
        Self {
            // Detector patterns are compiled from static or config-reviewed
            // strings; an invalid one is a programming error
            pattern: Regex::new(pattern).unwrap_or_else(|e| {
                panic!("invalid detector pattern {:?}: {}", pattern, e)
            }),
            label: label.into(),
            threshold,
        }
    }
}

/// The stock detector bank
pub fn builtin_detectors() -> Vec<PatternDetector> {
    vec![
        // Plot-convenience devices: suspicious at 3+ units
        PatternDetector::new(r"(?i)\bsuddenly\b", "plot convenience: 'suddenly'", 3),
        PatternDetector::new(r"(?i)\bjust in time\b", "plot convenience: last-moment rescue", 3),
        PatternDetector::new(
            r"(?i)\bas if by (magic|miracle)\b",
            "plot convenience: unexplained resolution",
            3,
        ),
        // Repeated physical gestures: tics at 5+ units
        PatternDetector::new(r"(?i)\bnodded\b", "repeated gesture: nodding", 5),
        PatternDetector::new(r"(?i)\bsighed\b", "repeated gesture: sighing", 5),
        PatternDetector::new(
            r"(?i)\btook a deep breath\b",
            "repeated gesture: deep breaths",
            5,
        ),
        PatternDetector::new(r"(?i)\braised an eyebrow\b", "repeated gesture: eyebrow", 5),
    ]
}

/// Scan the full manuscript and produce the pre-analysis report
///
/// Returns an empty string when nothing crosses its threshold.
pub fn pre_analysis(chapters: &[Chapter], detectors: &[PatternDetector]) -> String {
    let mut report = String::new();

    for detector in detectors {
        let hits: Vec<i32> = chapters
            .iter()
            .filter(|c| detector.pattern.is_match(&c.content))
            .map(|c| c.number)
            .collect();

        if hits.len() >= detector.threshold {
            report.push_str(&format!(
                "- {} appears in {} units ({})\n",
                detector.label,
                hits.len(),
                hits.iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }

    if report.is_empty() {
        report
    } else {
        format!("# AGGREGATE PATTERN FINDINGS\n\n{}", report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chapter(number: i32, content: &str) -> Chapter {
        let mut c = Chapter::new(Uuid::new_v4(), number, format!("Ch {}", number));
        c.set_content(content);
        c
    }

    #[test]
    fn test_below_threshold_is_silent() {
        let chapters = vec![
            chapter(1, "Suddenly the door opened."),
            chapter(2, "Nothing odd here."),
        ];
        assert!(pre_analysis(&chapters, &builtin_detectors()).is_empty());
    }

    #[test]
    fn test_plot_convenience_fires_at_three_units() {
        let chapters = vec![
            chapter(1, "Suddenly the door opened."),
            chapter(2, "Suddenly, rain."),
            chapter(3, "And then, suddenly, silence."),
        ];
        let report = pre_analysis(&chapters, &builtin_detectors());
        assert!(report.contains("'suddenly'"));
        assert!(report.contains("3 units"));
        assert!(report.contains("1, 2, 3"));
    }

    #[test]
    fn test_gesture_needs_five_units() {
        let chapters: Vec<Chapter> = (1..=4)
            .map(|n| chapter(n, "She nodded slowly."))
            .collect();
        assert!(pre_analysis(&chapters, &builtin_detectors()).is_empty());

        let chapters: Vec<Chapter> = (1..=5)
            .map(|n| chapter(n, "She nodded slowly."))
            .collect();
        let report = pre_analysis(&chapters, &builtin_detectors());
        assert!(report.contains("nodding"));
    }

    #[test]
    fn test_counts_units_not_occurrences() {
        // Ten hits inside one unit is still one unit
        let chapters = vec![chapter(1, &"He sighed. ".repeat(10))];
        assert!(pre_analysis(&chapters, &builtin_detectors()).is_empty());
    }

    #[test]
    fn test_custom_detector() {
        let detectors = vec![PatternDetector::new(
            r"(?i)\bconveniently\b",
            "narration admits convenience",
            2,
        )];
        let chapters = vec![
            chapter(1, "Conveniently, a ladder."),
            chapter(2, "The key was conveniently unguarded."),
        ];
        let report = pre_analysis(&chapters, &detectors);
        assert!(report.contains("narration admits convenience"));
    }
}
