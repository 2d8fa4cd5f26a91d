//! Structured-result extraction from raw completion text
//!
//! Completions are prose with a structured record buried somewhere inside.
//! `extract_json` scans for brace-delimited blobs and parses the first one
//! that deserializes; `extract_or` wraps it into a total function that hands
//! back a deterministic fallback instead of ever failing its caller.

use serde::de::DeserializeOwned;

/// Find and parse the first brace-delimited JSON blob that deserializes as `T`
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(end) = balanced_end(bytes, open) {
            let candidate = &text[open..=end];
            if let Ok(value) = serde_json::from_str::<T>(candidate) {
                return Some(value);
            }
        }
        start = open + 1;
    }
    None
}

/// Extract a structured record or fall back deterministically
///
/// The fallback closure receives the raw text so callers can echo it into
/// the fallback record. A warning is logged whenever the fallback is taken;
/// silent degradation is never permitted.
pub fn extract_or<T: DeserializeOwned>(text: &str, fallback: impl FnOnce(&str) -> T) -> T {
    match extract_json::<T>(text) {
        Some(value) => value,
        None => {
            tracing::warn!(
                chars = text.len(),
                type_name = std::any::type_name::<T>(),
                "No parseable structured record in completion output, using fallback"
            );
            fallback(text)
        }
    }
}

/// Extract the trimmed content of an XML-style `<tag>...</tag>` block
pub fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = text.find(&start_tag)?;
    let end = text.find(&end_tag)?;

    let content_start = start + start_tag.len();
    if content_start >= end {
        return None;
    }

    Some(text[content_start..end].trim().to_string())
}

/// Index of the brace closing the one at `open`, respecting JSON strings
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
