//! Extraction quality heuristics.
//!
//! OCR output ranges from perfect to garbage; these checks decide whether
//! a tier's output is good enough to stop escalating.

use once_cell::sync::Lazy;
use regex::Regex;

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static MANY_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Score extracted text in [0, 1] as the fraction of quality checks passed.
///
/// Checks: minimum length, text density per page, mostly-ASCII content,
/// minimum word count, and plausible mean word length. A scanned contract
/// whose text layer is empty or mangled fails most of these.
pub fn quality_score(text: &str, page_count: Option<i64>) -> f32 {
    let trimmed = text.trim();
    let char_count = trimmed.chars().count();
    let words: Vec<&str> = trimmed.split_whitespace().collect();

    let mut passed = 0u32;
    let mut total = 0u32;

    total += 1;
    if char_count >= 50 {
        passed += 1;
    }

    total += 1;
    match page_count {
        Some(pages) if pages > 0 => {
            if char_count as i64 / pages >= 200 {
                passed += 1;
            }
        }
        // Unknown page count: density cannot be judged, count it as passed
        _ => passed += 1,
    }

    total += 1;
    if char_count > 0 {
        let ascii = trimmed.chars().filter(|c| c.is_ascii()).count();
        if ascii as f32 / char_count as f32 >= 0.85 {
            passed += 1;
        }
    }

    total += 1;
    if words.len() >= 50 {
        passed += 1;
    }

    total += 1;
    if !words.is_empty() {
        let mean_len =
            words.iter().map(|w| w.chars().count()).sum::<usize>() as f32 / words.len() as f32;
        if (2.0..=20.0).contains(&mean_len) {
            passed += 1;
        }
    }

    passed as f32 / total as f32
}

/// Normalize extracted text for chunking and indexing.
///
/// Strips control characters, collapses runs of spaces and blank lines,
/// and normalizes line endings. Page markers are left in place for the
/// chunker.
pub fn clean_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let stripped: String = normalized
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let collapsed = MULTI_SPACE.replace_all(&stripped, " ");
    let collapsed = MANY_NEWLINES.replace_all(&collapsed, "\n\n");
    collapsed.trim().to_string()
}
