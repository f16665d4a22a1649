//! Page text normalization.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Separator placed between the text of consecutive pages.
pub const PAGE_SEPARATOR: &str = "\n\n";

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

/// Normalize the text of a single page.
///
/// Line endings become `\n`, the text is put in Unicode NFC form, runs of
/// blank lines collapse to a single blank line, and surrounding whitespace is
/// trimmed.
pub fn normalize_page_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let composed: String = unified.nfc().collect();
    let collapsed = BLANK_RUNS.replace_all(&composed, "\n\n");
    collapsed.trim().to_string()
}

/// Prepare raw page text according to the preprocessing flag.
///
/// Returns `None` when nothing but whitespace is left, so callers can skip
/// the page entirely.
pub(crate) fn prepare_page_text(raw: String, preprocess: bool) -> Option<String> {
    let text = if preprocess {
        normalize_page_text(&raw)
    } else {
        raw
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Join non-empty segments with [`PAGE_SEPARATOR`].
pub(crate) fn join_segments<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut output = String::new();
    for segment in segments {
        let segment = segment.as_ref();
        if segment.is_empty() {
            continue;
        }
        if !output.is_empty() {
            output.push_str(PAGE_SEPARATOR);
        }
        output.push_str(segment);
    }
    output
}
