//! Best-effort JSON normalizer for sloppy upstream payloads.
//!
//! The registry source is community-maintained and its payloads occasionally
//! drift from strict JSON. The supported repair grammar is deliberately
//! limited:
//!
//! 1. valid JSON is returned untouched;
//! 2. bare identifier keys are quoted and single quotes become double quotes;
//! 3. as a last resort, the first balanced `[...]` or `{...}` substring is
//!    extracted (and run through step 2 if needed).
//!
//! Returns `None` when no structure is recoverable. Callers on the
//! statistics path substitute an empty collection; the authoritative
//! reconciliation path must propagate the failure instead.

use regex::Regex;

/// Normalize possibly malformed JSON text into parseable JSON.
#[must_use]
pub fn normalize_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if parses(trimmed) {
        return Some(trimmed.to_string());
    }

    if let Some(fixed) = repair(trimmed) {
        return Some(fixed);
    }

    let extracted = extract_balanced(trimmed, '[', ']')
        .or_else(|| extract_balanced(trimmed, '{', '}'))?;
    if parses(&extracted) {
        return Some(extracted);
    }
    repair(&extracted)
}

fn parses(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text).is_ok()
}

/// Quote bare identifier keys and swap single quotes for double quotes.
fn repair(text: &str) -> Option<String> {
    let re = Regex::new(r"([{,]\s*)([A-Za-z_$][A-Za-z0-9_$]*)\s*:").ok()?;
    let fixed = re.replace_all(text, "$1\"$2\":").replace('\'', "\"");
    if parses(&fixed) {
        Some(fixed)
    } else {
        None
    }
}

/// Extract the first balanced `open..close` substring, ignoring brackets
/// inside double-quoted strings.
fn extract_balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + close.len_utf8();
                    return Some(text[start..end].to_string());
                }
            }
            _ => {}
        }
    }

    None
}
