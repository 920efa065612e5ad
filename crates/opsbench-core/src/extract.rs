//! Isolating code bodies from oracle responses.

use std::sync::OnceLock;

use regex::Regex;

fn python_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)```python\s*\n([\s\S]*?)\n```").ok())
        .as_ref()
}

fn bare_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```\s*\n([\s\S]*?)\n```").ok())
        .as_ref()
}

fn any_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[A-Za-z0-9_+-]*[ \t]*\n[\s\S]*?\n?```").ok())
        .as_ref()
}

fn longest_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .max_by_key(|body| body.len())
        .map(|body| body.trim().to_string())
}

/// Extract the code body from an oracle response.
///
/// Preference order: the longest ```` ```python ```` block, the longest bare
/// ```` ``` ```` block, a response that merely starts with a fence, and
/// finally the trimmed text itself. May return an empty string.
pub fn extract_code(text: &str) -> String {
    for re in [python_fence(), bare_fence()].into_iter().flatten() {
        if let Some(body) = longest_capture(re, text) {
            return body;
        }
    }

    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
        if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
            lines.pop();
        }
        return lines.join("\n").trim().to_string();
    }

    trimmed.to_string()
}

/// Remove fenced blocks from prose, leaving the surrounding text.
pub fn strip_code_blocks(text: &str) -> String {
    match any_fence() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}
