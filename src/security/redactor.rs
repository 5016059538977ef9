//! Statement redaction.
//!
//! Failed statements are attached to errors and logs as a short preview.
//! The preview never contains literal values, credentials or parameters.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum characters kept in a statement preview.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// Placeholder for redacted values.
const MASK: &str = "?";

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").unwrap_or_else(|_| unreachable!()));

static DOLLAR_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\$[\s\S]*?\$\$").unwrap_or_else(|_| unreachable!()));

static URL_CREDENTIALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://[^:/@\s]+:[^@\s]+@").unwrap_or_else(|_| unreachable!()));

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|passwd|secret|token|api_key)\b(\s*=?\s*)\S+")
        .unwrap_or_else(|_| unreachable!())
});

static NUMERIC_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap_or_else(|_| unreachable!()));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap_or_else(|_| unreachable!()));

/// Redacts and truncates a statement for diagnostics.
///
/// Bind parameters (`$1`) are positional and carry no values, so they are
/// kept; literals and credentials are masked.
#[must_use]
pub fn statement_preview(statement: &str) -> String {
    let redacted = redact_statement(statement);
    truncate(&redacted, PREVIEW_MAX_CHARS)
}

/// Masks literal values and credentials in a statement.
#[must_use]
pub fn redact_statement(statement: &str) -> String {
    let text = DOLLAR_QUOTED.replace_all(statement, "$$$$?$$$$");
    let text = URL_CREDENTIALS.replace_all(&text, "://***@");
    let text = STRING_LITERAL.replace_all(&text, format!("'{MASK}'").as_str());
    let text = SECRET_ASSIGNMENT.replace_all(&text, format!("$1$2{MASK}").as_str());
    let text = mask_numbers(&text);
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Masks numeric literals but leaves `$n` bind placeholders intact.
fn mask_numbers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in NUMERIC_LITERAL.find_iter(text) {
        let preceded_by_placeholder = text[..m.start()].ends_with('$');
        let part_of_identifier = text[..m.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');
        out.push_str(&text[last..m.start()]);
        if preceded_by_placeholder || part_of_identifier {
            out.push_str(m.as_str());
        } else {
            out.push_str(MASK);
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Truncates on a character boundary, appending an ellipsis.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}...")
}
