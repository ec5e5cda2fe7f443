//! Field validators for user-supplied strings.
//!
//! Values are trimmed before checking. Printable checks come in single-line
//! and multi-line flavors; the multi-line variant additionally admits
//! newlines, carriage returns, and tabs. Validators record failures into
//! [`ValidationErrors`] keyed by field name and return the trimmed value, so
//! call sites chain them the same way the claim and grid-settings forms do.

use crate::error::ValidationErrors;

/// Colors accepted by name alongside `#rgb` / `#rrggbb` hex values.
const NAMED_COLORS: [&str; 12] = [
    "black", "white", "red", "blue", "green", "orange", "yellow", "purple", "gray", "brown",
    "navy", "gold",
];

/// Trim and require a printable single-line value.
pub fn printable(errors: &mut ValidationErrors, field: &str, value: &str) -> String {
    let value = value.trim();
    if value.chars().any(|c| c.is_control()) {
        errors.add(field, "must only contain printable characters");
    }
    value.to_string()
}

/// Trim and require a printable value, allowing newlines and tabs.
pub fn printable_with_newline(errors: &mut ValidationErrors, field: &str, value: &str) -> String {
    let value = value.trim();
    if value.chars().any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t')) {
        errors.add(field, "must only contain printable characters");
    }
    value.to_string()
}

/// Require at least one letter, digit, or underscore.
pub fn contains_word_char(errors: &mut ValidationErrors, field: &str, value: &str) {
    if !value.chars().any(|c| c.is_alphanumeric() || c == '_') {
        errors.add(field, "must contain at least one letter or number");
    }
}

/// Cap the value at `max` characters.
pub fn max_length(errors: &mut ValidationErrors, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(field, format!("must be {max} characters or fewer"));
    }
}

/// Require a non-empty value after trimming.
pub fn not_empty(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, "is required");
    }
}

/// Trim and require a team color: `#rgb`, `#rrggbb`, or a named color.
/// An empty value means "no color" and passes.
pub fn color(errors: &mut ValidationErrors, field: &str, value: &str) -> String {
    let value = value.trim();
    if value.is_empty() || is_color(value) {
        return value.to_string();
    }
    errors.add(field, "must be a valid color");
    value.to_string()
}

fn is_color(value: &str) -> bool {
    if let Some(hex) = value.strip_prefix('#') {
        return matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    NAMED_COLORS.contains(&value.to_ascii_lowercase().as_str())
}
