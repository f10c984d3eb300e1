//! String helpers for logs and reports.

/// Keeps the first `max` characters of `s`, appending `...` when anything was cut.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

/// Like [`truncate`], but the result including the ellipsis fits in `width` characters.
pub fn truncate_to(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        truncate(s, width.saturating_sub(3))
    }
}
