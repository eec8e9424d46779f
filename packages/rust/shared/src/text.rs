//! Small text helpers shared by extraction and synthesis.

/// Truncate `s` to at most `max_chars` characters, never splitting a
/// UTF-8 sequence.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
