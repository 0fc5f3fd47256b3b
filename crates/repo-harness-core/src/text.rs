//! Text helpers applied before content reaches a provider or the store.

/// Remove NUL characters, which text columns reject.
///
/// Returns the input unchanged (without reallocating the contents) when
/// there is nothing to strip.
pub fn strip_nul(text: &str) -> String {
    if text.contains('\0') {
        text.replace('\0', "")
    } else {
        text.to_string()
    }
}

/// Truncate `text` to at most `max_chars` characters.
///
/// Counts `char`s rather than bytes so multi-byte content is never split.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
