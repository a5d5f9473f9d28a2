/// Longest utterance preview written to logs, in bytes.
pub const PREVIEW_BYTES: usize = 60;

/// Truncate a string to at most `max_bytes` bytes without splitting a multi-byte
/// character. Returns the original string if it already fits.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Short form of utterance text for log lines.
pub fn preview(text: &str) -> String {
    let cut = safe_truncate(text, PREVIEW_BYTES);
    if cut.len() == text.len() {
        text.to_string()
    } else {
        format!("{}...", cut)
    }
}
