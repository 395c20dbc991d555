//! String helpers for log output

/// One-line preview of `s` for log messages.
///
/// Runs of whitespace (newlines included) collapse to a single space, and the
/// result is cut at a character boundary after `max_chars` characters with
/// "..." appended. Slicing by characters rather than bytes keeps multi-byte
/// UTF-8 input from panicking.
///
/// # Examples
/// ```
/// use agent_relay::utils::string::preview;
///
/// assert_eq!(preview("hello world", 5), "hello...");
/// assert_eq!(preview("line one\n  line two", 40), "line one line two");
/// ```
pub fn preview(s: &str, max_chars: usize) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
