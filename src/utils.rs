/// Truncate a string by character count, not byte count.
/// This keeps multi-byte characters (emoji markers in alerts) intact.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

/// Fenced code block for alert bodies
pub fn code_block(text: &str) -> String {
    format!("```\n{}\n```", text.trim_end())
}
