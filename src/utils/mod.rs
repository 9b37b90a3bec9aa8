pub mod logging;

/// Truncate `text` to at most `max_chars` characters, appending an ellipsis when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::snippet;

    #[test]
    fn snippet_keeps_short_text() {
        assert_eq!(snippet("  crib rails  ", 20), "crib rails");
    }

    #[test]
    fn snippet_cuts_on_char_boundary() {
        assert_eq!(snippet("héllo wörld", 5), "héllo…");
    }
}
