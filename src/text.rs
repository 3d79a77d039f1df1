/// Collapses runs of whitespace (including newlines) into single spaces and trims the result.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalizes a message before pattern matching.
///
/// Non-ASCII characters (emoji, arrows, superscripts) are dropped first, then the `:-`
/// artifact that those removals tend to leave behind, and finally everything except ASCII
/// alphanumerics, whitespace and `.`, `:`, `@`, `/`, `-`.
pub fn clean_message(raw: &str) -> String {
    let ascii: String = raw.chars().filter(char::is_ascii).collect();
    ascii
        .replace(":-", "")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || ".:@/-".contains(*c))
        .collect()
}
