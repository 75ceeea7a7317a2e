//! Topic (hashtag) extraction and format checks

use std::collections::BTreeSet;

/// Normalise an explicit topic: trims whitespace and one leading `#`
pub fn normalize(topic: &str) -> &str {
    let trimmed = topic.trim();
    trimmed.strip_prefix('#').unwrap_or(trimmed)
}

/// Explicit topics must be a single token without `#` or inner whitespace
pub fn is_valid_explicit(topic: &str) -> bool {
    let topic = normalize(topic);
    !topic.is_empty() && !topic.contains('#') && !topic.chars().any(char::is_whitespace)
}

/// Topics written inline in free text as `#word`
pub fn parse_inline(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter_map(|word| word.strip_prefix('#'))
        .map(|topic| topic.trim_end_matches('#'))
        .filter(|topic| !topic.is_empty() && !topic.contains('#'))
        .map(str::to_string)
        .collect()
}

/// First word containing two topics with no separating space (`#a#b`)
pub fn find_glued(text: &str) -> Option<&str> {
    text.split_whitespace().find(|word| is_glued(word))
}

/// Matches `#\S+#\S+` within a single whitespace-free word
fn is_glued(word: &str) -> bool {
    let chars: Vec<char> = word.chars().collect();
    let Some(first) = chars.iter().position(|&c| c == '#') else {
        return false;
    };
    chars
        .iter()
        .enumerate()
        .skip(first + 2)
        .any(|(i, &c)| c == '#' && i + 1 < chars.len())
}

/// Union of explicit and inline topics, deduplicated
pub fn collect(explicit: &[String], description: Option<&str>) -> BTreeSet<String> {
    let mut topics: BTreeSet<String> = explicit
        .iter()
        .map(|t| normalize(t).to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(text) = description {
        topics.extend(parse_inline(text));
    }
    topics
}
