//! Splitting chat text to fit the mesh payload limit.

/// Greedy word packing by character count.
///
/// Text within `max_chars` comes back unchanged as one part. Longer text is split on
/// whitespace: words are appended while the space-joined part stays within the limit,
/// and a word that does not fit starts a new part. A single word longer than the limit
/// becomes its own oversized part. No empty parts are produced.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            parts.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Append ` (i/N)` to each part when there is more than one.
pub fn tag_parts(parts: Vec<String>) -> Vec<String> {
    let total = parts.len();
    if total < 2 {
        return parts;
    }
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| format!("{} ({}/{})", part, i + 1, total))
        .collect()
}
