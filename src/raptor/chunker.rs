use regex::Regex;

/// Split raw text into paragraphs on blank lines. Paragraphs are trimmed and
/// empty ones dropped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let pieces: Vec<&str> = match Regex::new(r"\n[ \t]*\n") {
        Ok(re) => re.split(text).collect(),
        Err(_) => text.split("\n\n").collect(),
    };
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whitespace-separated word count
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Merge short paragraphs forward.
///
/// A paragraph with fewer than `min_words` words absorbs its successor
/// (joined with a space) and is checked again, so several short paragraphs
/// can fold into one. The last paragraph is never merged forward.
pub fn merge_short_fragments(paragraphs: &[String], min_words: usize) -> Vec<String> {
    let mut merged: Vec<String> = paragraphs.to_vec();
    let mut i = 0;
    while i + 1 < merged.len() {
        if count_words(&merged[i]) < min_words {
            let next = merged.remove(i + 1);
            let current = &mut merged[i];
            current.push(' ');
            current.push_str(&next);
        } else {
            i += 1;
        }
    }
    merged
}
