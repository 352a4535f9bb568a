//! Marker conventions shared by prompts, coverage checks and playback.
//!
//! Generated stories wrap every vocabulary word in asterisks (`*word*`)
//! and end every sentence with [`SENTENCE_BREAK`].

pub const WORD_MARKER: char = '*';
pub const SENTENCE_BREAK: &str = "[BR]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    pub covered: Vec<String>,
    pub missing: Vec<String>,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Split `words` by whether their wrapped form occurs in `text`, ignoring case.
pub fn coverage<S: AsRef<str>>(text: &str, words: &[S]) -> Coverage {
    let haystack = text.to_lowercase();
    let mut result = Coverage::default();
    for word in words {
        let word = word.as_ref();
        let needle = format!("{WORD_MARKER}{}{WORD_MARKER}", word.to_lowercase());
        if haystack.contains(&needle) {
            result.covered.push(word.to_string());
        } else {
            result.missing.push(word.to_string());
        }
    }
    result
}

/// Drop the word markers, keeping sentence breaks.
pub fn strip_markers(text: &str) -> String {
    text.chars().filter(|&c| c != WORD_MARKER).collect()
}

/// Text for display: no markers, no sentence breaks, single spaces.
pub fn strip_boundaries(text: &str) -> String {
    strip_markers(text)
        .replace(SENTENCE_BREAK, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn split_sentences(text: &str) -> Vec<String> {
    text.split(SENTENCE_BREAK)
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn join_sentences<S: AsRef<str>>(sentences: &[S]) -> String {
    sentences
        .iter()
        .map(|s| format!("{}{}", s.as_ref(), SENTENCE_BREAK))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical layout: each sentence with collapsed whitespace, followed by a break.
pub fn normalize(text: &str) -> String {
    join_sentences(&split_sentences(text))
}
