pub mod csv;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::JsonVocabularyStore;

pub type WordId = u64;

/// A dictionary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordEntry {
    pub id: WordId,
    pub word: String,
    pub translation: String,
    #[serde(default)]
    pub transcription: String,
    #[serde(default)]
    pub example: String,
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_rating: u32,
}

/// Row shape shared by CSV import and manual entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewWord {
    pub word: String,
    pub translation: String,
    pub transcription: String,
    pub example: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Word not found: {0}")]
    NotFound(WordId),

    #[error("Word must not be empty")]
    EmptyWord,

    #[error("'{word}' is already in the dictionary as #{id}")]
    Duplicate { word: String, id: WordId },

    #[error("Vocabulary file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vocabulary file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Query and mutation surface of the word dictionary.
///
/// The story generator only needs `fetch_words_due_for_review` and
/// `mark_used`; the rest backs the dictionary commands.
pub trait VocabularyStore: Send + Sync {
    /// Never-used words first, then oldest `last_used_at`, random among ties.
    /// Words last used after `as_of` are not due and are left out.
    fn fetch_words_due_for_review(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WordEntry>, StoreError>;

    fn fetch_all(&self) -> Result<Vec<WordEntry>, StoreError>;

    fn mark_used(&self, ids: &[WordId], date: DateTime<Utc>) -> Result<(), StoreError>;

    fn import(&self, rows: Vec<NewWord>) -> Result<ImportSummary, StoreError>;

    /// Fails with `Duplicate` when the word exists already, ignoring case.
    fn add_word(&self, word: NewWord) -> Result<WordEntry, StoreError>;

    fn update_word(&self, id: WordId, word: NewWord) -> Result<WordEntry, StoreError>;

    fn delete_word(&self, id: WordId) -> Result<(), StoreError>;

    fn search(&self, query: &str) -> Result<Vec<WordEntry>, StoreError>;
}
