use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::state::AppState;
use crate::vocab::{csv, ImportSummary, NewWord, WordEntry, WordId};

/// Fields to change on an existing word; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct WordPatch {
    pub word: Option<String>,
    pub translation: Option<String>,
    pub transcription: Option<String>,
    pub example: Option<String>,
}

pub fn do_import_csv(state: &AppState, path: &Path) -> Result<ImportSummary> {
    let rows = csv::read_csv_file(path)?;
    let count = rows.len();
    let summary = state
        .store
        .import(rows)
        .with_context(|| format!("Failed to import {}", path.display()))?;
    tracing::info!(
        "Imported {} rows from {}: {} new, {} updated",
        count,
        path.display(),
        summary.inserted,
        summary.updated
    );
    Ok(summary)
}

pub fn do_list_words(state: &AppState, query: Option<&str>) -> Result<Vec<WordEntry>> {
    let words = match query.map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => state.store.search(q)?,
        None => state.store.fetch_all()?,
    };
    Ok(words)
}

/// The words the next story would be built from.
pub fn do_due_words(state: &AppState, limit: usize) -> Result<Vec<WordEntry>> {
    Ok(state.store.fetch_words_due_for_review(Utc::now(), limit)?)
}

pub fn do_add_word(state: &AppState, word: NewWord) -> Result<WordEntry> {
    let entry = state.store.add_word(word)?;
    tracing::info!("Added word #{}: {}", entry.id, entry.word);
    Ok(entry)
}

pub fn do_edit_word(state: &AppState, id: WordId, patch: WordPatch) -> Result<WordEntry> {
    let current = state
        .store
        .fetch_all()?
        .into_iter()
        .find(|e| e.id == id)
        .with_context(|| format!("No word with id {}", id))?;

    let updated = NewWord {
        word: patch.word.unwrap_or(current.word),
        translation: patch.translation.unwrap_or(current.translation),
        transcription: patch.transcription.unwrap_or(current.transcription),
        example: patch.example.unwrap_or(current.example),
    };
    let entry = state.store.update_word(id, updated)?;
    tracing::info!("Updated word #{}", id);
    Ok(entry)
}

pub fn do_delete_word(state: &AppState, id: WordId) -> Result<()> {
    state.store.delete_word(id)?;
    tracing::info!("Deleted word #{}", id);
    Ok(())
}
