use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ImportSummary, NewWord, StoreError, VocabularyStore, WordEntry, WordId};

/// On-disk layout. `next_id` only ever grows, so a deleted id is never
/// handed out again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    next_id: WordId,
    words: Vec<WordEntry>,
}

impl Manifest {
    fn issue_id(&mut self) -> WordId {
        let floor = self.words.iter().map(|e| e.id + 1).max().unwrap_or(1);
        let id = self.next_id.max(floor);
        self.next_id = id + 1;
        id
    }

    fn find_word(&self, word: &str) -> Option<&WordEntry> {
        let key = word.to_lowercase();
        self.words.iter().find(|e| e.word.to_lowercase() == key)
    }
}

/// Files written before the id counter existed hold a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Current(Manifest),
    Bare(Vec<WordEntry>),
}

/// Word dictionary kept in a JSON manifest on disk.
///
/// Mutations work on a copy that replaces the live entries only once the
/// file has been written. A store opened with
/// [`JsonVocabularyStore::in_memory`] never touches the filesystem.
pub struct JsonVocabularyStore {
    path: Option<PathBuf>,
    manifest: Mutex<Manifest>,
}

impl JsonVocabularyStore {
    /// Open the manifest at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let manifest = read_manifest(&path)?;
        tracing::debug!("Opened vocabulary at {} ({} words)", path.display(), manifest.words.len());
        Ok(Self {
            path: Some(path),
            manifest: Mutex::new(manifest),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            manifest: Mutex::new(Manifest::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Manifest> {
        self.manifest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `change` to a copy, persist it, then make it live.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Manifest) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut live = self.lock();
        let mut draft = live.clone();
        let output = change(&mut draft)?;
        if let Some(path) = &self.path {
            write_manifest(path, &draft)?;
        }
        *live = draft;
        Ok(output)
    }
}

fn read_manifest(path: &Path) -> Result<Manifest, StoreError> {
    if !path.exists() {
        return Ok(Manifest::default());
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Manifest::default());
    }
    let manifest = match serde_json::from_str(&data)? {
        ManifestFile::Current(m) => m,
        ManifestFile::Bare(words) => Manifest { next_id: 0, words },
    };
    Ok(manifest)
}

fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(manifest)?;
    std::fs::write(path, data)?;
    Ok(())
}

fn random_tiebreak() -> u64 {
    getrandom::u64().unwrap_or(0)
}

fn validated(word: NewWord) -> Result<NewWord, StoreError> {
    let word = NewWord {
        word: word.word.trim().to_string(),
        translation: word.translation.trim().to_string(),
        transcription: word.transcription.trim().to_string(),
        example: word.example.trim().to_string(),
    };
    if word.word.is_empty() {
        return Err(StoreError::EmptyWord);
    }
    Ok(word)
}

fn apply_fields(entry: &mut WordEntry, word: NewWord) {
    entry.word = word.word;
    entry.translation = word.translation;
    entry.transcription = word.transcription;
    entry.example = word.example;
}

fn new_entry(id: WordId, word: NewWord, now: DateTime<Utc>) -> WordEntry {
    WordEntry {
        id,
        word: word.word,
        translation: word.translation,
        transcription: word.transcription,
        example: word.example,
        date_added: now,
        last_used_at: None,
        usage_rating: 0,
    }
}

fn by_word(entries: &mut [WordEntry]) {
    entries.sort_by(|a, b| a.word.to_lowercase().cmp(&b.word.to_lowercase()));
}

impl VocabularyStore for JsonVocabularyStore {
    fn fetch_words_due_for_review(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WordEntry>, StoreError> {
        let mut due: Vec<WordEntry> = self
            .lock()
            .words
            .iter()
            .filter(|e| e.last_used_at.map_or(true, |used| used <= as_of))
            .cloned()
            .collect();

        // None sorts before Some, so never-used words lead
        due.sort_by_cached_key(|e| (e.last_used_at, random_tiebreak()));
        due.truncate(limit);
        Ok(due)
    }

    fn fetch_all(&self) -> Result<Vec<WordEntry>, StoreError> {
        let mut all = self.lock().words.clone();
        by_word(&mut all);
        Ok(all)
    }

    fn mark_used(&self, ids: &[WordId], date: DateTime<Utc>) -> Result<(), StoreError> {
        let touched = self.mutate(|m| {
            let mut touched = 0usize;
            for entry in m.words.iter_mut().filter(|e| ids.contains(&e.id)) {
                entry.last_used_at = Some(date);
                entry.usage_rating = entry.usage_rating.saturating_add(1);
                touched += 1;
            }
            Ok(touched)
        })?;
        tracing::debug!("Marked {} of {} words as used", touched, ids.len());
        Ok(())
    }

    fn import(&self, rows: Vec<NewWord>) -> Result<ImportSummary, StoreError> {
        let now = Utc::now();
        let summary = self.mutate(|m| {
            let mut summary = ImportSummary::default();
            for row in rows {
                let Ok(row) = validated(row) else {
                    continue;
                };
                let key = row.word.to_lowercase();
                match m.words.iter_mut().find(|e| e.word.to_lowercase() == key) {
                    Some(existing) => {
                        apply_fields(existing, row);
                        summary.updated += 1;
                    }
                    None => {
                        let id = m.issue_id();
                        m.words.push(new_entry(id, row, now));
                        summary.inserted += 1;
                    }
                }
            }
            Ok(summary)
        })?;
        tracing::info!(
            "Imported vocabulary: {} new, {} updated",
            summary.inserted,
            summary.updated
        );
        Ok(summary)
    }

    fn add_word(&self, word: NewWord) -> Result<WordEntry, StoreError> {
        let word = validated(word)?;
        self.mutate(|m| {
            if let Some(existing) = m.find_word(&word.word) {
                return Err(StoreError::Duplicate {
                    word: existing.word.clone(),
                    id: existing.id,
                });
            }
            let entry = new_entry(m.issue_id(), word, Utc::now());
            m.words.push(entry.clone());
            Ok(entry)
        })
    }

    fn update_word(&self, id: WordId, word: NewWord) -> Result<WordEntry, StoreError> {
        let word = validated(word)?;
        self.mutate(|m| {
            if let Some(other) = m.find_word(&word.word).filter(|e| e.id != id) {
                return Err(StoreError::Duplicate {
                    word: other.word.clone(),
                    id: other.id,
                });
            }
            let entry = m
                .words
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or(StoreError::NotFound(id))?;
            apply_fields(entry, word);
            Ok(entry.clone())
        })
    }

    fn delete_word(&self, id: WordId) -> Result<(), StoreError> {
        self.mutate(|m| {
            let before = m.words.len();
            m.words.retain(|e| e.id != id);
            if m.words.len() == before {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }

    fn search(&self, query: &str) -> Result<Vec<WordEntry>, StoreError> {
        let needle = query.trim().to_lowercase();
        let mut found: Vec<WordEntry> = self
            .lock()
            .words
            .iter()
            .filter(|e| {
                needle.is_empty()
                    || e.word.to_lowercase().contains(&needle)
                    || e.translation.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        by_word(&mut found);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn row(word: &str, translation: &str) -> NewWord {
        NewWord {
            word: word.to_string(),
            translation: translation.to_string(),
            ..Default::default()
        }
    }

    fn seeded(words: &[&str]) -> JsonVocabularyStore {
        let store = JsonVocabularyStore::in_memory();
        store
            .import(words.iter().map(|w| row(w, "t")).collect())
            .unwrap();
        store
    }

    #[test]
    fn import_inserts_then_updates_case_insensitively() {
        let store = JsonVocabularyStore::in_memory();
        let first = store.import(vec![row("apple", "manzana"), row("dog", "perro")]).unwrap();
        assert_eq!(first, ImportSummary { inserted: 2, updated: 0 });

        let second = store.import(vec![row("Apple", "pomme"), row("cat", "gato")]).unwrap();
        assert_eq!(second, ImportSummary { inserted: 1, updated: 1 });

        let all = store.fetch_all().unwrap();
        assert_eq!(all.len(), 3);
        let apple = all.iter().find(|e| e.word == "Apple").unwrap();
        assert_eq!(apple.translation, "pomme");
    }

    #[test]
    fn import_skips_blank_words() {
        let store = JsonVocabularyStore::in_memory();
        let summary = store.import(vec![row("  ", "nothing"), row("sun", "sol")]).unwrap();
        assert_eq!(summary.inserted, 1);
    }

    #[test]
    fn due_words_put_unused_first_then_oldest() {
        let store = seeded(&["a", "b", "c", "d"]);
        let all = store.fetch_all().unwrap();
        let id = |w: &str| all.iter().find(|e| e.word == w).unwrap().id;

        let now = Utc::now();
        store.mark_used(&[id("a")], now - Duration::days(3)).unwrap();
        store.mark_used(&[id("b")], now - Duration::days(10)).unwrap();

        let due = store.fetch_words_due_for_review(now, 10).unwrap();
        let order: Vec<&str> = due.iter().map(|e| e.word.as_str()).collect();

        let mut unused = order[..2].to_vec();
        unused.sort();
        assert_eq!(unused, vec!["c", "d"]);
        assert_eq!(&order[2..], &["b", "a"]);
    }

    #[test]
    fn due_words_respect_limit_and_as_of() {
        let store = seeded(&["a", "b", "c"]);
        let all = store.fetch_all().unwrap();
        let now = Utc::now();
        store.mark_used(&[all[0].id], now + Duration::days(1)).unwrap();

        let due = store.fetch_words_due_for_review(now, 10).unwrap();
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|e| e.id != all[0].id));

        let limited = store.fetch_words_due_for_review(now, 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn mark_used_bumps_rating_and_ignores_unknown_ids() {
        let store = seeded(&["a"]);
        let id = store.fetch_all().unwrap()[0].id;
        let now = Utc::now();

        store.mark_used(&[id, 999], now).unwrap();
        store.mark_used(&[id], now).unwrap();

        let entry = &store.fetch_all().unwrap()[0];
        assert_eq!(entry.usage_rating, 2);
        assert_eq!(entry.last_used_at, Some(now));
    }

    #[test]
    fn edit_delete_and_search() {
        let store = seeded(&["house", "mouse", "tree"]);
        let tree = store.search("tree").unwrap().remove(0);

        let edited = store.update_word(tree.id, row("forest", "bosque")).unwrap();
        assert_eq!(edited.word, "forest");
        assert_eq!(edited.date_added, tree.date_added);

        let hits: Vec<String> = store.search("OUSE").unwrap().into_iter().map(|e| e.word).collect();
        assert_eq!(hits, vec!["house".to_string(), "mouse".to_string()]);
        assert_eq!(store.search("bosque").unwrap().len(), 1);

        store.delete_word(edited.id).unwrap();
        assert!(matches!(store.delete_word(edited.id), Err(StoreError::NotFound(_))));
        assert_eq!(store.fetch_all().unwrap().len(), 2);
    }

    #[test]
    fn add_word_rejects_empty() {
        let store = JsonVocabularyStore::in_memory();
        assert!(matches!(store.add_word(row(" ", "x")), Err(StoreError::EmptyWord)));
    }

    #[test]
    fn add_and_rename_refuse_case_insensitive_duplicates() {
        let store = seeded(&["Apple", "pear"]);
        let apple = store.search("apple").unwrap().remove(0);
        let pear = store.search("pear").unwrap().remove(0);

        let err = store.add_word(row("apple", "Apfel")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id, .. } if id == apple.id));

        let err = store.update_word(pear.id, row("APPLE", "x")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id, .. } if id == apple.id));

        // Changing only the case of a word's own spelling is fine
        let renamed = store.update_word(apple.id, row("apple", "Apfel")).unwrap();
        assert_eq!(renamed.word, "apple");
        assert_eq!(store.fetch_all().unwrap().len(), 2);
    }

    #[test]
    fn deleted_ids_are_never_reissued() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocabulary.json");

        let store = JsonVocabularyStore::open(&path).unwrap();
        let a = store.add_word(row("a", "1")).unwrap();
        let b = store.add_word(row("b", "2")).unwrap();
        store.delete_word(b.id).unwrap();
        let c = store.add_word(row("c", "3")).unwrap();
        assert_ne!(c.id, b.id);
        assert!(c.id > a.id);

        store.delete_word(c.id).unwrap();
        drop(store);

        let reopened = JsonVocabularyStore::open(&path).unwrap();
        let d = reopened.add_word(row("d", "4")).unwrap();
        assert!(d.id > c.id);
    }

    #[test]
    fn failed_write_leaves_entries_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocabulary.json");
        let store = JsonVocabularyStore::open(&path).unwrap();
        let word = store.add_word(row("river", "río")).unwrap();

        // A directory in place of the manifest makes every write fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.mark_used(&[word.id], Utc::now()).is_err());
        assert!(store.add_word(row("lake", "lago")).is_err());
        assert!(store.delete_word(word.id).is_err());

        let all = store.fetch_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].last_used_at, None);
        assert_eq!(all[0].usage_rating, 0);
    }

    #[test]
    fn bare_array_manifest_still_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocabulary.json");
        let seed = JsonVocabularyStore::in_memory();
        seed.add_word(row("old", "alt")).unwrap();
        let words = seed.fetch_all().unwrap();
        std::fs::write(&path, serde_json::to_string(&words).unwrap()).unwrap();

        let store = JsonVocabularyStore::open(&path).unwrap();
        assert_eq!(store.fetch_all().unwrap(), words);
        let next = store.add_word(row("new", "neu")).unwrap();
        assert_eq!(next.id, words[0].id + 1);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vocabulary.json");

        let store = JsonVocabularyStore::open(&path).unwrap();
        store.add_word(row("river", "río")).unwrap();
        let id = store.fetch_all().unwrap()[0].id;
        store.mark_used(&[id], Utc::now()).unwrap();
        drop(store);

        let reopened = JsonVocabularyStore::open(&path).unwrap();
        let all = reopened.fetch_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].word, "river");
        assert_eq!(all[0].usage_rating, 1);

        let next = reopened.add_word(row("lake", "lago")).unwrap();
        assert_eq!(next.id, id + 1);
    }
}
