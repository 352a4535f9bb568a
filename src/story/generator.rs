use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::markers::{self, Coverage};
use super::prompt;
use super::{GenerationAttempt, GenerationProgress, StoryError, StoryResult, TranslatedStory};
use crate::llm::{GenerationBackend, GenerationError};
use crate::state::CancelFlag;
use crate::vocab::{VocabularyStore, WordEntry};

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Maximum number of words requested per story
    pub word_limit: usize,
    /// Share of requested words that may stay missing after the last attempt
    pub tolerance: f64,
    pub language: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            word_limit: 300,
            tolerance: 0.10,
            language: "English".to_string(),
        }
    }
}

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Resolves once `cancel` is set.
async fn cancelled(cancel: &CancelFlag) {
    while !cancel.load(Ordering::Relaxed) {
        tokio::time::sleep(CANCEL_POLL).await;
    }
}

/// Missing-word count from which a final attempt is rejected.
pub fn tolerance_threshold(total: usize, tolerance: f64) -> usize {
    ((total as f64 * tolerance).ceil() as usize).max(1)
}

pub struct StoryGenerator {
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn VocabularyStore>,
    config: GeneratorConfig,
}

impl StoryGenerator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn VocabularyStore>,
        config: GeneratorConfig,
    ) -> Self {
        Self { backend, store, config }
    }

    /// Generate a story from the due words, re-prompting until every word
    /// is used or `max_attempts` runs out.
    ///
    /// Backend failures end the call immediately; only missing coverage
    /// is retried.
    pub async fn generate_story<F>(
        &self,
        user_context: &str,
        max_attempts: u32,
        mut on_progress: F,
        cancel: &CancelFlag,
    ) -> Result<StoryResult, StoryError>
    where
        F: FnMut(GenerationProgress),
    {
        let started = Instant::now();
        let max_attempts = max_attempts.max(1);

        let candidates = self
            .store
            .fetch_words_due_for_review(Utc::now(), self.config.word_limit)?;
        if candidates.is_empty() {
            return Err(StoryError::EmptyVocabulary);
        }
        let words: Vec<String> = candidates.iter().map(|e| e.word.clone()).collect();
        let total = words.len();
        let language = self.config.language.as_str();

        tracing::info!("Generating story from {} words (up to {} attempts)", total, max_attempts);

        let mut previous: Option<(GenerationAttempt, Coverage)> = None;
        let mut attempt_number = 0;

        loop {
            attempt_number += 1;
            if cancel.load(Ordering::Relaxed) {
                tracing::info!("Story generation cancelled before attempt {}", attempt_number);
                return Err(StoryError::Cancelled);
            }

            let request = match &previous {
                None => prompt::initial_prompt(&words, user_context, language),
                Some((attempt, coverage)) => {
                    prompt::corrective_prompt(&attempt.generated_text, &coverage.missing, language)
                }
            };

            let text = tokio::select! {
                reply = self.backend.generate(&request) => reply?,
                _ = cancelled(cancel) => {
                    tracing::info!("Story generation cancelled during attempt {}", attempt_number);
                    return Err(StoryError::Cancelled);
                }
            };
            // A reply that lands together with the cancel is discarded
            if cancel.load(Ordering::Relaxed) {
                tracing::info!("Story generation cancelled after attempt {}", attempt_number);
                return Err(StoryError::Cancelled);
            }
            if text.trim().is_empty() {
                return Err(GenerationError::EmptyResponse.into());
            }

            let coverage = markers::coverage(&text, &words);
            let attempt = GenerationAttempt {
                attempt_number,
                total_words_requested: total,
                words_covered_so_far: coverage.covered.len(),
                generated_text: text,
            };

            on_progress(GenerationProgress {
                attempt: attempt_number,
                max_attempts,
                covered: attempt.words_covered_so_far,
                total,
            });
            tracing::info!(
                "Attempt {}/{}: {} of {} words covered",
                attempt_number,
                max_attempts,
                attempt.words_covered_so_far,
                total
            );

            if coverage.is_complete() {
                return self.finish(attempt, coverage, &candidates, started);
            }

            if attempt_number >= max_attempts {
                let threshold = tolerance_threshold(total, self.config.tolerance);
                let missing = coverage.missing.len();
                if missing < threshold {
                    tracing::warn!(
                        "Accepting story with {} missing words (threshold {})",
                        missing,
                        threshold
                    );
                    return self.finish(attempt, coverage, &candidates, started);
                }
                tracing::warn!("Giving up: {} of {} words still missing", missing, total);
                return Err(StoryError::InsufficientCoverage {
                    missing,
                    total,
                    missing_words: coverage.missing,
                });
            }

            previous = Some((attempt, coverage));
        }
    }

    /// Only words that made it into the text are marked as used. A failed
    /// usage write is logged and the story is still returned.
    fn finish(
        &self,
        attempt: GenerationAttempt,
        coverage: Coverage,
        candidates: &[WordEntry],
        started: Instant,
    ) -> Result<StoryResult, StoryError> {
        let used_ids: Vec<_> = candidates
            .iter()
            .filter(|e| coverage.covered.contains(&e.word))
            .map(|e| e.id)
            .collect();
        if let Err(e) = self.store.mark_used(&used_ids, Utc::now()) {
            tracing::warn!("Could not record usage of {} words: {}", used_ids.len(), e);
        }

        let clean_text = markers::strip_markers(&attempt.generated_text);
        let display_text = markers::strip_boundaries(&clean_text);
        let generation_duration_secs = started.elapsed().as_secs_f64();

        tracing::info!(
            "Story ready after {} attempt(s) in {:.1}s",
            attempt.attempt_number,
            generation_duration_secs
        );

        Ok(StoryResult {
            raw_text: attempt.generated_text,
            clean_text,
            display_text,
            covered_words: coverage.covered,
            language: self.config.language.clone(),
            generation_duration_secs,
        })
    }

    pub async fn translate(
        &self,
        story: &StoryResult,
        target_language: &str,
    ) -> Result<TranslatedStory, StoryError> {
        let request = prompt::translation_prompt(&story.clean_text, target_language);
        let text = self.backend.generate(&request).await?;
        let clean_text = markers::strip_markers(&text);
        if clean_text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse.into());
        }
        let display_text = markers::strip_boundaries(&clean_text);
        Ok(TranslatedStory {
            clean_text,
            display_text,
            language: target_language.to_string(),
        })
    }
}
