pub mod generator;
pub mod markers;
pub mod prompt;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::llm::GenerationError;
use crate::vocab::StoreError;

pub use generator::{GeneratorConfig, StoryGenerator};

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("The vocabulary has no words to build a story from")]
    EmptyVocabulary,

    #[error("Story generation failed: {0}")]
    GenerationBackend(#[from] GenerationError),

    #[error("The story still misses {missing} of {total} words after all attempts")]
    InsufficientCoverage {
        missing: usize,
        total: usize,
        missing_words: Vec<String>,
    },

    #[error("Story generation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reported after every generation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenerationProgress {
    pub attempt: u32,
    pub max_attempts: u32,
    pub covered: usize,
    pub total: usize,
}

/// Working value of one iteration of the coverage loop
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub total_words_requested: usize,
    pub words_covered_so_far: usize,
    pub generated_text: String,
}

/// A finished story.
#[derive(Debug, Clone, Serialize)]
pub struct StoryResult {
    /// Backend output with word markers and sentence breaks
    pub raw_text: String,
    /// Word markers removed, sentence breaks kept
    pub clean_text: String,
    pub display_text: String,
    pub covered_words: Vec<String>,
    pub language: String,
    pub generation_duration_secs: f64,
}

impl StoryResult {
    pub fn sentences(&self) -> Vec<String> {
        markers::split_sentences(&self.clean_text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslatedStory {
    pub clean_text: String,
    pub display_text: String,
    pub language: String,
}

impl TranslatedStory {
    pub fn sentences(&self) -> Vec<String> {
        markers::split_sentences(&self.clean_text)
    }
}

/// A story plus its translation into one fixed language, fetched on
/// first request only. A different language needs a new session.
pub struct StorySession {
    story: StoryResult,
    target_language: String,
    translation: OnceCell<TranslatedStory>,
}

impl StorySession {
    pub fn new(story: StoryResult, target_language: impl Into<String>) -> Self {
        Self {
            story,
            target_language: target_language.into(),
            translation: OnceCell::new(),
        }
    }

    pub fn story(&self) -> &StoryResult {
        &self.story
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    pub async fn translation(
        &self,
        generator: &StoryGenerator,
    ) -> Result<&TranslatedStory, StoryError> {
        self.translation
            .get_or_try_init(|| generator.translate(&self.story, &self.target_language))
            .await
    }
}
