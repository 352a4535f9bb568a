use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::llm::{GeminiClient, GenerationBackend, GenerationError};
use crate::state::{AppState, AppStatus, Settings};
use crate::story::{StoryGenerator, StoryResult, StorySession, TranslatedStory};
use crate::vocab::VocabularyStore;

/// Puts the app back to idle however the guarded operation ends.
pub(crate) struct StatusGuard<'a> {
    state: &'a AppState,
}

impl<'a> StatusGuard<'a> {
    pub(crate) fn enter(state: &'a AppState, status: AppStatus) -> Result<Self> {
        let mut current = crate::state::lock(&state.status);
        if *current != AppStatus::Idle {
            anyhow::bail!("Cannot start {:?}: app is not idle (current: {:?})", status, *current);
        }
        *current = status;
        Ok(Self { state })
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.state.set_status(AppStatus::Idle);
    }
}

pub fn generation_backend(settings: &Settings) -> Result<Arc<dyn GenerationBackend>> {
    let api_key = settings
        .generation
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or(GenerationError::MissingApiKey)?;
    let client = GeminiClient::new(
        api_key,
        settings.generation.model.clone(),
        settings.generation.timeout(),
    )
    .context("Failed to build generation client")?;
    Ok(Arc::new(client))
}

pub fn build_generator(
    settings: &Settings,
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn VocabularyStore>,
) -> StoryGenerator {
    StoryGenerator::new(backend, store, settings.generation.generator_config())
}

/// Generate a story from the due words. `attempts` overrides the stored
/// attempt budget.
pub async fn do_generate_story(
    state: &AppState,
    generator: &StoryGenerator,
    user_context: &str,
    attempts: Option<u32>,
) -> Result<StoryResult> {
    let _status = StatusGuard::enter(state, AppStatus::Generating)?;
    state.cancel.store(false, Ordering::SeqCst);

    let max_attempts = attempts.unwrap_or(state.settings().generation.max_attempts);
    let story = generator
        .generate_story(
            user_context,
            max_attempts,
            |progress| {
                tracing::info!(
                    "Generation progress: attempt {}/{}, {}/{} words",
                    progress.attempt,
                    progress.max_attempts,
                    progress.covered,
                    progress.total
                );
            },
            &state.cancel,
        )
        .await?;
    Ok(story)
}

pub fn do_cancel_generation(state: &AppState) {
    if state.status() == AppStatus::Generating {
        tracing::info!("Cancelling story generation");
    }
    state.cancel.store(true, Ordering::SeqCst);
}

/// Session for a new story, translating into the configured language.
pub fn do_open_session(state: &AppState, story: StoryResult) -> StorySession {
    StorySession::new(story, state.settings().generation.translation_language)
}

/// Translation of the session's story, requested once and reused.
pub async fn do_translate_story<'s>(
    generator: &StoryGenerator,
    session: &'s StorySession,
) -> Result<&'s TranslatedStory> {
    let translated = session.translation(generator).await.with_context(|| {
        format!("Failed to translate story into {}", session.target_language())
    })?;
    Ok(translated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{JsonVocabularyStore, NewWord};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    /// Marks every word from the prompt's list, or answers translations plainly.
    struct CooperativeBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationBackend for CooperativeBackend {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let words: Vec<&str> = prompt
                .lines()
                .filter_map(|l| l.strip_prefix("- "))
                .collect();
            if words.is_empty() {
                return Ok("Übersetzt.[BR]".into());
            }
            let sentences: Vec<String> = words
                .iter()
                .map(|w| format!("We saw *{w}* today.[BR]"))
                .collect();
            Ok(sentences.join(" "))
        }
    }

    fn setup() -> (AppState, StoryGenerator, Arc<CooperativeBackend>) {
        let store = Arc::new(JsonVocabularyStore::in_memory());
        store
            .import(vec![
                NewWord { word: "river".into(), translation: "Fluss".into(), ..Default::default() },
                NewWord { word: "stone".into(), translation: "Stein".into(), ..Default::default() },
            ])
            .unwrap();
        let settings = Settings::default();
        let backend = Arc::new(CooperativeBackend { calls: AtomicUsize::new(0) });
        let generator = build_generator(&settings, backend.clone(), store.clone());
        (AppState::new(settings, store), generator, backend)
    }

    #[tokio::test]
    async fn generation_returns_to_idle() {
        let (state, generator, _) = setup();
        let story = do_generate_story(&state, &generator, "", None).await.unwrap();

        let mut covered = story.covered_words.clone();
        covered.sort();
        assert_eq!(covered, vec!["river", "stone"]);
        assert_eq!(state.status(), AppStatus::Idle);
    }

    #[tokio::test]
    async fn cancelled_flag_is_reset_for_the_next_run() {
        let (state, generator, _) = setup();
        do_cancel_generation(&state);
        assert!(state.cancel.load(Ordering::SeqCst));

        do_generate_story(&state, &generator, "", Some(1)).await.unwrap();
        assert_eq!(state.status(), AppStatus::Idle);
    }

    #[tokio::test]
    async fn busy_app_refuses_generation() {
        let (state, generator, backend) = setup();
        state.set_status(AppStatus::Speaking);

        assert!(do_generate_story(&state, &generator, "", None).await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        // The refusal must not clobber the running operation's status
        assert_eq!(state.status(), AppStatus::Speaking);
    }

    #[tokio::test]
    async fn translation_is_requested_once() {
        let (state, generator, backend) = setup();
        let story = do_generate_story(&state, &generator, "", None).await.unwrap();
        let session = do_open_session(&state, story);
        let before = backend.calls.load(Ordering::SeqCst);

        let first = do_translate_story(&generator, &session).await.unwrap();
        assert_eq!(first.language, "German");
        assert_eq!(first.display_text, "Übersetzt.");
        do_translate_story(&generator, &session).await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn session_keeps_the_language_it_was_opened_with() {
        let (state, generator, _) = setup();
        let story = do_generate_story(&state, &generator, "", None).await.unwrap();
        crate::state::lock(&state.settings).generation.translation_language = "French".into();
        let session = do_open_session(&state, story);
        crate::state::lock(&state.settings).generation.translation_language = "Italian".into();

        let translated = do_translate_story(&generator, &session).await.unwrap();
        assert_eq!(translated.language, "French");
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = generation_backend(&Settings::default()).err().unwrap();
        assert!(err.to_string().contains("No API key"));
    }
}
