use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::speech::SequencerConfig;
use crate::story::generator::GeneratorConfig;
use crate::vocab::VocabularyStore;

pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    #[default]
    Idle,
    Generating,
    Speaking,
}

pub struct AppState {
    pub settings: Mutex<Settings>,
    pub status: Mutex<AppStatus>,
    pub store: Arc<dyn VocabularyStore>,
    /// Raised to abandon the story generation in progress
    pub cancel: CancelFlag,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<dyn VocabularyStore>) -> Self {
        Self {
            settings: Mutex::new(settings),
            status: Mutex::new(AppStatus::default()),
            store,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> Settings {
        lock(&self.settings).clone()
    }

    pub fn status(&self) -> AppStatus {
        *lock(&self.status)
    }

    pub fn set_status(&self, status: AppStatus) {
        *lock(&self.status) = status;
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generation: GenerationSettings,
    pub speech: SpeechSettings,
    pub vocabulary: VocabularySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_attempts: u32,
    /// Upper bound on the story length, in words
    pub word_limit: usize,
    /// Share of words a final attempt may leave out
    pub tolerance: f64,
    pub story_language: String,
    pub translation_language: String,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: crate::llm::gemini::DEFAULT_MODEL.to_string(),
            max_attempts: 3,
            word_limit: 300,
            tolerance: 0.10,
            story_language: "English".to_string(),
            translation_language: "German".to_string(),
            timeout_secs: 60,
        }
    }
}

impl GenerationSettings {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            word_limit: self.word_limit,
            tolerance: self.tolerance,
            language: self.story_language.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub rate: f32,
    pub locale: String,
    /// Locale used when reading a translation
    pub translation_locale: String,
    pub word_pause_ms: u64,
    pub ack_timeout_ms: u64,
    pub init_poll_attempts: u32,
    pub init_poll_interval_ms: u64,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            locale: "en-US".to_string(),
            translation_locale: "de-DE".to_string(),
            word_pause_ms: 1000,
            ack_timeout_ms: 5000,
            init_poll_attempts: 5,
            init_poll_interval_ms: 300,
        }
    }
}

impl SpeechSettings {
    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            speech_rate: self.rate,
            locale: self.locale.clone(),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            word_pause: Duration::from_millis(self.word_pause_ms),
            init_poll_attempts: self.init_poll_attempts,
            init_poll_interval: Duration::from_millis(self.init_poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularySettings {
    /// Defaults to the platform data directory when unset
    pub path: Option<PathBuf>,
}
