pub mod machine;
pub mod sequencer;
pub mod start;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use machine::{Mode, Phase, PlaybackState, SpeechWarning, UtteranceId};
pub use sequencer::{SequencerConfig, SpeechSequencer};
pub use start::StartHint;

/// Notification from the speech backend about one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceEvent {
    Started(String),
    Done(String),
    Error(String),
}

impl UtteranceEvent {
    pub fn utterance_id(&self) -> &str {
        match self {
            Self::Started(id) | Self::Done(id) | Self::Error(id) => id,
        }
    }
}

/// Channel a backend reports utterance progress on. A new one is
/// installed on every initialization; the previous one goes dead.
pub type UtteranceListener = mpsc::UnboundedSender<UtteranceEvent>;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Speech is unavailable: {0}")]
    Unavailable(String),

    #[error("Speech backend failed on utterance {utterance}")]
    Playback { utterance: String },

    #[error("Speech backend error: {0}")]
    Backend(String),

    #[error("Speech sequencer has shut down")]
    Closed,
}

/// Platform text-to-speech capability.
///
/// `speak` only queues the utterance; completion arrives later as an
/// [`UtteranceEvent`] on the listener passed to `initialize`.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn initialize(&self, locale: &str, listener: UtteranceListener) -> Result<(), SpeechError>;

    /// Polled while waiting for initialization; must be cheap.
    fn is_ready(&self) -> bool;

    async fn speak(&self, text: &str, utterance_id: &str) -> Result<(), SpeechError>;

    async fn stop(&self) -> Result<(), SpeechError>;

    async fn shutdown(&self);

    async fn set_rate(&self, rate: f32) -> Result<(), SpeechError>;

    async fn set_language(&self, locale: &str) -> Result<(), SpeechError>;
}
