mod command;

pub use command::CommandSpeechBackend;

use std::sync::Arc;

use crate::speech::SpeechBackend;

#[cfg(target_os = "macos")]
const SPEECH_PROGRAM: &str = "say";
#[cfg(not(target_os = "macos"))]
const SPEECH_PROGRAM: &str = "espeak-ng";

/// The speech backend for the current platform.
pub fn default_speech_backend() -> Arc<dyn SpeechBackend> {
    Arc::new(CommandSpeechBackend::new(SPEECH_PROGRAM))
}
