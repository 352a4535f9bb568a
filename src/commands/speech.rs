use std::future::Future;
use std::sync::Arc;

use anyhow::Result;

use super::story::StatusGuard;
use crate::speech::{
    PlaybackState, SpeechBackend, SpeechSequencer, SpeechWarning, StartHint,
};
use crate::state::{AppState, AppStatus, Settings};
use crate::story::TranslatedStory;

pub fn start_sequencer(settings: &Settings, backend: Arc<dyn SpeechBackend>) -> SpeechSequencer {
    SpeechSequencer::spawn(backend, settings.speech.sequencer_config())
}

/// Read `text` sentence by sentence until it ends or `stop_signal` fires.
pub async fn do_read_text<S>(
    state: &AppState,
    sequencer: &SpeechSequencer,
    text: &str,
    hint: StartHint,
    stop_signal: S,
) -> Result<PlaybackState>
where
    S: Future<Output = ()>,
{
    let _status = StatusGuard::enter(state, AppStatus::Speaking)?;
    let before = sequencer.snapshot().session;
    sequencer.speak_text(text, hint)?;
    run_until_done(sequencer, before, stop_signal).await
}

/// Loop over `words` until `stop_signal` fires.
pub async fn do_drill_words<S>(
    state: &AppState,
    sequencer: &SpeechSequencer,
    words: Vec<String>,
    stop_signal: S,
) -> Result<PlaybackState>
where
    S: Future<Output = ()>,
{
    if words.is_empty() {
        anyhow::bail!("No words to drill");
    }
    let _status = StatusGuard::enter(state, AppStatus::Speaking)?;
    let before = sequencer.snapshot().session;
    sequencer.speak_words(words)?;
    run_until_done(sequencer, before, stop_signal).await
}

async fn run_until_done<S>(
    sequencer: &SpeechSequencer,
    before: u64,
    stop_signal: S,
) -> Result<PlaybackState>
where
    S: Future<Output = ()>,
{
    let finished = sequencer.wait_until(|s| s.session > before && !s.is_active());
    let state = tokio::select! {
        state = finished => state?,
        _ = stop_signal => {
            match sequencer.snapshot().current_index() {
                Some(index) => tracing::info!("Stopping playback at unit #{}", index),
                None => tracing::info!("Stopping playback"),
            }
            sequencer.stop()?;
            sequencer.wait_until_idle().await?
        }
    };

    match state.warning {
        Some(SpeechWarning::Unavailable) => {
            anyhow::bail!("Speech is unavailable; check that a speech program is installed")
        }
        Some(SpeechWarning::PlaybackFailed { index }) => {
            tracing::warn!("Playback stopped: unit #{} could not be spoken", index);
        }
        None => {}
    }
    Ok(state)
}

/// Read a translation in the translation locale, then switch the
/// sequencer back to the reading locale.
pub async fn do_read_translation<S>(
    state: &AppState,
    sequencer: &SpeechSequencer,
    translated: &TranslatedStory,
    stop_signal: S,
) -> Result<PlaybackState>
where
    S: Future<Output = ()>,
{
    let speech = state.settings().speech;
    sequencer.set_language(&speech.translation_locale)?;
    let result = do_read_text(state, sequencer, &translated.clean_text, StartHint::default(), stop_signal).await;
    sequencer.set_language(&speech.locale)?;
    result
}

/// Change the rate for the running sequencer and remember it.
pub fn do_set_speech_rate(state: &AppState, sequencer: &SpeechSequencer, rate: f32) -> Result<()> {
    sequencer.set_speech_rate(rate)?;
    crate::state::lock(&state.settings).speech.rate = crate::speech::machine::clamp_rate(rate);
    Ok(())
}

pub fn do_set_speech_language(
    state: &AppState,
    sequencer: &SpeechSequencer,
    locale: &str,
) -> Result<()> {
    sequencer.set_language(locale)?;
    crate::state::lock(&state.settings).speech.locale = locale.to_string();
    Ok(())
}
