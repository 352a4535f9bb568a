use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::speech::{SpeechBackend, SpeechError, UtteranceEvent, UtteranceListener};

const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const MIN_WORDS_PER_MINUTE: u32 = 80;
const MAX_WORDS_PER_MINUTE: u32 = 450;

struct Inner {
    listener: Option<UtteranceListener>,
    rate: f32,
    locale: String,
    /// Kills the utterance currently playing
    current: Option<oneshot::Sender<()>>,
}

/// Speaks through a system text-to-speech program, one child process per
/// utterance.
pub struct CommandSpeechBackend {
    program: String,
    inner: Mutex<Inner>,
    ready: AtomicBool,
}

impl CommandSpeechBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            inner: Mutex::new(Inner {
                listener: None,
                rate: 1.0,
                locale: String::new(),
                current: None,
            }),
            ready: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn args(&self, text: &str, rate: f32, locale: &str) -> Vec<String> {
        let wpm = words_per_minute(rate).to_string();
        if is_say(&self.program) {
            vec!["-r".into(), wpm, text.into()]
        } else {
            let mut args = vec!["-s".into(), wpm];
            if let Some(voice) = voice_for_locale(locale) {
                args.push("-v".into());
                args.push(voice);
            }
            args.push(text.into());
            args
        }
    }

    fn cancel_current(inner: &mut Inner) {
        if let Some(cancel) = inner.current.take() {
            let _ = cancel.send(());
        }
    }
}

fn is_say(program: &str) -> bool {
    Path::new(program).file_name().is_some_and(|name| name == "say")
}

pub(crate) fn words_per_minute(rate: f32) -> u32 {
    let wpm = (BASE_WORDS_PER_MINUTE * rate).round();
    if !wpm.is_finite() || wpm < MIN_WORDS_PER_MINUTE as f32 {
        return MIN_WORDS_PER_MINUTE;
    }
    (wpm as u32).min(MAX_WORDS_PER_MINUTE)
}

/// `en-US` / `en_US` become espeak's `en-us`.
pub(crate) fn voice_for_locale(locale: &str) -> Option<String> {
    let voice = locale.trim().replace('_', "-").to_lowercase();
    if voice.is_empty() {
        None
    } else {
        Some(voice)
    }
}

/// Resolve `program` against `PATH` unless it already names a file.
pub(crate) fn find_program(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[async_trait]
impl SpeechBackend for CommandSpeechBackend {
    async fn initialize(&self, locale: &str, listener: UtteranceListener) -> Result<(), SpeechError> {
        let found = find_program(&self.program);
        {
            let mut inner = self.lock();
            Self::cancel_current(&mut inner);
            inner.listener = Some(listener);
            inner.locale = locale.to_string();
        }
        match found {
            Some(path) => {
                tracing::info!("Speech program ready: {}", path.display());
                self.ready.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => {
                self.ready.store(false, Ordering::SeqCst);
                Err(SpeechError::Unavailable(format!(
                    "'{}' was not found on PATH",
                    self.program
                )))
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn speak(&self, text: &str, utterance_id: &str) -> Result<(), SpeechError> {
        if !self.is_ready() {
            return Err(SpeechError::Unavailable("backend not initialized".into()));
        }

        let (listener, args) = {
            let mut inner = self.lock();
            Self::cancel_current(&mut inner);
            let listener = inner
                .listener
                .clone()
                .ok_or_else(|| SpeechError::Unavailable("no listener installed".into()))?;
            (listener, self.args(text, inner.rate, &inner.locale))
        };

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpeechError::Backend(format!("failed to start {}: {}", self.program, e)))?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.lock().current = Some(cancel_tx);

        let id = utterance_id.to_string();
        let _ = listener.send(UtteranceEvent::Started(id.clone()));

        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel_rx => None,
            };
            let event = match outcome {
                Some(Ok(status)) if status.success() => UtteranceEvent::Done(id),
                Some(Ok(status)) => {
                    tracing::warn!("Speech program exited with {} on {}", status, id);
                    UtteranceEvent::Error(id)
                }
                Some(Err(e)) => {
                    tracing::warn!("Waiting for speech program failed on {}: {}", id, e);
                    UtteranceEvent::Error(id)
                }
                None => {
                    let _ = child.kill().await;
                    UtteranceEvent::Error(id)
                }
            };
            let _ = listener.send(event);
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), SpeechError> {
        Self::cancel_current(&mut self.lock());
        Ok(())
    }

    async fn shutdown(&self) {
        let mut inner = self.lock();
        Self::cancel_current(&mut inner);
        inner.listener = None;
        self.ready.store(false, Ordering::SeqCst);
    }

    async fn set_rate(&self, rate: f32) -> Result<(), SpeechError> {
        self.lock().rate = rate;
        Ok(())
    }

    async fn set_language(&self, locale: &str) -> Result<(), SpeechError> {
        if is_say(&self.program) {
            tracing::debug!("'say' keeps the system voice; ignoring locale {}", locale);
        }
        self.lock().locale = locale.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn rate_maps_to_clamped_words_per_minute() {
        assert_eq!(words_per_minute(1.0), 175);
        assert_eq!(words_per_minute(2.0), 350);
        assert_eq!(words_per_minute(0.25), MIN_WORDS_PER_MINUTE);
        assert_eq!(words_per_minute(4.0), MAX_WORDS_PER_MINUTE);
        assert_eq!(words_per_minute(f32::NAN), MIN_WORDS_PER_MINUTE);
    }

    #[test]
    fn espeak_and_say_arguments() {
        let espeak = CommandSpeechBackend::new("espeak-ng");
        assert_eq!(
            espeak.args("Hallo.", 1.0, "de_DE"),
            vec!["-s", "175", "-v", "de-de", "Hallo."]
        );
        assert_eq!(espeak.args("Hi.", 1.0, ""), vec!["-s", "175", "Hi."]);

        let say = CommandSpeechBackend::new("/usr/bin/say");
        assert_eq!(say.args("Hi.", 2.0, "en-US"), vec!["-r", "350", "Hi."]);
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let backend = CommandSpeechBackend::new("lexitale-no-such-speech-program");
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = backend.initialize("en-US", tx).await.unwrap_err();
        assert!(matches!(err, SpeechError::Unavailable(_)));
        assert!(!backend.is_ready());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_becomes_done_or_error() {
        for (program, expect_done) in [("true", true), ("false", false)] {
            let backend = CommandSpeechBackend::new(program);
            let (tx, mut rx) = mpsc::unbounded_channel();
            backend.initialize("en-US", tx).await.unwrap();
            backend.speak("hello", "s1-u0").await.unwrap();

            let started = rx.recv().await.unwrap();
            assert_eq!(started, UtteranceEvent::Started("s1-u0".into()));
            let finished = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let expected = if expect_done {
                UtteranceEvent::Done("s1-u0".into())
            } else {
                UtteranceEvent::Error("s1-u0".into())
            };
            assert_eq!(finished, expected);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_drops_readiness_and_listener() {
        let backend = CommandSpeechBackend::new("true");
        let (tx, _rx) = mpsc::unbounded_channel();
        backend.initialize("en-US", tx).await.unwrap();
        assert!(backend.is_ready());

        backend.shutdown().await;
        assert!(!backend.is_ready());
        assert!(matches!(
            backend.speak("hello", "s1-u0").await,
            Err(SpeechError::Unavailable(_))
        ));
    }
}
