//! In-process speech backend for sequencer tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{SpeechBackend, SpeechError, UtteranceEvent, UtteranceListener};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize(String),
    Speak(String),
    Stop,
    Shutdown,
    SetRate(f32),
    SetLanguage(String),
}

#[derive(Default)]
struct Inner {
    listener: Option<UtteranceListener>,
    calls: Vec<Call>,
    last_utterance: Option<String>,
}

pub struct FakeSpeechBackend {
    inner: Mutex<Inner>,
    ready: AtomicBool,
    /// Report `Done` from inside `speak`
    auto_complete: bool,
    /// Never become ready
    broken: bool,
    /// Texts that make `speak` report `Error`
    failing_text: Option<String>,
}

impl FakeSpeechBackend {
    pub fn manual() -> Self {
        Self::build(false, false, None)
    }

    pub fn auto() -> Self {
        Self::build(true, false, None)
    }

    pub fn broken() -> Self {
        Self::build(false, true, None)
    }

    pub fn failing_on(text: &str) -> Self {
        Self::build(true, false, Some(text.to_string()))
    }

    fn build(auto_complete: bool, broken: bool, failing_text: Option<String>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ready: AtomicBool::new(false),
            auto_complete,
            broken,
            failing_text,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Speak(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn initialize_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Initialize(_)))
            .count()
    }

    /// Report completion of the most recent utterance.
    pub fn complete_current(&self) {
        self.notify(UtteranceEvent::Done);
    }

    fn notify(&self, event: fn(String) -> UtteranceEvent) {
        let inner = self.inner.lock().unwrap();
        if let (Some(listener), Some(id)) = (&inner.listener, &inner.last_utterance) {
            let _ = listener.send(event(id.clone()));
        }
    }
}

#[async_trait]
impl SpeechBackend for FakeSpeechBackend {
    async fn initialize(&self, locale: &str, listener: UtteranceListener) -> Result<(), SpeechError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Initialize(locale.to_string()));
        inner.listener = Some(listener);
        self.ready.store(!self.broken, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn speak(&self, text: &str, utterance_id: &str) -> Result<(), SpeechError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Speak(text.to_string()));
        inner.last_utterance = Some(utterance_id.to_string());
        if let Some(listener) = &inner.listener {
            let _ = listener.send(UtteranceEvent::Started(utterance_id.to_string()));
            if self.failing_text.as_deref() == Some(text) {
                let _ = listener.send(UtteranceEvent::Error(utterance_id.to_string()));
            } else if self.auto_complete {
                let _ = listener.send(UtteranceEvent::Done(utterance_id.to_string()));
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SpeechError> {
        self.inner.lock().unwrap().calls.push(Call::Stop);
        Ok(())
    }

    async fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Shutdown);
        inner.listener = None;
        self.ready.store(false, Ordering::SeqCst);
    }

    async fn set_rate(&self, rate: f32) -> Result<(), SpeechError> {
        self.inner.lock().unwrap().calls.push(Call::SetRate(rate));
        Ok(())
    }

    async fn set_language(&self, locale: &str) -> Result<(), SpeechError> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push(Call::SetLanguage(locale.to_string()));
        Ok(())
    }
}
