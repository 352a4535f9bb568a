use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use super::machine::{self, Effect, Event, PlaybackState, Transition, UtteranceId};
use super::start::{self, StartHint};
use super::{SpeechBackend, SpeechError, UtteranceEvent};
use crate::story::markers::{self, SENTENCE_BREAK};

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub speech_rate: f32,
    pub locale: String,
    /// How long word mode waits for a completion before moving on
    pub ack_timeout: Duration,
    /// Silence between two words in word mode
    pub word_pause: Duration,
    pub init_poll_attempts: u32,
    pub init_poll_interval: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            speech_rate: 1.0,
            locale: "en-US".to_string(),
            ack_timeout: Duration::from_secs(5),
            word_pause: Duration::from_secs(1),
            init_poll_attempts: 5,
            init_poll_interval: Duration::from_millis(300),
        }
    }
}

enum Command {
    SpeakText { text: String, hint: StartHint },
    SpeakWords(Vec<String>),
    Stop,
    SetRate(f32),
    SetLanguage(String),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running playback sequencer.
///
/// All backend calls happen on the sequencer's own task; the methods here
/// only enqueue commands. State changes are published as whole
/// [`PlaybackState`] snapshots.
#[derive(Clone)]
pub struct SpeechSequencer {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlaybackState>,
}

impl SpeechSequencer {
    /// Start the sequencer task. Must be called inside a Tokio runtime.
    pub fn spawn(backend: Arc<dyn SpeechBackend>, config: SequencerConfig) -> Self {
        let initial = PlaybackState::new(config.speech_rate, config.locale.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (publisher, state) = watch::channel(initial.clone());

        let driver = Driver {
            backend,
            config,
            state: initial,
            units: Vec::new(),
            sentence_text: None,
            commands: commands_rx,
            internal_tx,
            internal_rx,
            listener: None,
            publisher,
        };
        tokio::spawn(driver.run());

        Self {
            commands: commands_tx,
            state,
        }
    }

    fn send(&self, command: Command) -> Result<(), SpeechError> {
        self.commands.send(command).map_err(|_| SpeechError::Closed)
    }

    /// Read `text` sentence by sentence, starting where `hint` resolves to.
    pub fn speak_text(&self, text: &str, hint: StartHint) -> Result<(), SpeechError> {
        self.send(Command::SpeakText {
            text: text.to_string(),
            hint,
        })
    }

    /// Loop over `words` until stopped.
    pub fn speak_words(&self, words: Vec<String>) -> Result<(), SpeechError> {
        self.send(Command::SpeakWords(words))
    }

    pub fn stop(&self) -> Result<(), SpeechError> {
        self.send(Command::Stop)
    }

    pub fn set_speech_rate(&self, rate: f32) -> Result<(), SpeechError> {
        self.send(Command::SetRate(rate))
    }

    pub fn set_language(&self, locale: &str) -> Result<(), SpeechError> {
        self.send(Command::SetLanguage(locale.to_string()))
    }

    pub fn snapshot(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    pub async fn wait_until<F>(&self, mut condition: F) -> Result<PlaybackState, SpeechError>
    where
        F: FnMut(&PlaybackState) -> bool,
    {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| condition(s))
            .await
            .map_err(|_| SpeechError::Closed)?
            .clone();
        Ok(state)
    }

    /// Resolves once nothing is initializing or reading.
    pub async fn wait_until_idle(&self) -> Result<PlaybackState, SpeechError> {
        self.wait_until(|s| !s.is_active()).await
    }

    /// Stop playback, release the backend and end the task.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Break text into sentence units, on explicit breaks when present and on
/// terminal punctuation otherwise.
pub fn sentence_units(text: &str) -> Vec<String> {
    if text.contains(SENTENCE_BREAK) {
        return markers::split_sentences(text);
    }
    let mut units = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if at_boundary {
            push_unit(&mut units, &current);
            current.clear();
        }
    }
    push_unit(&mut units, &current);
    units
}

fn push_unit(units: &mut Vec<String>, raw: &str) {
    let unit = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !unit.is_empty() {
        units.push(unit);
    }
}

struct Driver {
    backend: Arc<dyn SpeechBackend>,
    config: SequencerConfig,
    state: PlaybackState,
    units: Vec<String>,
    /// Text the sentence highlight belongs to
    sentence_text: Option<String>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Event>,
    internal_rx: mpsc::UnboundedReceiver<Event>,
    listener: Option<mpsc::UnboundedReceiver<UtteranceEvent>>,
    publisher: watch::Sender<PlaybackState>,
}

async fn next_notice(
    listener: &mut Option<mpsc::UnboundedReceiver<UtteranceEvent>>,
) -> Option<UtteranceEvent> {
    match listener {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn notice_to_event(notice: UtteranceEvent) -> Option<Event> {
    let id: UtteranceId = match notice.utterance_id().parse() {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Ignoring speech notification: {}", e);
            return None;
        }
    };
    Some(match notice {
        UtteranceEvent::Started(_) => Event::UnitStarted(id),
        UtteranceEvent::Done(_) => Event::UnitDone(id),
        UtteranceEvent::Error(_) => Event::UnitFailed(id),
    })
}

impl Driver {
    async fn run(mut self) {
        tracing::debug!("Speech sequencer started");
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.teardown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => match self.command_to_event(command) {
                        Some(event) => event,
                        None => continue,
                    },
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(event) = self.internal_rx.recv() => event,
                Some(notice) = next_notice(&mut self.listener) => match notice_to_event(notice) {
                    Some(event) => event,
                    None => continue,
                },
            };
            self.apply(event).await;
        }
        tracing::debug!("Speech sequencer stopped");
    }

    fn command_to_event(&mut self, command: Command) -> Option<Event> {
        match command {
            Command::SpeakText { text, hint } => {
                let units = sentence_units(&text);
                let normalized = markers::normalize(&units.join(SENTENCE_BREAK));
                let fresh_text = self.sentence_text.as_deref() != Some(normalized.as_str());
                let sticky = if fresh_text {
                    None
                } else {
                    self.state.sentence_highlight
                };
                let (source, start) = start::resolve(&hint, &units, sticky);
                tracing::info!(
                    "Reading {} sentences from #{} ({:?})",
                    units.len(),
                    start,
                    source
                );

                self.sentence_text = Some(normalized);
                self.units = units;
                Some(Event::StartSentences {
                    unit_count: self.units.len(),
                    start,
                    fresh_text,
                })
            }
            Command::SpeakWords(words) => {
                self.units = words
                    .into_iter()
                    .map(|w| w.trim().to_string())
                    .filter(|w| !w.is_empty())
                    .collect();
                tracing::info!("Reading {} words in a loop", self.units.len());
                Some(Event::StartWords {
                    unit_count: self.units.len(),
                })
            }
            Command::Stop => Some(Event::Stop),
            Command::SetRate(rate) => Some(Event::SetRate(rate)),
            Command::SetLanguage(locale) => Some(Event::SetLanguage(locale)),
            Command::Shutdown(_) => None,
        }
    }

    /// Run `event` and everything it triggers to completion, publishing
    /// each resulting state after its effects have been carried out.
    async fn apply(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let Transition { state, effects } = machine::reduce(&self.state, event);
            self.state = state;
            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                }
            }
            self.publisher.send_replace(self.state.clone());
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Initialize { mode, generation, reset } => {
                if reset {
                    tracing::info!("Resetting speech backend for {:?} mode", mode);
                    if let Err(e) = self.backend.stop().await {
                        tracing::warn!("Speech stop during reset failed: {}", e);
                    }
                    self.backend.shutdown().await;
                }
                // Dropping the old receiver silences the previous listener
                self.listener = None;

                let (listener_tx, listener_rx) = mpsc::unbounded_channel();
                match self.backend.initialize(&self.state.locale, listener_tx).await {
                    Ok(()) => {
                        self.listener = Some(listener_rx);
                        self.poll_readiness(generation);
                        None
                    }
                    Err(e) => {
                        tracing::warn!("Speech backend failed to initialize: {}", e);
                        Some(Event::BackendFailed { generation })
                    }
                }
            }
            Effect::StopBackend => {
                if let Err(e) = self.backend.stop().await {
                    tracing::warn!("Speech stop failed: {}", e);
                }
                None
            }
            Effect::Speak { utterance, locale } => {
                if let Some(locale) = locale {
                    if let Err(e) = self.backend.set_language(&locale).await {
                        tracing::warn!("Could not switch speech language to {}: {}", locale, e);
                    }
                }
                let Some(text) = self.units.get(utterance.index) else {
                    tracing::warn!("No unit #{} to speak", utterance.index);
                    return Some(Event::UnitFailed(utterance));
                };
                tracing::debug!("Speaking {} #{}: {}", utterance, utterance.index, text);
                match self.backend.speak(text, &utterance.to_string()).await {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::warn!("Speech backend rejected {}: {}", utterance, e);
                        Some(Event::UnitFailed(utterance))
                    }
                }
            }
            Effect::ApplyRate(rate) => {
                if let Err(e) = self.backend.set_rate(rate).await {
                    tracing::warn!("Could not set speech rate {}: {}", rate, e);
                }
                None
            }
            Effect::ArmAckTimeout(utterance) => {
                self.schedule(self.config.ack_timeout, Event::AckTimedOut(utterance));
                None
            }
            Effect::SchedulePause { session } => {
                self.schedule(self.config.word_pause, Event::PauseElapsed { session });
                None
            }
        }
    }

    fn schedule(&self, delay: Duration, event: Event) {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    fn poll_readiness(&self, generation: u64) {
        let backend = Arc::clone(&self.backend);
        let tx = self.internal_tx.clone();
        let attempts = self.config.init_poll_attempts.max(1);
        let interval = self.config.init_poll_interval;

        tokio::spawn(async move {
            for attempt in 0..=attempts {
                if backend.is_ready() {
                    let _ = tx.send(Event::BackendReady { generation });
                    return;
                }
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
            tracing::warn!("Speech backend not ready after {} checks", attempts + 1);
            let _ = tx.send(Event::BackendFailed { generation });
        });
    }

    async fn teardown(&mut self) {
        self.apply(Event::Stop).await;
        self.backend.shutdown().await;
        self.listener = None;
    }
}
