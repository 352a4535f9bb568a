//! Playback state machine.
//!
//! `reduce` maps the current [`PlaybackState`] and one [`Event`] to the next
//! state plus the backend [`Effect`]s to run. It never touches the backend
//! itself, so every transition can be exercised without one.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub const MIN_SPEECH_RATE: f32 = 0.25;
pub const MAX_SPEECH_RATE: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Sentences,
    Words,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum Phase {
    Idle,
    Initializing { mode: Mode, start: usize },
    ReadingSentences { index: usize },
    ReadingWords { index: usize },
    StoppedWithHighlight { mode: Mode, index: usize },
}

/// Which completion listener the backend currently has, and whether it is up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BackendLink {
    Down,
    Starting { mode: Mode, generation: u64 },
    Ready { mode: Mode, generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SpeechWarning {
    Unavailable,
    PlaybackFailed { index: usize },
}

/// Correlates backend notifications with the unit that was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UtteranceId {
    pub session: u64,
    pub index: usize,
}

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}-u{}", self.session, self.index)
    }
}

impl FromStr for UtteranceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = || -> Option<Self> {
            let (session, index) = s.strip_prefix('s')?.split_once("-u")?;
            Some(Self {
                session: session.parse().ok()?,
                index: index.parse().ok()?,
            })
        };
        parse().ok_or_else(|| format!("Invalid utterance id: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    pub phase: Phase,
    pub unit_count: usize,
    /// The one utterance the backend still owes a completion for
    pub in_flight: Option<UtteranceId>,
    /// Sticky highlight of the sentence list
    pub sentence_highlight: Option<usize>,
    pub word_highlight: Option<usize>,
    pub speech_rate: f32,
    pub locale: String,
    /// Locale last pushed to the backend
    pub applied_locale: Option<String>,
    pub backend: BackendLink,
    /// Bumped on every start and stop; anything tagged with an older
    /// session is stale
    pub session: u64,
    pub warning: Option<SpeechWarning>,
}

impl PlaybackState {
    pub fn new(speech_rate: f32, locale: impl Into<String>) -> Self {
        Self {
            phase: Phase::Idle,
            unit_count: 0,
            in_flight: None,
            sentence_highlight: None,
            word_highlight: None,
            speech_rate: clamp_rate(speech_rate),
            locale: locale.into(),
            applied_locale: None,
            backend: BackendLink::Down,
            session: 0,
            warning: None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            Phase::Initializing { .. } | Phase::ReadingSentences { .. } | Phase::ReadingWords { .. }
        )
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.phase {
            Phase::ReadingSentences { index } | Phase::ReadingWords { index } => Some(index),
            _ => None,
        }
    }

    /// The sentence to show as highlighted
    pub fn highlighted_sentence(&self) -> Option<usize> {
        match self.phase {
            Phase::ReadingSentences { index } => Some(index),
            _ => self.sentence_highlight,
        }
    }

    fn set_highlight(&mut self, mode: Mode, index: usize) {
        match mode {
            Mode::Sentences => self.sentence_highlight = Some(index),
            Mode::Words => self.word_highlight = Some(index),
        }
    }
}

pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE)
    } else {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StartSentences {
        unit_count: usize,
        start: usize,
        /// The text differs from the one the sticky highlight belongs to
        fresh_text: bool,
    },
    StartWords { unit_count: usize },
    BackendReady { generation: u64 },
    BackendFailed { generation: u64 },
    UnitStarted(UtteranceId),
    UnitDone(UtteranceId),
    UnitFailed(UtteranceId),
    AckTimedOut(UtteranceId),
    PauseElapsed { session: u64 },
    Stop,
    SetRate(f32),
    SetLanguage(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Install a fresh listener for `mode`; with `reset` the backend is
    /// stopped and shut down first.
    Initialize { mode: Mode, generation: u64, reset: bool },
    StopBackend,
    Speak { utterance: UtteranceId, locale: Option<String> },
    ApplyRate(f32),
    ArmAckTimeout(UtteranceId),
    SchedulePause { session: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PlaybackState,
    pub effects: Vec<Effect>,
}

pub fn reduce(state: &PlaybackState, event: Event) -> Transition {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        Event::StartSentences { unit_count, start, fresh_text } => {
            if fresh_text {
                next.sentence_highlight = None;
            }
            restart(&mut next, &mut effects, Mode::Sentences, unit_count, start);
        }
        Event::StartWords { unit_count } => {
            restart(&mut next, &mut effects, Mode::Words, unit_count, 0);
        }
        Event::BackendReady { generation } => {
            if let BackendLink::Starting { mode, generation: current } = next.backend {
                if current == generation {
                    next.backend = BackendLink::Ready { mode, generation };
                    next.applied_locale = None;
                    effects.push(Effect::ApplyRate(next.speech_rate));
                    if let Phase::Initializing { mode: wanted, start } = next.phase {
                        if wanted == mode {
                            dispatch(&mut next, &mut effects, mode, start);
                        }
                    }
                }
            }
        }
        Event::BackendFailed { generation } => {
            let current = match next.backend {
                BackendLink::Starting { generation, .. } | BackendLink::Ready { generation, .. } => {
                    Some(generation)
                }
                BackendLink::Down => None,
            };
            if current == Some(generation) {
                next.backend = BackendLink::Down;
                next.in_flight = None;
                next.session += 1;
                next.warning = Some(SpeechWarning::Unavailable);
                if next.is_active() {
                    next.phase = Phase::Idle;
                }
            }
        }
        Event::UnitStarted(id) => {
            if next.in_flight == Some(id) {
                next.warning = None;
            }
        }
        Event::UnitDone(id) => {
            if next.in_flight == Some(id) {
                complete_unit(&mut next, &mut effects);
            }
        }
        Event::AckTimedOut(id) => {
            if next.in_flight == Some(id) && matches!(next.phase, Phase::ReadingWords { .. }) {
                complete_unit(&mut next, &mut effects);
            }
        }
        Event::UnitFailed(id) => {
            if next.in_flight == Some(id) {
                next.in_flight = None;
                next.session += 1;
                if let Some((mode, index)) = reading(&next.phase) {
                    next.set_highlight(mode, index);
                    next.phase = Phase::StoppedWithHighlight { mode, index };
                    next.warning = Some(SpeechWarning::PlaybackFailed { index });
                }
            }
        }
        Event::PauseElapsed { session } => {
            if session == next.session && next.in_flight.is_none() && next.unit_count > 0 {
                if let Phase::ReadingWords { index } = next.phase {
                    let following = (index + 1) % next.unit_count;
                    dispatch(&mut next, &mut effects, Mode::Words, following);
                }
            }
        }
        Event::Stop => stop(&mut next, &mut effects),
        Event::SetRate(rate) => {
            next.speech_rate = clamp_rate(rate);
            if matches!(next.backend, BackendLink::Ready { .. }) {
                effects.push(Effect::ApplyRate(next.speech_rate));
            }
        }
        Event::SetLanguage(locale) => {
            next.locale = locale;
        }
    }

    Transition { state: next, effects }
}

fn reading(phase: &Phase) -> Option<(Mode, usize)> {
    match *phase {
        Phase::ReadingSentences { index } => Some((Mode::Sentences, index)),
        Phase::ReadingWords { index } => Some((Mode::Words, index)),
        _ => None,
    }
}

fn stop(next: &mut PlaybackState, effects: &mut Vec<Effect>) {
    if next.in_flight.take().is_some() {
        effects.push(Effect::StopBackend);
    }
    if let Some((mode, index)) = reading(&next.phase) {
        next.set_highlight(mode, index);
        next.phase = Phase::StoppedWithHighlight { mode, index };
        next.session += 1;
    } else if let Phase::Initializing { .. } = next.phase {
        next.phase = Phase::Idle;
        next.session += 1;
    }
}

fn restart(
    next: &mut PlaybackState,
    effects: &mut Vec<Effect>,
    mode: Mode,
    unit_count: usize,
    start: usize,
) {
    stop(next, effects);
    next.session += 1;
    next.unit_count = unit_count;
    next.warning = None;

    if unit_count == 0 {
        next.phase = Phase::Idle;
        return;
    }
    let start = start.min(unit_count - 1);

    match next.backend {
        BackendLink::Ready { mode: installed, .. } if installed == mode => {
            dispatch(next, effects, mode, start);
        }
        BackendLink::Starting { mode: installed, .. } if installed == mode => {
            next.phase = Phase::Initializing { mode, start };
        }
        link => {
            let generation = match link {
                BackendLink::Down => 1,
                BackendLink::Starting { generation, .. } | BackendLink::Ready { generation, .. } => {
                    generation + 1
                }
            };
            effects.push(Effect::Initialize {
                mode,
                generation,
                reset: link != BackendLink::Down,
            });
            next.backend = BackendLink::Starting { mode, generation };
            next.applied_locale = None;
            next.phase = Phase::Initializing { mode, start };
        }
    }
}

fn dispatch(next: &mut PlaybackState, effects: &mut Vec<Effect>, mode: Mode, index: usize) {
    if mode == Mode::Words {
        // The loop revisits indexes, so every pass needs its own ids
        next.session += 1;
    }
    let utterance = UtteranceId {
        session: next.session,
        index,
    };
    let locale = if next.applied_locale.as_deref() != Some(next.locale.as_str()) {
        next.applied_locale = Some(next.locale.clone());
        Some(next.locale.clone())
    } else {
        None
    };

    next.in_flight = Some(utterance);
    effects.push(Effect::Speak { utterance, locale });
    match mode {
        Mode::Sentences => next.phase = Phase::ReadingSentences { index },
        Mode::Words => {
            next.phase = Phase::ReadingWords { index };
            effects.push(Effect::ArmAckTimeout(utterance));
        }
    }
}

fn complete_unit(next: &mut PlaybackState, effects: &mut Vec<Effect>) {
    next.in_flight = None;
    match next.phase {
        Phase::ReadingSentences { index } => {
            next.sentence_highlight = Some(index);
            if index + 1 < next.unit_count {
                dispatch(next, effects, Mode::Sentences, index + 1);
            } else {
                next.phase = Phase::StoppedWithHighlight {
                    mode: Mode::Sentences,
                    index,
                };
            }
        }
        Phase::ReadingWords { index } => {
            next.word_highlight = Some(index);
            effects.push(Effect::SchedulePause {
                session: next.session,
            });
        }
        _ => {}
    }
}
