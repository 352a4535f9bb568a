//! Where sentence playback starts.
//!
//! | priority | source            | value used                                   |
//! |----------|-------------------|----------------------------------------------|
//! | 1        | `ExplicitIndex`   | `StartHint::sentence_index`                  |
//! | 2        | `HighlightedText` | position of `StartHint::highlighted_sentence`|
//! | 3        | `CarriedIndex`    | `StartHint::carried_index`                   |
//! | 4        | `StickyHighlight` | the sequencer's own last highlight           |
//! | 5        | `Beginning`       | 0                                            |
//!
//! The first candidate that names an existing sentence wins.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartHint {
    pub sentence_index: Option<usize>,
    pub highlighted_sentence: Option<String>,
    /// Highlight index remembered by the caller's own view state
    pub carried_index: Option<usize>,
}

impl StartHint {
    pub fn at(index: usize) -> Self {
        Self {
            sentence_index: Some(index),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSource {
    ExplicitIndex,
    HighlightedText,
    CarriedIndex,
    StickyHighlight,
    Beginning,
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// All candidates in priority order; `None` means the source had nothing to offer.
pub fn candidates(
    hint: &StartHint,
    units: &[String],
    sticky: Option<usize>,
) -> [(StartSource, Option<usize>); 5] {
    let by_text = hint.highlighted_sentence.as_deref().and_then(|wanted| {
        let wanted = collapse(wanted);
        units.iter().position(|u| collapse(u) == wanted)
    });
    [
        (StartSource::ExplicitIndex, hint.sentence_index),
        (StartSource::HighlightedText, by_text),
        (StartSource::CarriedIndex, hint.carried_index),
        (StartSource::StickyHighlight, sticky),
        (StartSource::Beginning, Some(0)),
    ]
}

pub fn resolve(hint: &StartHint, units: &[String], sticky: Option<usize>) -> (StartSource, usize) {
    candidates(hint, units, sticky)
        .into_iter()
        .find_map(|(source, index)| index.filter(|&i| i < units.len()).map(|i| (source, i)))
        .unwrap_or((StartSource::Beginning, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units() -> Vec<String> {
        ["One.", "Two  words.", "Three.", "Four.", "Five."]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn full_hint() -> StartHint {
        StartHint {
            sentence_index: Some(4),
            highlighted_sentence: Some("Two words.".into()),
            carried_index: Some(2),
        }
    }

    #[test]
    fn every_priority_tier() {
        let units = units();
        let mut hint = full_hint();

        assert_eq!(resolve(&hint, &units, Some(3)), (StartSource::ExplicitIndex, 4));

        hint.sentence_index = None;
        assert_eq!(resolve(&hint, &units, Some(3)), (StartSource::HighlightedText, 1));

        hint.highlighted_sentence = None;
        assert_eq!(resolve(&hint, &units, Some(3)), (StartSource::CarriedIndex, 2));

        hint.carried_index = None;
        assert_eq!(resolve(&hint, &units, Some(3)), (StartSource::StickyHighlight, 3));

        assert_eq!(resolve(&hint, &units, None), (StartSource::Beginning, 0));
    }

    #[test]
    fn invalid_candidates_fall_through() {
        let units = units();
        let hint = StartHint {
            sentence_index: Some(99),
            highlighted_sentence: Some("Not in the story.".into()),
            carried_index: Some(5),
        };
        assert_eq!(resolve(&hint, &units, Some(42)), (StartSource::Beginning, 0));
        assert_eq!(resolve(&hint, &units, Some(1)), (StartSource::StickyHighlight, 1));
    }

    #[test]
    fn empty_units_start_at_zero() {
        assert_eq!(resolve(&full_hint(), &[], Some(1)), (StartSource::Beginning, 0));
    }
}
