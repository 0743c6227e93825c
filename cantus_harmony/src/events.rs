// Low-level event extraction over one candidate window.
//
// Several constraints, descriptors, scoring terms and feature extractors all
// ask the same questions of a window: where are the cadential six-fours, is
// the bass held anywhere, how long is the longest descending-fifths chain.
// `extract` answers them once per window and the result is passed by
// reference to every consumer. Nothing here is cached between windows and
// nothing is stored on the checkers themselves.
//
// All positions in `WindowEvents` are window-relative (0 = first token of the
// window).
//
// Definitions:
// - Cadential six-four: a token flagged `cadential-six-four`, or a
//   second-inversion triad whose bass is scale degree 5.
// - Pedal point: two or more consecutive tokens with the same bass pitch
//   (bass motion 0, or equal bass degree when motion is unknown).
// - Descending fifth: root motion down a fifth / up a fourth, i.e. the root
//   degree advances by 3 modulo 7 (V→I, ii→V, vi→ii, I→IV).
// - Stepwise descent: bass motion of −1 or −2 semitones.

use crate::labels::{self, Inversion};
use crate::token::{FLAG_CADENTIAL_SIX_FOUR, Span, Token};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowEvents {
    pub cadential_six_fours: Vec<usize>,
    /// Maximal runs of held bass, each at least two tokens long.
    pub pedal_points: Vec<Span>,
    /// Maximal runs of descending-fifth root motion, as token spans.
    pub fifths_runs: Vec<Span>,
    /// Root motions in the longest descending-fifths run.
    pub longest_fifths_run: usize,
    /// Bass motions in the longest stepwise-descending run.
    pub longest_stepwise_descent: usize,
    pub secondary_dominants: Vec<usize>,
    /// Known bass motions between consecutive tokens inside the window.
    pub inner_motions: Vec<i8>,
}

impl WindowEvents {
    /// Whether the bass is held from the first token to the last.
    pub fn bass_held_throughout(&self, window_len: usize) -> bool {
        window_len >= 2
            && self
                .pedal_points
                .iter()
                .any(|p| p.start == 0 && p.end == window_len)
    }
}

pub fn is_cadential_six_four(token: &Token) -> bool {
    if token.has_flag(FLAG_CADENTIAL_SIX_FOUR) {
        return true;
    }
    let parts = labels::parse_label(&token.label);
    parts.figure == "64" && labels::bass_degree(&token.label) == Some(5)
}

pub fn is_descending_fifth(from: &Token, to: &Token) -> bool {
    match (labels::roman_degree(&from.label), labels::roman_degree(&to.label)) {
        (Some(a), Some(b)) => (i16::from(b) - i16::from(a)).rem_euclid(7) == 3,
        _ => false,
    }
}

fn bass_held(from: &Token, to: &Token) -> bool {
    match to.bass_motion {
        Some(motion) => motion == 0,
        None => {
            let a = labels::bass_degree(&from.label);
            a.is_some() && a == labels::bass_degree(&to.label)
        }
    }
}

fn is_stepwise_descent(to: &Token) -> bool {
    matches!(to.bass_motion, Some(-2..=-1))
}

/// Maximal runs of consecutive token pairs satisfying `pred`, as token spans.
fn runs(window: &[Token], pred: impl Fn(&Token, &Token) -> bool) -> Vec<Span> {
    let mut out = Vec::new();
    let mut start = None;
    for i in 1..window.len() {
        if pred(&window[i - 1], &window[i]) {
            start.get_or_insert(i - 1);
        } else if let Some(s) = start.take() {
            out.push(Span::new(s, i));
        }
    }
    if let Some(s) = start {
        out.push(Span::new(s, window.len()));
    }
    out
}

pub fn extract(window: &[Token]) -> WindowEvents {
    let cadential_six_fours = window
        .iter()
        .enumerate()
        .filter(|(_, t)| is_cadential_six_four(t))
        .map(|(i, _)| i)
        .collect();
    let secondary_dominants = window
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_secondary_dominant())
        .map(|(i, _)| i)
        .collect();
    let inner_motions = window.iter().skip(1).filter_map(|t| t.bass_motion).collect();

    let pedal_points = runs(window, bass_held);
    let fifths_runs = runs(window, is_descending_fifth);
    let longest_fifths_run = fifths_runs.iter().map(|s| s.len() - 1).max().unwrap_or(0);
    let longest_stepwise_descent = runs(window, |_, to| is_stepwise_descent(to))
        .iter()
        .map(|s| s.len() - 1)
        .max()
        .unwrap_or(0);

    WindowEvents {
        cadential_six_fours,
        pedal_points,
        fifths_runs,
        longest_fifths_run,
        longest_stepwise_descent,
        secondary_dominants,
        inner_motions,
    }
}

/// Whether any token of the window is in first inversion.
pub fn has_first_inversion(window: &[Token]) -> bool {
    window
        .iter()
        .any(|t| labels::inversion(&t.label) == Inversion::First)
}
