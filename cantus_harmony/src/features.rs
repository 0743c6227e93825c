// Named feature extractors for evidence.
//
// A pattern's evidence block lists the features its evaluator should attach
// (`"features": ["bass_smoothness", "soprano_arrival"]`). Names are checked
// against `KNOWN_FEATURES` at library load. Each extractor reads the matched
// window, its events and the match itself; none of them look outside the
// window.

use crate::events::WindowEvents;
use crate::labels;
use crate::matcher::MatchResult;
use crate::token::Token;

pub const KNOWN_FEATURES: [&str; 8] = [
    "window_length",
    "bass_smoothness",
    "soprano_arrival",
    "secondary_dominants",
    "chromaticism",
    "cadential_six_four",
    "fifths_run",
    "skipped_steps",
];

/// Fraction of known inner bass motions of at most `max_step` semitones.
/// Zero when the window has no known motions.
pub fn bass_smoothness(events: &WindowEvents, max_step: u8) -> f64 {
    if events.inner_motions.is_empty() {
        return 0.0;
    }
    let smooth = events
        .inner_motions
        .iter()
        .filter(|m| m.unsigned_abs() <= max_step)
        .count();
    smooth as f64 / events.inner_motions.len() as f64
}

fn chromaticism(window: &[Token]) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let chromatic = window
        .iter()
        .filter(|t| labels::has_accidental(&t.label) || t.is_secondary_dominant())
        .count();
    chromatic as f64 / window.len() as f64
}

/// Compute one named feature. `None` for unknown names.
pub fn extract(
    name: &str,
    window: &[Token],
    events: &WindowEvents,
    matched: &MatchResult,
    smooth_step: u8,
) -> Option<f64> {
    let value = match name {
        "window_length" => window.len() as f64,
        "bass_smoothness" => bass_smoothness(events, smooth_step),
        "soprano_arrival" => {
            if window.last().and_then(|t| t.soprano_degree) == Some(1) {
                1.0
            } else {
                0.0
            }
        }
        "secondary_dominants" => events.secondary_dominants.len() as f64,
        "chromaticism" => chromaticism(window),
        "cadential_six_four" => events.cadential_six_fours.len() as f64,
        "fifths_run" => events.longest_fifths_run as f64,
        "skipped_steps" => matched.skipped_steps as f64,
        _ => return None,
    };
    Some(value)
}
