// Window scoring for successful matches.
//
//   score = base
//         + smooth_bass     × (fraction of inner bass motions ≤ smooth step)
//         + first_inversion   if any token is in first inversion
//         + strong_cadence    if the last two tokens go dominant → tonic and
//                             the final soprano is on degree 1
//         − bass_leap       × (inner bass motions larger than a fourth)
//
// floored at `MatcherConfig::min_score` so a matched window never scores zero
// and stays selectable by the cover solver. Weights come from the pattern's
// evidence block; thresholds from the matcher config.

use crate::config::MatcherConfig;
use crate::events::{self, WindowEvents};
use crate::features;
use crate::pattern::EvidenceSpec;
use crate::token::{Role, Token};
use serde::{Deserialize, Serialize};

/// Per-term contributions, kept so a score can be explained after the fact.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub smooth_bass: f64,
    pub first_inversion: f64,
    pub strong_cadence: f64,
    /// Subtracted; stored as a non-negative amount.
    pub bass_leaps: f64,
    /// Whether the minimum-score floor was applied.
    pub floored: bool,
    pub total: f64,
}

pub fn is_strong_cadence(window: &[Token], roles: &[Role]) -> bool {
    let n = window.len();
    n >= 2
        && roles[n - 2] == Role::Dominant
        && roles[n - 1] == Role::Tonic
        && window[n - 1].soprano_degree == Some(1)
}

pub fn score_window(
    spec: &EvidenceSpec,
    window: &[Token],
    roles: &[Role],
    events: &WindowEvents,
    config: &MatcherConfig,
) -> ScoreBreakdown {
    let smooth_bass =
        spec.bonuses.smooth_bass * features::bass_smoothness(events, config.smooth_bass_max_semitones);
    let first_inversion = if events::has_first_inversion(window) {
        spec.bonuses.first_inversion
    } else {
        0.0
    };
    let strong_cadence = if is_strong_cadence(window, roles) {
        spec.bonuses.strong_cadence
    } else {
        0.0
    };
    let leaps = events
        .inner_motions
        .iter()
        .filter(|m| m.unsigned_abs() > config.leap_threshold_semitones)
        .count();
    let bass_leaps = spec.penalties.bass_leap * leaps as f64;

    let raw = spec.base + smooth_bass + first_inversion + strong_cadence - bass_leaps;
    let floored = raw < config.min_score;
    ScoreBreakdown {
        base: spec.base,
        smooth_bass,
        first_inversion,
        strong_cadence,
        bass_leaps,
        floored,
        total: if floored { config.min_score } else { raw },
    }
}
