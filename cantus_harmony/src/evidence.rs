// Evidence: one match's scored contribution toward named confidence tracks.
//
// Evidence is created per analysis call by an evaluator (`evaluator.rs`),
// consumed by the aggregator and then dropped. Track names are open-ended
// (`functional`, `modal`, `chromatic`, `structural`, ...); weights are in
// [0, 1].

use crate::pattern;
use crate::token::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub pattern_id: String,
    pub tracks: BTreeMap<String, f64>,
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    pub raw_score: f64,
    #[serde(default)]
    pub uncertainty: Option<f64>,
    /// Covered token range, always inside the analysed sequence.
    pub span: Span,
}

impl Evidence {
    pub fn new(pattern_id: impl Into<String>, span: Span, raw_score: f64) -> Self {
        Evidence {
            pattern_id: pattern_id.into(),
            tracks: BTreeMap::new(),
            features: BTreeMap::new(),
            raw_score,
            uncertainty: None,
            span,
        }
    }

    /// Set a track weight, clamped to [0, 1].
    pub fn with_track(mut self, track: impl Into<String>, weight: f64) -> Self {
        self.tracks.insert(track.into(), clamp_unit(weight));
        self
    }

    /// Pattern family: the leading `.`-segment of the pattern id.
    pub fn family(&self) -> &str {
        pattern::family_of(&self.pattern_id)
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}
