// Token: one symbolic harmonic event, as delivered by an external analyser.
//
// Tokens arrive already labelled (roman numeral, functional role, flags, bass
// motion, soprano degree). This crate never derives them from raw chord
// symbols; it only reads them. A token sequence is immutable for the whole
// analysis and index positions are meaningful: spans, evidence and diagnostics
// all refer to token indices.
//
// `Span` lives here too because every span in the system is a half-open range
// of token indices.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Flag marking a six-four chord that prepares a dominant.
pub const FLAG_CADENTIAL_SIX_FOUR: &str = "cadential-six-four";

/// Functional role of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tonic,
    Predominant,
    Dominant,
    Other,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Tonic, Role::Predominant, Role::Dominant, Role::Other];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Tonic => "tonic",
            Role::Predominant => "predominant",
            Role::Dominant => "dominant",
            Role::Other => "other",
        }
    }

    pub fn parse(name: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == name)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_mode() -> String {
    "major".to_string()
}

/// One harmonic event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Roman-numeral label, e.g. `V7/V`, `ii6`, `bVII`.
    pub label: String,
    pub role: Role,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    /// Modal context (`major`, `minor`, `dorian`, ...).
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Signed bass motion in semitones from the previous token. `None` for the
    /// first token of a sequence.
    #[serde(default)]
    pub bass_motion: Option<i8>,
    /// Estimated soprano scale degree (1-7).
    #[serde(default)]
    pub soprano_degree: Option<u8>,
    /// Degree this token tonicises, e.g. `V` for `V7/V`.
    #[serde(default)]
    pub secondary_target: Option<String>,
    /// Quality family (`triad`, `seventh`, `half-diminished`, ...).
    #[serde(default)]
    pub quality: Option<String>,
}

impl Token {
    pub fn new(label: impl Into<String>, role: Role) -> Self {
        Token {
            label: label.into(),
            role,
            flags: BTreeSet::new(),
            mode: default_mode(),
            bass_motion: None,
            soprano_degree: None,
            secondary_target: None,
            quality: None,
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_bass_motion(mut self, semitones: i8) -> Self {
        self.bass_motion = Some(semitones);
        self
    }

    pub fn with_soprano(mut self, degree: u8) -> Self {
        self.soprano_degree = Some(degree);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.secondary_target = Some(target.into());
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// A secondary dominant either names its target explicitly or carries an
    /// applied-chord label (`X/Y`).
    pub fn is_secondary_dominant(&self) -> bool {
        self.secondary_target.is_some() || crate::labels::parse_label(&self.label).target.is_some()
    }
}

/// Half-open range `[start, end)` of token indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(self, other: Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Number of indices shared by both spans.
    pub fn overlap_len(self, other: Span) -> usize {
        let lo = self.start.max(other.start);
        let hi = self.end.min(other.end);
        hi.saturating_sub(lo)
    }

    /// Whether the span lies inside a sequence of `len` tokens.
    pub fn fits_within(self, len: usize) -> bool {
        self.start <= self.end && self.end <= len
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_deserializes_with_defaults() {
        let json = r#"{"label": "V7", "role": "dominant", "bass_motion": -5}"#;
        let token: Token = serde_json::from_str(json).unwrap();
        assert_eq!(token.role, Role::Dominant);
        assert_eq!(token.mode, "major");
        assert_eq!(token.bass_motion, Some(-5));
        assert!(token.flags.is_empty());
        assert!(token.soprano_degree.is_none());
    }

    #[test]
    fn secondary_dominant_detected_from_label_or_target() {
        assert!(Token::new("V7/V", Role::Dominant).is_secondary_dominant());
        assert!(Token::new("V7", Role::Dominant).with_target("ii").is_secondary_dominant());
        assert!(!Token::new("V6/5", Role::Dominant).is_secondary_dominant());
        assert!(!Token::new("V7", Role::Dominant).is_secondary_dominant());
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(0, 4);
        let b = Span::new(2, 6);
        let c = Span::new(4, 8);
        assert!(a.overlaps(b));
        assert!(!a.overlaps(c));
        assert_eq!(a.overlap_len(b), 2);
        assert_eq!(a.overlap_len(c), 0);
        assert!(b.fits_within(6));
        assert!(!b.fits_within(5));
    }

    #[test]
    fn role_parse_roundtrip() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("subdominant"), None);
    }
}
