// Shared fixtures for end-to-end scenario tests.
//
// Builders for token sequences and labelled calibration samples, plus small
// single-purpose pattern libraries written inline as JSON. Everything here
// goes through the same public API an external caller would use; there are no
// test-only hooks into `cantus_harmony`.
//
// See also: `tests/full_pipeline.rs` for the scenarios themselves.

use std::sync::Arc;

use cantus_harmony::engine::Engine;
use cantus_harmony::library::PatternLibrary;
use cantus_harmony::token::{Role, Token};
use serde_json::{Value, json};

/// One token description: label, role, bass motion from the previous token.
pub type Step<'a> = (&'a str, Role, Option<i8>);

/// Build a token sequence from `(label, role, bass motion)` triples.
pub fn sequence(steps: &[Step<'_>]) -> Vec<Token> {
    steps
        .iter()
        .map(|&(label, role, motion)| {
            let token = Token::new(label, role);
            match motion {
                Some(m) => token.with_bass_motion(m),
                None => token,
            }
        })
        .collect()
}

/// I–vi–IV–V–I with the melody arriving on `final_soprano`.
pub fn five_token_cadence(final_soprano: u8) -> Vec<Token> {
    let mut tokens = sequence(&[
        ("I", Role::Tonic, None),
        ("vi", Role::Tonic, Some(-3)),
        ("IV", Role::Predominant, Some(-4)),
        ("V", Role::Dominant, Some(2)),
        ("I", Role::Tonic, Some(-7)),
    ]);
    if let Some(last) = tokens.pop() {
        tokens.push(last.with_soprano(final_soprano));
    }
    tokens
}

/// I–IV–I64–V7–I, a complete cadential phrase in C major.
pub fn cadential_phrase() -> Vec<Token> {
    let mut tokens = sequence(&[
        ("I", Role::Tonic, None),
        ("IV", Role::Predominant, Some(5)),
        ("I64", Role::Tonic, Some(2)),
        ("V7", Role::Dominant, Some(0)),
        ("I", Role::Tonic, Some(-7)),
    ]);
    if let Some(last) = tokens.pop() {
        tokens.push(last.with_soprano(1));
    }
    tokens
}

/// A library document holding `patterns`.
pub fn library_doc(patterns: Value) -> Value {
    json!({ "version": 1, "patterns": patterns })
}

pub fn library(patterns: Value) -> PatternLibrary {
    PatternLibrary::from_json_str(&library_doc(patterns).to_string())
        .expect("fixture library is valid")
}

pub fn engine_for(patterns: Value) -> Engine {
    Engine::new(Arc::new(library(patterns)))
}

pub fn builtin_engine() -> Engine {
    Engine::builtin().expect("bundled library is valid")
}

/// A single-step pattern accepting `label` under any role.
pub fn single_label_pattern(id: &str, label: &str) -> Value {
    json!({
        "id": id,
        "name": id,
        "tracks": ["functional"],
        "matchers": { "steps": [ { "role": "any", "labels": [label] } ] },
        "evidence": { "base": 0.5 }
    })
}

/// Exactly five tokens: anything, anything, predominant, dominant, tonic.
pub fn five_step_cadence_pattern() -> Value {
    json!({
        "id": "cadence.five_step",
        "name": "Five-step cadence",
        "tracks": ["functional"],
        "matchers": {
            "window": { "min": 5, "max": 5 },
            "steps": [
                { "role": "any" },
                { "role": "any" },
                { "role": "predominant" },
                { "role": "dominant" },
                { "role": "tonic" }
            ]
        },
        "evidence": { "base": 0.5 }
    })
}

/// `n` evenly spaced raw scores in [0, 1] with targets `target(raw)`.
pub fn samples(n: usize, target: impl Fn(f64) -> f64) -> (Vec<f64>, Vec<f64>) {
    let raw: Vec<f64> = (0..n)
        .map(|i| if n > 1 { i as f64 / (n - 1) as f64 } else { 0.5 })
        .collect();
    let targets = raw.iter().map(|&x| target(x)).collect();
    (raw, targets)
}
