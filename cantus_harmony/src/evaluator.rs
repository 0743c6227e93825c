// Evaluator plugins: turn a successful match into `Evidence`.
//
// Each pattern names its evaluator in `evidence.scorer`. The registry maps
// names to `Arc<dyn Evaluator>` and is an ordinary value owned by the engine,
// so callers can build their own, add plugins, or swap in a test double.
//
// Built-ins:
// - `default`       every declared track gets the clamped match score;
//                   declared features are extracted; uncertainty is the
//                   fraction of optional steps that were skipped.
// - `modal_biased`  as `default`, but halves `functional` when the pattern
//                   also feeds a `modal` track.
// - `identity`      tracks get the clamped score, nothing else.
//
// Registering a name twice is an error. A pattern naming an unregistered
// evaluator is evaluated with `identity` instead, with a warning; other
// patterns are unaffected.

use crate::error::RegistryError;
use crate::events::WindowEvents;
use crate::evidence::{Evidence, clamp_unit};
use crate::features;
use crate::matcher::MatchResult;
use crate::pattern::Pattern;
use crate::token::Token;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What an evaluator gets to look at besides the pattern.
pub struct EvaluationContext<'a> {
    /// The whole analysed sequence.
    pub tokens: &'a [Token],
    pub matched: &'a MatchResult,
    /// Events of the matched window.
    pub events: &'a WindowEvents,
    pub profile: &'a str,
    /// Largest bass motion (semitones) counted as smooth.
    pub smooth_step: u8,
}

impl EvaluationContext<'_> {
    pub fn window(&self) -> &[Token] {
        &self.tokens[self.matched.span.start..self.matched.span.end]
    }
}

pub trait Evaluator: Send + Sync {
    fn evaluate(&self, pattern: &Pattern, ctx: &EvaluationContext<'_>) -> Evidence;
}

fn base_evidence(pattern: &Pattern, ctx: &EvaluationContext<'_>) -> Evidence {
    let weight = clamp_unit(ctx.matched.score);
    pattern.tracks.iter().fold(
        Evidence::new(&pattern.id, ctx.matched.span, ctx.matched.score),
        |e, track| e.with_track(track.as_str(), weight),
    )
}

pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
    fn evaluate(&self, pattern: &Pattern, ctx: &EvaluationContext<'_>) -> Evidence {
        let mut evidence = base_evidence(pattern, ctx);
        let window = ctx.window();
        for name in &pattern.evidence.features {
            if let Some(value) = features::extract(name, window, ctx.events, ctx.matched, ctx.smooth_step) {
                evidence.features.insert(name.clone(), value);
            }
        }
        let steps = pattern.matchers.steps.len();
        if steps > 0 {
            evidence.uncertainty = Some(ctx.matched.skipped_steps as f64 / steps as f64);
        }
        evidence
    }
}

pub struct ModalBiasedEvaluator;

impl Evaluator for ModalBiasedEvaluator {
    fn evaluate(&self, pattern: &Pattern, ctx: &EvaluationContext<'_>) -> Evidence {
        let mut evidence = DefaultEvaluator.evaluate(pattern, ctx);
        if evidence.tracks.contains_key("modal") {
            if let Some(functional) = evidence.tracks.get_mut("functional") {
                *functional *= 0.5;
            }
        }
        evidence
    }
}

pub struct IdentityEvaluator;

impl Evaluator for IdentityEvaluator {
    fn evaluate(&self, pattern: &Pattern, ctx: &EvaluationContext<'_>) -> Evidence {
        base_evidence(pattern, ctx)
    }
}

#[derive(Clone)]
pub struct EvaluatorRegistry {
    evaluators: BTreeMap<String, Arc<dyn Evaluator>>,
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.evaluators.keys()).finish()
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl EvaluatorRegistry {
    pub fn empty() -> Self {
        EvaluatorRegistry {
            evaluators: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut evaluators: BTreeMap<String, Arc<dyn Evaluator>> = BTreeMap::new();
        evaluators.insert("default".into(), Arc::new(DefaultEvaluator));
        evaluators.insert("modal_biased".into(), Arc::new(ModalBiasedEvaluator));
        evaluators.insert("identity".into(), Arc::new(IdentityEvaluator));
        EvaluatorRegistry { evaluators }
    }

    pub fn register(&mut self, name: &str, evaluator: Arc<dyn Evaluator>) -> Result<(), RegistryError> {
        if self.evaluators.contains_key(name) {
            return Err(RegistryError::Duplicate {
                kind: "evaluator",
                name: name.to_string(),
            });
        }
        self.evaluators.insert(name.to_string(), evaluator);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.evaluators.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.evaluators.keys().map(String::as_str)
    }

    /// `(pattern id, scorer)` for every pattern whose scorer is not
    /// registered, in library order.
    pub fn unknown_scorers<'a>(&self, patterns: impl IntoIterator<Item = &'a Pattern>) -> Vec<(String, String)> {
        patterns
            .into_iter()
            .filter(|p| !self.contains(&p.evidence.scorer))
            .map(|p| (p.id.clone(), p.evidence.scorer.clone()))
            .collect()
    }

    /// Evaluate with the pattern's named evaluator, or `identity` if that
    /// name is not registered. Unknown names are reported once, when the
    /// engine is set up, not here.
    pub fn evaluate(&self, pattern: &Pattern, ctx: &EvaluationContext<'_>) -> Evidence {
        match self.evaluators.get(&pattern.evidence.scorer) {
            Some(evaluator) => evaluator.evaluate(pattern, ctx),
            None => IdentityEvaluator.evaluate(pattern, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::token::{Role, Span};

    fn pattern(scorer: &str, tracks: &[&str], features: &[&str]) -> Pattern {
        serde_json::from_value(serde_json::json!({
            "id": "cadence.test",
            "name": "Test",
            "tracks": tracks,
            "matchers": {"steps": [{"role": "dominant", "optional": true}, {"role": "tonic"}]},
            "evidence": {"base": 0.5, "scorer": scorer, "features": features}
        }))
        .unwrap()
    }

    fn tokens() -> Vec<Token> {
        vec![
            Token::new("V", Role::Dominant),
            Token::new("I", Role::Tonic).with_bass_motion(5).with_soprano(1),
        ]
    }

    fn evaluate(registry: &EvaluatorRegistry, p: &Pattern, score: f64, skipped: usize) -> Evidence {
        let tokens = tokens();
        let mut matched = MatchResult::matched(&p.id, Span::new(0, 2), score);
        matched.skipped_steps = skipped;
        let ev = events::extract(&tokens);
        let ctx = EvaluationContext {
            tokens: &tokens,
            matched: &matched,
            events: &ev,
            profile: "classical",
            smooth_step: 2,
        };
        registry.evaluate(p, &ctx)
    }

    #[test]
    fn default_fills_tracks_features_and_uncertainty() {
        let registry = EvaluatorRegistry::with_builtins();
        let p = pattern("default", &["functional"], &["soprano_arrival", "window_length"]);
        let e = evaluate(&registry, &p, 0.8, 1);
        assert_eq!(e.tracks["functional"], 0.8);
        assert_eq!(e.features["soprano_arrival"], 1.0);
        assert_eq!(e.features["window_length"], 2.0);
        assert_eq!(e.uncertainty, Some(0.5));
        assert_eq!(e.span, Span::new(0, 2));
    }

    #[test]
    fn modal_biased_halves_functional_when_modal_present() {
        let registry = EvaluatorRegistry::with_builtins();
        let both = pattern("modal_biased", &["functional", "modal"], &[]);
        let e = evaluate(&registry, &both, 0.8, 0);
        assert!((e.tracks["functional"] - 0.4).abs() < 1e-12);
        assert_eq!(e.tracks["modal"], 0.8);

        let functional_only = pattern("modal_biased", &["functional"], &[]);
        assert_eq!(evaluate(&registry, &functional_only, 0.8, 0).tracks["functional"], 0.8);
    }

    #[test]
    fn unknown_scorer_falls_back_to_identity() {
        let registry = EvaluatorRegistry::with_builtins();
        let p = pattern("no_such_scorer", &["functional"], &["window_length"]);
        let e = evaluate(&registry, &p, 1.3, 1);
        assert_eq!(e.tracks["functional"], 1.0);
        assert!(e.features.is_empty());
        assert_eq!(e.uncertainty, None);
        assert_eq!(e.raw_score, 1.3);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = EvaluatorRegistry::with_builtins();
        let err = registry.register("default", Arc::new(IdentityEvaluator)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                kind: "evaluator",
                name: "default".to_string()
            }
        );
        registry.register("custom", Arc::new(IdentityEvaluator)).unwrap();
        assert!(registry.contains("custom"));
        assert_eq!(format!("{registry:?}"), r#"{"custom", "default", "identity", "modal_biased"}"#);
    }
}
