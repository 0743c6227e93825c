// Orchestration: tokens in, selected matches and confidences out.
//
//   tokens ─▶ match_all ─▶ successful candidates ─▶ optimal cover (optional)
//          ─▶ evaluator per selected match ─▶ aggregate ─▶ calibrate
//
// `Engine` owns the read-only pieces (library behind `Arc`, the three
// registries, config). `analyze` takes `&self` and keeps every intermediate
// value local, so one engine can serve concurrent callers; the only mutable
// state is the caller's optional `MatchCache`.
//
// Patterns naming an unregistered evaluator are reported once per engine,
// on the first `analyze`, after the builder calls have settled the registry.
//
// Failed attempts are not returned one by one; `Analysis::failures` counts
// them per failure kind.

use crate::aggregate::{AggregateResult, aggregate};
use crate::cache::MatchCache;
use crate::calibration::CalibrationMapping;
use crate::config::AnalysisConfig;
use crate::constraints::ConstraintRegistry;
use crate::descriptors::DescriptorRegistry;
use crate::evaluator::{EvaluationContext, EvaluatorRegistry};
use crate::events;
use crate::evidence::{Evidence, clamp_unit};
use crate::library::{LibraryError, PatternLibrary};
use crate::matcher::{self, MatchContext, MatchResult};
use crate::token::Token;
use cantus_cover::ScoredInterval;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Debug, Serialize)]
pub struct Analysis {
    pub profile: String,
    /// Successful matches, in library order.
    pub candidates: Vec<MatchResult>,
    /// The candidates that feed evidence: the optimal cover, or all of them
    /// when the cover is disabled.
    pub selected: Vec<MatchResult>,
    pub evidence: Vec<Evidence>,
    pub aggregate: AggregateResult,
    pub raw_confidence: f64,
    pub calibrated_confidence: f64,
    /// Failed attempts per failure kind.
    pub failures: BTreeMap<String, usize>,
}

#[derive(Debug)]
pub struct Engine {
    library: Arc<PatternLibrary>,
    evaluators: EvaluatorRegistry,
    descriptors: DescriptorRegistry,
    constraints: ConstraintRegistry,
    config: AnalysisConfig,
    scorers_checked: OnceLock<()>,
}

impl Engine {
    pub fn new(library: Arc<PatternLibrary>) -> Self {
        Engine {
            library,
            evaluators: EvaluatorRegistry::with_builtins(),
            descriptors: DescriptorRegistry::builtin(),
            constraints: ConstraintRegistry::builtin(),
            config: AnalysisConfig::default(),
            scorers_checked: OnceLock::new(),
        }
    }

    /// An engine over the bundled pattern library.
    pub fn builtin() -> Result<Self, LibraryError> {
        Ok(Engine::new(Arc::new(PatternLibrary::builtin()?)))
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_evaluators(mut self, evaluators: EvaluatorRegistry) -> Self {
        self.evaluators = evaluators;
        self.scorers_checked = OnceLock::new();
        self
    }

    pub fn with_descriptors(mut self, descriptors: DescriptorRegistry) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn with_constraints(mut self, constraints: ConstraintRegistry) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn library(&self) -> &Arc<PatternLibrary> {
        &self.library
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Patterns whose scorer has no registered evaluator; they are scored
    /// with `identity`.
    pub fn unknown_scorers(&self) -> Vec<(String, String)> {
        self.evaluators
            .unknown_scorers(self.library.patterns().iter().map(|p| &p.def))
    }

    fn warn_unknown_scorers(&self) {
        for (pattern, scorer) in self.unknown_scorers() {
            tracing::warn!(%pattern, %scorer, "unknown evaluator, falling back to identity");
        }
    }

    pub fn analyze(
        &self,
        tokens: &[Token],
        profile: &str,
        mapping: Option<&CalibrationMapping>,
        cache: Option<&mut MatchCache>,
    ) -> Analysis {
        self.scorers_checked.get_or_init(|| self.warn_unknown_scorers());
        if self.library.profiles().get(profile).is_none() {
            tracing::warn!(profile, "unknown style profile, using pattern-local substitutions only");
        }

        let ctx = MatchContext {
            descriptors: &self.descriptors,
            constraints: &self.constraints,
            config: &self.config.matcher,
        };
        let attempts = matcher::match_all(ctx, &self.library, tokens, profile, cache);

        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        let mut candidates = Vec::new();
        for attempt in attempts {
            match &attempt.failure {
                Some(failure) => *failures.entry(failure.kind().as_str().to_string()).or_default() += 1,
                None => candidates.push(attempt),
            }
        }

        let selected = if self.config.cover.enabled {
            select_cover(&candidates)
        } else {
            candidates.clone()
        };

        let evidence: Vec<Evidence> = selected
            .iter()
            .filter_map(|m| self.evaluate_match(tokens, m, profile))
            .collect();

        let aggregate = aggregate(&evidence, &self.config.aggregation);
        let raw_confidence = aggregate.combined;
        let calibrated_confidence = match mapping {
            Some(m) => m.apply(raw_confidence),
            None => clamp_unit(raw_confidence),
        };

        tracing::debug!(
            tokens = tokens.len(),
            candidates = candidates.len(),
            selected = selected.len(),
            raw_confidence,
            calibrated_confidence,
            "analysis complete"
        );

        Analysis {
            profile: profile.to_string(),
            candidates,
            selected,
            evidence,
            aggregate,
            raw_confidence,
            calibrated_confidence,
            failures,
        }
    }

    fn evaluate_match(&self, tokens: &[Token], matched: &MatchResult, profile: &str) -> Option<Evidence> {
        let pattern = self.library.get(&matched.pattern_id)?;
        let events = events::extract(&tokens[matched.span.start..matched.span.end]);
        let ctx = EvaluationContext {
            tokens,
            matched,
            events: &events,
            profile,
            smooth_step: self.config.matcher.smooth_bass_max_semitones,
        };
        Some(self.evaluators.evaluate(&pattern.def, &ctx))
    }
}

/// Maximum-score non-overlapping subset of `candidates`, in span order.
pub fn select_cover(candidates: &[MatchResult]) -> Vec<MatchResult> {
    let intervals: Vec<ScoredInterval<()>> = candidates
        .iter()
        .map(|m| ScoredInterval::new(m.span.start, m.span.end, m.score, ()))
        .collect();
    cantus_cover::solve_indices(&intervals)
        .into_iter()
        .map(|i| candidates[i].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoverConfig;
    use crate::token::{Role, Span};

    fn engine() -> Engine {
        Engine::builtin().unwrap()
    }

    fn authentic_cadence() -> Vec<Token> {
        vec![
            Token::new("I", Role::Tonic),
            Token::new("IV", Role::Predominant).with_bass_motion(5),
            Token::new("V", Role::Dominant).with_bass_motion(2),
            Token::new("I", Role::Tonic).with_bass_motion(-7).with_soprano(1),
        ]
    }

    #[test]
    fn empty_sequence_has_zero_confidence() {
        let analysis = engine().analyze(&[], "classical", None, None);
        assert!(analysis.candidates.is_empty());
        assert_eq!(analysis.raw_confidence, 0.0);
        assert_eq!(analysis.calibrated_confidence, 0.0);
        assert!(analysis.failures.contains_key("window_size_rejection"));
    }

    #[test]
    fn cadence_is_selected() {
        let analysis = engine().analyze(&authentic_cadence(), "classical", None, None);
        assert!(
            analysis
                .selected
                .iter()
                .any(|m| m.pattern_id.starts_with("cadence.authentic"))
        );
        assert!(analysis.raw_confidence > 0.0);
        for e in &analysis.evidence {
            assert!(e.span.end <= 4);
        }
    }

    #[test]
    fn cover_output_never_overlaps() {
        let analysis = engine().analyze(&authentic_cadence(), "classical", None, None);
        for (i, a) in analysis.selected.iter().enumerate() {
            for b in &analysis.selected[i + 1..] {
                assert!(!a.span.overlaps(b.span), "{} overlaps {}", a.pattern_id, b.pattern_id);
            }
        }
    }

    #[test]
    fn disabled_cover_keeps_every_candidate() {
        let config = AnalysisConfig {
            cover: CoverConfig { enabled: false },
            ..AnalysisConfig::default()
        };
        let analysis = engine()
            .with_config(config)
            .analyze(&authentic_cadence(), "classical", None, None);
        assert_eq!(analysis.selected.len(), analysis.candidates.len());
    }

    #[test]
    fn calibration_mapping_is_applied() {
        let failed = CalibrationMapping {
            passed_gates: false,
            ..CalibrationMapping::identity()
        };
        let analysis = engine().analyze(&authentic_cadence(), "classical", Some(&failed), None);
        assert_eq!(analysis.calibrated_confidence, clamp_unit(analysis.raw_confidence));
    }

    #[test]
    fn cache_reuses_results() {
        let engine = engine();
        let tokens = authentic_cadence();
        let mut cache = MatchCache::new();
        let first = engine.analyze(&tokens, "classical", None, Some(&mut cache));
        assert_eq!(cache.hits(), 0);
        let second = engine.analyze(&tokens, "classical", None, Some(&mut cache));
        assert!(cache.hits() > 0);
        assert_eq!(first.candidates, second.candidates);
        assert_eq!(first.raw_confidence, second.raw_confidence);
    }

    #[test]
    fn select_cover_prefers_heavier_span() {
        let candidates = vec![
            MatchResult::matched("a.x", Span::new(0, 4), 0.90),
            MatchResult::matched("b.y", Span::new(2, 6), 0.95),
        ];
        let selected = select_cover(&candidates);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].pattern_id, "b.y");
    }

    #[test]
    fn unregistered_scorer_is_listed_and_scored_as_identity() {
        let doc = serde_json::json!({"version": 1, "patterns": [{
            "id": "cadence.half",
            "name": "Half cadence",
            "tracks": ["functional"],
            "matchers": {"steps": [{"role": "predominant"}, {"role": "dominant"}]},
            "evidence": {"base": 0.5, "scorer": "mystery"}
        }]});
        let library = Arc::new(PatternLibrary::from_json_str(&doc.to_string()).unwrap());
        let engine = Engine::new(library);
        assert_eq!(
            engine.unknown_scorers(),
            vec![("cadence.half".to_string(), "mystery".to_string())]
        );

        let tokens = vec![
            Token::new("IV", Role::Predominant),
            Token::new("V", Role::Dominant),
        ];
        for _ in 0..3 {
            let analysis = engine.analyze(&tokens, "classical", None, None);
            assert_eq!(analysis.evidence.len(), 1);
            assert_eq!(analysis.evidence[0].raw_score, analysis.selected[0].score);
        }
        assert!(engine.scorers_checked.get().is_some());
    }

    #[test]
    fn replacing_evaluators_rechecks_scorers() {
        let engine = engine();
        assert!(engine.unknown_scorers().is_empty());
        let engine = engine.with_evaluators(EvaluatorRegistry::empty());
        assert_eq!(engine.unknown_scorers().len(), engine.library().len());
        assert!(engine.scorers_checked.get().is_none());
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
