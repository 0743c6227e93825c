// End-to-end scenarios for the analysis pipeline.
//
// Each test builds tokens with the fixtures in `cantus_scenarios`, runs them
// through a real `Engine` (bundled or inline library), and checks the
// observable outcome: candidates, the optimal cover, evidence, aggregate and
// calibrated confidence. Calibration scenarios fit on synthetic labelled data
// and feed the resulting mapping back into `analyze`.

use std::sync::Arc;
use std::thread;

use cantus_cover::ScoredInterval;
use cantus_harmony::aggregate::{AggregatorConfig, ConflictStrategy, SoftNmsParams, aggregate};
use cantus_harmony::cache::MatchCache;
use cantus_harmony::calibration::{self, CalibrationMapping, CalibrationMethod, Mapping, QualityGates};
use cantus_harmony::config::AnalysisConfig;
use cantus_harmony::engine::{Engine, select_cover};
use cantus_harmony::error::RegistryError;
use cantus_harmony::evaluator::{EvaluationContext, Evaluator, EvaluatorRegistry, IdentityEvaluator};
use cantus_harmony::evidence::Evidence;
use cantus_harmony::library::{LibraryError, PatternLibrary};
use cantus_harmony::matcher::MatchResult;
use cantus_harmony::metrics;
use cantus_harmony::pattern::Pattern;
use cantus_harmony::schema::SchemaProblem;
use cantus_harmony::token::{Role, Span, Token};
use cantus_scenarios::*;
use serde_json::json;

fn assert_no_overlaps(selected: &[MatchResult]) {
    for (i, a) in selected.iter().enumerate() {
        for b in &selected[i + 1..] {
            assert!(!a.span.overlaps(b.span), "{} overlaps {}", a.pattern_id, b.pattern_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// A step asking for IV accepts ii6 under the classical profile only.
#[test]
fn substitution_depends_on_profile() {
    let engine = engine_for(json!([single_label_pattern("test.subdominant", "IV")]));
    let tokens = sequence(&[("ii6", Role::Predominant, None)]);

    let classical = engine.analyze(&tokens, "classical", None, None);
    assert_eq!(classical.candidates.len(), 1);
    let step = &classical.candidates[0].steps[0];
    assert!(step.via_substitution);
    assert_eq!(step.accepted_as.as_deref(), Some("ii6"));

    let jazz = engine.analyze(&tokens, "jazz", None, None);
    assert!(jazz.candidates.is_empty());
    assert_eq!(jazz.failures.get("step_mismatch"), Some(&1));
    assert_eq!(jazz.raw_confidence, 0.0);
}

/// Dominant → tonic with the soprano on 1 earns the strong-cadence bonus.
#[test]
fn five_token_strong_cadence() {
    let engine = engine_for(json!([five_step_cadence_pattern()]));

    let strong = engine.analyze(&five_token_cadence(1), "classical", None, None);
    assert_eq!(strong.candidates.len(), 1);
    let matched = &strong.candidates[0];
    assert!(matched.success());
    assert_eq!(matched.span, Span::new(0, 5));
    assert_eq!(matched.breakdown.strong_cadence, 0.15);

    let weak = engine.analyze(&five_token_cadence(3), "classical", None, None);
    assert_eq!(weak.candidates.len(), 1);
    assert_eq!(weak.candidates[0].breakdown.strong_cadence, 0.0);
    assert!((matched.score - weak.candidates[0].score - 0.15).abs() < 1e-9);
}

#[test]
fn cadential_six_four_is_recognised() {
    let analysis = builtin_engine().analyze(&cadential_phrase(), "classical", None, None);
    let six_four = analysis
        .candidates
        .iter()
        .find(|m| m.pattern_id == "cadence.cadential_six_four")
        .expect("cadential six-four matched");
    assert_eq!(six_four.span, Span::new(2, 5));
    // I64 counts as dominant for this pattern only.
    assert_eq!(six_four.steps[0].role, Role::Dominant);

    assert!(
        analysis
            .candidates
            .iter()
            .any(|m| m.pattern_id == "cadence.authentic.perfect" && m.span == Span::new(3, 5))
    );
    assert_no_overlaps(&analysis.selected);
    assert_eq!(analysis.evidence.len(), analysis.selected.len());
    assert!(analysis.raw_confidence > 0.0 && analysis.raw_confidence <= 1.0);
    for e in &analysis.evidence {
        assert!(e.span.end <= 5);
    }
}

#[test]
fn structural_patterns_match_whole_windows() {
    let engine = builtin_engine();

    let canon = sequence(&[
        ("I", Role::Tonic, None),
        ("V6", Role::Dominant, Some(-1)),
        ("vi", Role::Tonic, Some(-2)),
        ("iii6", Role::Tonic, Some(-1)),
        ("IV", Role::Predominant, Some(-2)),
        ("I6", Role::Tonic, Some(-1)),
        ("IV", Role::Predominant, Some(-2)),
        ("V", Role::Dominant, Some(2)),
    ]);
    let analysis = engine.analyze(&canon, "classical", None, None);
    assert!(
        analysis
            .candidates
            .iter()
            .any(|m| m.pattern_id == "schema.pachelbel" && m.span == Span::new(0, 8))
    );

    let lament: Vec<Token> = sequence(&[
        ("i", Role::Tonic, None),
        ("v6", Role::Dominant, Some(-1)),
        ("iv6", Role::Predominant, Some(-2)),
        ("V", Role::Dominant, Some(-1)),
    ])
    .into_iter()
    .map(|t| t.with_mode("minor"))
    .collect();
    let minor = engine.analyze(&lament, "classical", None, None);
    assert!(minor.candidates.iter().any(|m| m.pattern_id == "bass.lament"));

    // Same bass line in major: the pattern is scoped to minor.
    let major = sequence(&[
        ("I", Role::Tonic, None),
        ("V6", Role::Dominant, Some(-1)),
        ("IV6", Role::Predominant, Some(-2)),
        ("V", Role::Dominant, Some(-1)),
    ]);
    let analysis = engine.analyze(&major, "classical", None, None);
    assert!(!analysis.candidates.iter().any(|m| m.pattern_id == "bass.lament"));
}

#[test]
fn profile_scoped_patterns() {
    let engine = builtin_engine();
    let tokens = sequence(&[("bVII", Role::Other, None), ("I", Role::Tonic, Some(2))]);

    let pop = engine.analyze(&tokens, "pop", None, None);
    let evidence = pop
        .evidence
        .iter()
        .find(|e| e.pattern_id == "modal.mixolydian_cadence")
        .expect("mixolydian cadence selected under pop");
    // The modal-biased evaluator halves the functional track.
    assert!((evidence.tracks["functional"] - evidence.tracks["modal"] * 0.5).abs() < 1e-12);

    let classical = engine.analyze(&tokens, "classical", None, None);
    assert!(
        !classical
            .candidates
            .iter()
            .any(|m| m.pattern_id == "modal.mixolydian_cadence")
    );
}

#[test]
fn empty_and_short_sequences_are_not_errors() {
    let engine = builtin_engine();
    let empty = engine.analyze(&[], "classical", None, None);
    assert!(empty.selected.is_empty());
    assert_eq!(empty.calibrated_confidence, 0.0);

    let one = engine.analyze(&sequence(&[("I", Role::Tonic, None)]), "classical", None, None);
    assert!(one.failures.contains_key("window_size_rejection"));
}

// ---------------------------------------------------------------------------
// Optimal cover
// ---------------------------------------------------------------------------

#[test]
fn cover_prefers_heavier_overlapping_match() {
    let candidates = vec![
        MatchResult::matched("cadence.a", Span::new(0, 4), 0.90),
        MatchResult::matched("cadence.b", Span::new(2, 6), 0.95),
    ];
    let selected = select_cover(&candidates);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].span, Span::new(2, 6));

    let intervals = vec![
        ScoredInterval::new(0, 4, 0.90, "a"),
        ScoredInterval::new(2, 6, 0.95, "b"),
    ];
    let solved = cantus_cover::solve(&intervals);
    assert_eq!(solved.len(), 1);
    assert_eq!(solved[0].payload, "b");
}

#[test]
fn cover_keeps_disjoint_matches() {
    let candidates = vec![
        MatchResult::matched("cadence.a", Span::new(0, 2), 0.3),
        MatchResult::matched("cadence.b", Span::new(2, 4), 0.4),
        MatchResult::matched("cadence.c", Span::new(5, 7), 0.2),
    ];
    assert_eq!(select_cover(&candidates).len(), 3);
}

// ---------------------------------------------------------------------------
// Evaluators
// ---------------------------------------------------------------------------

struct Constant(f64);

impl Evaluator for Constant {
    fn evaluate(&self, pattern: &Pattern, ctx: &EvaluationContext<'_>) -> Evidence {
        Evidence::new(&pattern.id, ctx.matched.span, self.0).with_track("functional", self.0)
    }
}

fn scored_pattern(scorer: &str) -> serde_json::Value {
    json!([{
        "id": "test.scored",
        "name": "scored",
        "tracks": ["functional"],
        "matchers": { "steps": [ { "role": "tonic", "labels": ["I"] } ] },
        "evidence": { "base": 0.4, "scorer": scorer, "features": ["window_length"] }
    }])
}

#[test]
fn unknown_evaluator_falls_back_to_identity() {
    let engine = engine_for(scored_pattern("mystery"));
    let analysis = engine.analyze(&sequence(&[("I", Role::Tonic, None)]), "classical", None, None);
    assert_eq!(analysis.evidence.len(), 1);
    let evidence = &analysis.evidence[0];
    assert!((evidence.tracks["functional"] - analysis.selected[0].score).abs() < 1e-12);
    // Identity attaches no features.
    assert!(evidence.features.is_empty());
}

#[test]
fn custom_evaluator_is_used() {
    let mut registry = EvaluatorRegistry::with_builtins();
    registry.register("constant", Arc::new(Constant(0.42))).unwrap();
    let engine = engine_for(scored_pattern("constant")).with_evaluators(registry);
    let analysis = engine.analyze(&sequence(&[("I", Role::Tonic, None)]), "classical", None, None);
    assert_eq!(analysis.evidence[0].tracks["functional"], 0.42);
}

#[test]
fn duplicate_evaluator_is_rejected() {
    let mut registry = EvaluatorRegistry::with_builtins();
    let err = registry
        .register("default", Arc::new(IdentityEvaluator))
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::Duplicate {
            kind: "evaluator",
            name: "default".to_string()
        }
    );
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

fn functional(id: &str, start: usize, end: usize, score: f64) -> Evidence {
    Evidence::new(id, Span::new(start, end), score).with_track("functional", score)
}

#[test]
fn soft_nms_attenuates_overlaps_and_drops_buried_readings() {
    let config = AggregatorConfig {
        strategy: ConflictStrategy::SoftNms(SoftNmsParams::default()),
        ..AggregatorConfig::default()
    };
    // Five equally scored readings of the same window, then a pair sharing
    // one token further on.
    let mut evidence: Vec<Evidence> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|id| functional(&format!("cadence.{id}"), 0, 4, 0.9))
        .collect();
    evidence.push(functional("cadence.far", 10, 14, 0.95));
    evidence.push(functional("sequence.neighbour", 13, 17, 0.93));

    let result = aggregate(&evidence, &config);
    let kept: Vec<&str> = result.kept.iter().map(|e| e.pattern_id.as_str()).collect();
    assert_eq!(
        kept,
        vec![
            "cadence.far",
            "sequence.neighbour",
            "cadence.a",
            "cadence.b",
            "cadence.c",
            "cadence.d"
        ]
    );
    let buried = result
        .debug
        .decays
        .iter()
        .find(|r| r.pattern_id == "cadence.e")
        .unwrap();
    assert!((buried.decay - 0.0625).abs() < 1e-12);
    assert!(!buried.kept);

    let decay = 1.0 - 0.5 * (-0.02f64).exp();
    let neighbour = &result.kept[1];
    assert!((neighbour.raw_score - 0.93 * decay).abs() < 1e-12);
    assert!((neighbour.tracks["functional"] - 0.93 * decay).abs() < 1e-12);
    assert_eq!(result.debug.count_before, 7);
    assert_eq!(result.debug.count_after, 6);
}

#[test]
fn track_confidence_grows_and_stays_bounded() {
    let config = AggregatorConfig::default();
    let mut evidence = Vec::new();
    let mut previous = 0.0;
    for i in 0..20 {
        evidence.push(Evidence::new("cadence.x", Span::new(i * 2, i * 2 + 1), 0.6).with_track("functional", 0.6));
        let total = aggregate(&evidence, &config).tracks["functional"];
        assert!(total >= previous);
        assert!(total <= 1.0);
        previous = total;
    }
    assert_eq!(previous, 1.0);
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

#[test]
fn ten_samples_give_identity_even_when_perfectly_correlated() {
    let (raw, targets) = samples(10, |x| x);
    for method in [CalibrationMethod::Auto, CalibrationMethod::Logistic, CalibrationMethod::Isotonic] {
        let mapping = calibration::fit(&raw, &targets, method, &QualityGates::default());
        assert_eq!(mapping.mapping, Mapping::Identity);
        assert!(!mapping.passed_gates);
        for x in [0.0, 0.1, 0.25, 0.5, 0.9, 1.0] {
            assert_eq!(mapping.apply(x), x);
        }
    }
}

#[test]
fn accepted_mappings_are_nearly_monotonic() {
    let (raw, targets) = samples(150, |x| 0.1 + 0.7 * x * x);
    for method in [CalibrationMethod::Logistic, CalibrationMethod::Isotonic] {
        let mapping = calibration::fit(&raw, &targets, method, &QualityGates::default());
        assert!(mapping.passed_gates, "{method} failed: {:?}", mapping.failed_gates);
        let grid: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        let outputs: Vec<f64> = grid.iter().map(|&x| mapping.apply(x)).collect();
        assert!(metrics::monotonic_fraction(&grid, &outputs) >= 0.9);
    }
}

#[test]
fn fitted_mapping_survives_json_and_feeds_analysis() {
    let (raw, targets) = samples(200, |x| 0.2 + 0.6 * x * x);
    let mapping = calibration::fit(&raw, &targets, CalibrationMethod::Auto, &QualityGates::default());
    assert!(mapping.passed_gates);

    let json = serde_json::to_string(&mapping).unwrap();
    let restored: CalibrationMapping = serde_json::from_str(&json).unwrap();
    for x in [0.0, 0.3, 0.6, 1.0] {
        assert!((mapping.apply(x) - restored.apply(x)).abs() < 1e-12);
    }

    let analysis = builtin_engine().analyze(&cadential_phrase(), "classical", Some(&restored), None);
    assert!((analysis.calibrated_confidence - restored.apply(analysis.raw_confidence)).abs() < 1e-12);

    let report = calibration::evaluate(&restored, &raw, &targets, 10, &QualityGates::default());
    assert!(report.delta.ece <= 0.0);
    assert!(!report.reliability.is_empty());
}

// ---------------------------------------------------------------------------
// Library loading
// ---------------------------------------------------------------------------

#[test]
fn loader_reports_path_of_missing_field() {
    let doc = library_doc(json!([{
        "id": "cadence.broken",
        "name": "broken",
        "matchers": { "steps": [ { "role": "tonic" } ] },
        "evidence": { "base": 0.5 }
    }]));
    match PatternLibrary::from_json_str(&doc.to_string()) {
        Err(LibraryError::Schema(err)) => {
            assert_eq!(err.path, "patterns[0]");
            assert_eq!(
                err.problem,
                SchemaProblem::MissingField {
                    field: "tracks".to_string()
                }
            );
        }
        other => panic!("expected schema error, got {other:?}"),
    }
}

#[test]
fn loader_rejects_unknown_feature_and_duplicate_ids() {
    let mut pattern = single_label_pattern("cadence.feature", "V");
    pattern["evidence"]["features"] = json!(["vibes"]);
    let err = PatternLibrary::from_json_str(&library_doc(json!([pattern])).to_string()).unwrap_err();
    match err {
        LibraryError::Schema(err) => {
            assert_eq!(err.path, "patterns[0].evidence.features[0]");
            assert!(matches!(err.problem, SchemaProblem::BadEnum { .. }));
        }
        other => panic!("expected schema error, got {other:?}"),
    }

    let twice = json!([
        single_label_pattern("cadence.same", "V"),
        single_label_pattern("cadence.same", "I")
    ]);
    let err = PatternLibrary::from_json_str(&library_doc(twice).to_string()).unwrap_err();
    assert!(matches!(&err, LibraryError::Schema(e) if e.path == "patterns[1].id"));

    assert!(matches!(
        PatternLibrary::from_json_str("{ not json"),
        Err(LibraryError::Json(_))
    ));
    assert!(matches!(
        PatternLibrary::load(std::path::Path::new("/nonexistent/patterns.json")),
        Err(LibraryError::Io { .. })
    ));
}

// ---------------------------------------------------------------------------
// Caching and concurrency
// ---------------------------------------------------------------------------

#[test]
fn cache_hits_on_repeat_analysis() {
    let engine = builtin_engine();
    let tokens = cadential_phrase();
    let in_scope = engine
        .library()
        .patterns()
        .iter()
        .filter(|p| p.def.applies_to_profile("classical"))
        .count();

    let mut cache = MatchCache::new();
    let first = engine.analyze(&tokens, "classical", None, Some(&mut cache));
    assert_eq!(cache.hits(), 0);
    assert_eq!(cache.len(), in_scope);

    let second = engine.analyze(&tokens, "classical", None, Some(&mut cache));
    assert_eq!(cache.hits() as usize, in_scope);
    assert_eq!(first.candidates, second.candidates);
    assert_eq!(first.selected, second.selected);

    // A different profile is a different key.
    engine.analyze(&tokens, "jazz", None, Some(&mut cache));
    assert_eq!(cache.hits() as usize, in_scope);
}

#[test]
fn concurrent_and_parallel_analysis_agree() {
    let engine = builtin_engine();
    let tokens = cadential_phrase();
    let expected = engine.analyze(&tokens, "classical", None, None);

    thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| engine.analyze(&tokens, "classical", None, None)))
            .collect();
        for handle in handles {
            let analysis = handle.join().unwrap();
            assert_eq!(analysis.candidates, expected.candidates);
            assert_eq!(analysis.raw_confidence, expected.raw_confidence);
        }
    });

    let mut config = AnalysisConfig::default();
    config.matcher.parallel = true;
    let parallel = Engine::new(Arc::clone(engine.library())).with_config(config);
    let analysis = parallel.analyze(&tokens, "classical", None, None);
    assert_eq!(analysis.candidates, expected.candidates);
    assert_eq!(analysis.selected, expected.selected);
}
