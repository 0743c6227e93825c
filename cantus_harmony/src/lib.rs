// Cantus harmonic analysis
//
// Classifies sequences of roman-numeral harmony tokens against a declarative
// library of structural patterns (cadences, sequences, bass schemata,
// chromatic idioms), fuses the resulting evidence into per-track and combined
// confidence, and calibrates that confidence against labelled outcomes.
// Tokens are produced elsewhere; this crate never looks at pitches or audio.
//
// Architecture:
// - token.rs: Token, Role and Span, the input model
// - labels.rs: Roman-numeral label parsing and normalisation, quality tags
// - substitution.rs: Style profiles and accepted-label expansion
// - pattern.rs: serde model of one library entry
// - schema.rs: Path-reporting structural validation of library JSON
// - library.rs: Loading, cross-field validation and compilation of patterns
// - events.rs: Low-level events of a window (six-fours, pedals, fifths runs)
// - constraints.rs: Named global constraint checkers
// - descriptors.rs: Named structural predicates for descriptor patterns
// - matcher.rs: Window alignment of every pattern against a token sequence
// - scoring.rs: Score of a successful window (base + bonuses − penalties)
// - cache.rs: Caller-owned memoisation of per-pattern match results
// - features.rs: Named feature extractors attached to evidence
// - evidence.rs / evaluator.rs: Evidence and the evaluator plugin registry
// - aggregate.rs: Conflict resolution (max-pool, soft-NMS) and track fusion
// - metrics.rs: ECE, Brier, Pearson, reliability curves
// - calibration.rs: Quality-gated identity/logistic/isotonic calibration
// - config.rs: AnalysisConfig, every tunable threshold in one place
// - engine.rs: The end-to-end `analyze` pipeline
//
// Non-overlapping selection of candidates is delegated to `cantus_cover`.
//
// Everything is deterministic: identical tokens, library and config give
// identical results, with or without the rayon pool.

pub mod aggregate;
pub mod cache;
pub mod calibration;
pub mod config;
pub mod constraints;
pub mod descriptors;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod evidence;
pub mod features;
pub mod labels;
pub mod library;
pub mod matcher;
pub mod metrics;
pub mod pattern;
pub mod schema;
pub mod scoring;
pub mod substitution;
pub mod token;

pub use aggregate::{AggregateResult, AggregatorConfig, ConflictStrategy, aggregate};
pub use cache::MatchCache;
pub use calibration::{CalibrationMapping, CalibrationMethod, CalibrationSample, QualityGates, fit};
pub use config::AnalysisConfig;
pub use engine::{Analysis, Engine};
pub use evaluator::{Evaluator, EvaluatorRegistry};
pub use evidence::Evidence;
pub use library::{LibraryError, PatternLibrary};
pub use matcher::{MatchFailure, MatchResult};
pub use token::{Role, Span, Token};
