// Data-driven analysis configuration.
//
// Every tunable threshold of the pipeline lives in `AnalysisConfig`, grouped
// per stage: `matcher` (score floor, bass-motion thresholds, parallelism),
// `aggregation` (conflict strategy and fusion weights, see `aggregate.rs`),
// `cover` (whether the optimal cover runs before aggregation) and
// `calibration` (quality gates, see `calibration.rs`). Stages read their
// numbers from here rather than from literals.
//
// All structs use `#[serde(default)]` so a config file only needs the keys it
// changes; an empty object is the default configuration.

use crate::aggregate::AggregatorConfig;
use crate::calibration::QualityGates;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Floor for a matched window's score.
    pub min_score: f64,
    /// Largest bass step (semitones) still counted as smooth.
    pub smooth_bass_max_semitones: u8,
    /// Bass motions larger than this are penalised as leaps.
    pub leap_threshold_semitones: u8,
    /// Match patterns on the rayon pool.
    pub parallel: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            min_score: 0.05,
            smooth_bass_max_semitones: 2,
            leap_threshold_semitones: 5,
            parallel: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverConfig {
    /// Select a non-overlapping maximum-score subset before aggregation.
    pub enabled: bool,
}

impl Default for CoverConfig {
    fn default() -> Self {
        CoverConfig { enabled: true }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Style profile used when the caller does not name one.
    pub profile: String,
    pub matcher: MatcherConfig,
    pub aggregation: AggregatorConfig,
    pub cover: CoverConfig,
    pub calibration: QualityGates,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            profile: "classical".to_string(),
            matcher: MatcherConfig::default(),
            aggregation: AggregatorConfig::default(),
            cover: CoverConfig::default(),
            calibration: QualityGates::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        tracing::info!(path = %path.display(), profile = %config.profile, "loaded analysis config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ConflictStrategy;

    #[test]
    fn default_config_serializes() {
        let config = AnalysisConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored: AnalysisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AnalysisConfig::from_json_str(
            r#"{
                "profile": "jazz",
                "matcher": { "parallel": true },
                "aggregation": { "strategy": { "kind": "max_pool" } },
                "cover": { "enabled": false },
                "calibration": { "min_samples": 20 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.profile, "jazz");
        assert!(config.matcher.parallel);
        assert_eq!(config.matcher.min_score, 0.05);
        assert_eq!(config.aggregation.strategy, ConflictStrategy::MaxPool);
        assert_eq!(config.aggregation.max_weight, 0.7);
        assert!(!config.cover.enabled);
        assert_eq!(config.calibration.min_samples, 20);
        assert_eq!(config.calibration.max_ece_increase, 0.02);
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(AnalysisConfig::from_json_str("{}").unwrap(), AnalysisConfig::default());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = AnalysisConfig::load("/nonexistent/cantus-config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("cantus-config.json"));
    }
}
