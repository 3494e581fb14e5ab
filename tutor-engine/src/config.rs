//! Engine configuration types.
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only
//! needs to name the values it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Top-level configuration for a learner session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Telemetry batching and flush timing.
    pub telemetry: TelemetryConfig,
    /// Engagement heatmap throttling.
    pub heatmap: HeatmapConfig,
    /// Difficulty hysteresis and topic heuristics.
    pub adaptive: AdaptiveRules,
    /// Question candidate limits.
    pub selection: SelectionConfig,
    /// Struggle signal thresholds.
    pub struggle: StruggleConfig,
}

impl EngineConfig {
    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.telemetry.batch_size == 0 {
            return Err(EngineError::Config(
                "telemetry.batch_size must be at least 1".into(),
            ));
        }
        if self.telemetry.flush_interval_ms == 0 {
            return Err(EngineError::Config(
                "telemetry.flush_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Render as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

/// Telemetry collector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Queue length that forces an immediate flush.
    pub batch_size: usize,
    /// Period of the background flush timer in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval_ms: 5000,
        }
    }
}

/// Engagement aggregator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Minimum spacing between applied heatmap updates in milliseconds.
    pub throttle_ms: u64,
    /// Number of recent dropout positions kept on the module rollup.
    pub dropout_points_kept: usize,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 5000,
            dropout_points_kept: 10,
        }
    }
}

/// Adaptive difficulty rules. Persisted with every quiz session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveRules {
    pub correct_streak_to_advance: u32,
    pub incorrect_streak_to_regress: u32,
    /// Carried for compatibility; selection and transitions do not read it.
    pub min_questions_per_level: u32,
    pub max_retries: u32,
    /// Running score below which the session regresses.
    pub struggling_threshold: f64,
    /// Running score required (with the streak) to advance.
    pub mastery_threshold: f64,
    /// Incorrect answers slower than this mark the topic as a struggle.
    pub struggle_time_seconds: f64,
    /// Correct answers faster than this mark the topic as mastered.
    pub mastery_time_seconds: f64,
}

impl Default for AdaptiveRules {
    fn default() -> Self {
        Self {
            correct_streak_to_advance: 3,
            incorrect_streak_to_regress: 2,
            min_questions_per_level: 5,
            max_retries: 3,
            struggling_threshold: 0.6,
            mastery_threshold: 0.85,
            struggle_time_seconds: 30.0,
            mastery_time_seconds: 15.0,
        }
    }
}

/// Candidate pool limits for question selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub candidate_limit: usize,
    pub fallback_limit: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 10,
            fallback_limit: 5,
        }
    }
}

/// Thresholds for the five struggle signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StruggleConfig {
    /// Attempt number at which a quiz failure triggers.
    pub quiz_failure_attempts: u32,
    /// Attempt number at which a quiz failure is high severity.
    pub quiz_failure_high_attempts: u32,
    /// Pauses closer together than this form a burst.
    pub pause_window_seconds: f64,
    pub pause_threshold: u32,
    pub coach_activation_threshold: u32,
    /// Forward skips longer than this trigger.
    pub skip_min_seconds: f64,
    /// Forward skips longer than this are high severity.
    pub skip_high_seconds: f64,
    pub help_request_threshold: u32,
}

impl Default for StruggleConfig {
    fn default() -> Self {
        Self {
            quiz_failure_attempts: 2,
            quiz_failure_high_attempts: 3,
            pause_window_seconds: 30.0,
            pause_threshold: 3,
            coach_activation_threshold: 2,
            skip_min_seconds: 30.0,
            skip_high_seconds: 120.0,
            help_request_threshold: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_default_values() {
        let config = EngineConfig::default();

        assert_eq!(config.telemetry.batch_size, 10);
        assert_eq!(config.telemetry.flush_interval_ms, 5000);
        assert_eq!(config.heatmap.throttle_ms, 5000);
        assert_eq!(config.heatmap.dropout_points_kept, 10);
        assert_eq!(config.adaptive.correct_streak_to_advance, 3);
        assert_eq!(config.adaptive.incorrect_streak_to_regress, 2);
        assert_eq!(config.adaptive.min_questions_per_level, 5);
        assert_eq!(config.adaptive.max_retries, 3);
        assert_eq!(config.adaptive.struggling_threshold, 0.6);
        assert_eq!(config.adaptive.mastery_threshold, 0.85);
        assert_eq!(config.selection.candidate_limit, 10);
        assert_eq!(config.selection.fallback_limit, 5);
        assert_eq!(config.struggle.pause_threshold, 3);
        assert_eq!(config.struggle.skip_high_seconds, 120.0);
        assert_eq!(config.struggle.help_request_threshold, 3);
    }

    #[test]
    fn engine_config_serialization_roundtrip() {
        let config = EngineConfig::default();
        let toml_str = config.to_toml_string().expect("serialize to toml");
        let parsed = EngineConfig::from_toml_str(&toml_str).expect("parse from toml");
        assert_eq!(config, parsed);
    }

    #[test]
    fn engine_config_partial_deserialize() {
        let toml_str = r#"
            [telemetry]
            batch_size = 25
            [adaptive]
            mastery_threshold = 0.9
        "#;

        let config = EngineConfig::from_toml_str(toml_str).expect("parse partial config");

        assert_eq!(config.telemetry.batch_size, 25);
        assert_eq!(config.adaptive.mastery_threshold, 0.9);

        // Untouched values keep their defaults
        assert_eq!(config.telemetry.flush_interval_ms, 5000);
        assert_eq!(config.adaptive.correct_streak_to_advance, 3);
        assert_eq!(config.struggle.pause_window_seconds, 30.0);
    }

    #[test]
    fn engine_config_rejects_bad_types() {
        let err = EngineConfig::from_toml_str("[telemetry]\nbatch_size = \"ten\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn engine_config_rejects_zero_flush_interval() {
        let err = EngineConfig::from_toml_str("[telemetry]\nflush_interval_ms = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("flush_interval_ms")));

        let err = EngineConfig::from_toml_str("[telemetry]\nbatch_size = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("batch_size")));
    }

    #[test]
    fn engine_config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tutor.toml");
        std::fs::write(&path, "[heatmap]\nthrottle_ms = 1000\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.heatmap.throttle_ms, 1000);
    }

    #[test]
    fn engine_config_missing_file_is_io_error() {
        let err = EngineConfig::load("/nonexistent/tutor.toml").unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
