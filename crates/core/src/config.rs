use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MatchConfidence;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the whole reconciliation engine. Every section defaults, so a
/// partial TOML file only overrides what it names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchingConfig,
    pub duplicates: DuplicateConfig,
    pub decode: DecodeConfig,
    pub approvals: ApprovalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub high_threshold: f64,
    pub medium_threshold: f64,
    /// Candidates scoring below this are dropped entirely.
    pub min_similarity: f64,
    /// A top candidate closer than this to the runner-up is never auto-assigned.
    pub close_delta: f64,
    /// Additional channel prefixes stripped from narrations, on top of the built-in set.
    pub extra_channel_prefixes: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.90,
            medium_threshold: 0.70,
            min_similarity: 0.60,
            close_delta: 0.05,
            extra_channel_prefixes: Vec::new(),
        }
    }
}

impl MatchingConfig {
    /// Buckets a similarity score, `None` when it falls below the floor.
    pub fn tier(&self, score: f64) -> Option<MatchConfidence> {
        if score >= self.high_threshold {
            Some(MatchConfidence::High)
        } else if score >= self.medium_threshold {
            Some(MatchConfidence::Medium)
        } else if score >= self.min_similarity {
            Some(MatchConfidence::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub date_tolerance_days: u32,
    pub narration_threshold: f64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            date_tolerance_days: 1,
            narration_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub timeout_secs: u64,
    pub max_file_bytes: usize,
    pub max_pages: usize,
    pub max_tokens: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_file_bytes: 20 * 1024 * 1024,
            max_pages: 200,
            max_tokens: 200_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// When false, the submitter may also approve.
    pub maker_checker: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { maker_checker: true }
    }
}

impl EngineConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.matching;
        let ordered = 0.0 <= m.min_similarity
            && m.min_similarity <= m.medium_threshold
            && m.medium_threshold <= m.high_threshold
            && m.high_threshold <= 1.0;
        if !ordered {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy 0 <= min_similarity ({}) <= medium ({}) <= high ({}) <= 1",
                m.min_similarity, m.medium_threshold, m.high_threshold
            )));
        }
        if !(0.0..1.0).contains(&m.close_delta) {
            return Err(ConfigError::Invalid(format!(
                "close_delta must be in [0, 1), got {}",
                m.close_delta
            )));
        }
        if !(0.0..=1.0).contains(&self.duplicates.narration_threshold) {
            return Err(ConfigError::Invalid(format!(
                "duplicates.narration_threshold must be in [0, 1], got {}",
                self.duplicates.narration_threshold
            )));
        }
        if self.decode.timeout_secs == 0 || self.decode.max_pages == 0 {
            return Err(ConfigError::Invalid(
                "decode.timeout_secs and decode.max_pages must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
[matching]
close_delta = 0.1

[approvals]
maker_checker = false
"#,
        )
        .unwrap();
        assert_eq!(config.matching.close_delta, 0.1);
        assert_eq!(config.matching.high_threshold, 0.90);
        assert_eq!(config.duplicates.date_tolerance_days, 1);
        assert!(!config.approvals.maker_checker);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let err = EngineConfig::from_toml("[matching]\nmedium_threshold = 0.95\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn tier_buckets() {
        let m = MatchingConfig::default();
        assert_eq!(m.tier(0.95), Some(MatchConfidence::High));
        assert_eq!(m.tier(0.90), Some(MatchConfidence::High));
        assert_eq!(m.tier(0.75), Some(MatchConfidence::Medium));
        assert_eq!(m.tier(0.61), Some(MatchConfidence::Low));
        assert_eq!(m.tier(0.59), None);
    }
}
