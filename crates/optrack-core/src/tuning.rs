//! Similarity weights and decision thresholds.
//!
//! Loaded from an optional YAML profile; every field falls back to the
//! documented default when omitted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Weights of the four similarity facets in the combined score.
///
/// Defaults: content 0.5, context 0.2, speaker pattern 0.15, keyword 0.15.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    pub content: f32,
    pub context: f32,
    pub speaker_pattern: f32,
    pub keyword: f32,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            content: 0.5,
            context: 0.2,
            speaker_pattern: 0.15,
            keyword: 0.15,
        }
    }
}

impl SimilarityWeights {
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.content + self.context + self.speaker_pattern + self.keyword
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub weights: SimilarityWeights,
    /// Combined score at which two candidates are the same opinion.
    pub merge_threshold: f32,
    /// Half-width of the band around `merge_threshold` sent to the oracle.
    pub borderline_margin: f32,
    /// Minimum combined score for two candidates to be related at all.
    pub related_threshold: f32,
    /// Average-linkage cut. `None` means `merge_threshold - borderline_margin`.
    pub cluster_threshold: Option<f32>,
    /// Upper bound on evolution paths enumerated per partition.
    pub max_chain_paths: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            weights: SimilarityWeights::default(),
            merge_threshold: 0.70,
            borderline_margin: 0.10,
            related_threshold: 0.35,
            cluster_threshold: None,
            max_chain_paths: 1000,
        }
    }
}

impl Tuning {
    #[must_use]
    pub fn effective_cluster_threshold(&self) -> f32 {
        self.cluster_threshold
            .unwrap_or(self.merge_threshold - self.borderline_margin)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        for (name, value) in [
            ("content", w.content),
            ("context", w.context),
            ("speaker_pattern", w.speaker_pattern),
            ("keyword", w.keyword),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "weight '{name}' must be a non-negative number, got {value}"
                )));
            }
        }
        if (w.sum() - 1.0).abs() > 1e-3 {
            return Err(ConfigError::Validation(format!(
                "similarity weights must sum to 1.0, got {}",
                w.sum()
            )));
        }
        for (name, value) in [
            ("merge_threshold", self.merge_threshold),
            ("related_threshold", self.related_threshold),
            ("cluster_threshold", self.effective_cluster_threshold()),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if !(0.0..0.5).contains(&self.borderline_margin) {
            return Err(ConfigError::Validation(format!(
                "borderline_margin must be within [0, 0.5), got {}",
                self.borderline_margin
            )));
        }
        if self.related_threshold > self.merge_threshold {
            return Err(ConfigError::Validation(
                "related_threshold must not exceed merge_threshold".to_string(),
            ));
        }
        if self.max_chain_paths == 0 {
            return Err(ConfigError::Validation(
                "max_chain_paths must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a tuning profile from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_tuning(path: &Path) -> Result<Tuning, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::TuningFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_tuning(&content)
}

fn parse_tuning(content: &str) -> Result<Tuning, ConfigError> {
    let tuning: Tuning = serde_yaml::from_str(content)?;
    tuning.validate()?;
    Ok(tuning)
}
