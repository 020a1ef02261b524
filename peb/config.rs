//! # Processing Parameters
//!
//! The knobs that control how a PEB result is turned into connectivity matrices.
//! Defaults mirror the values the figure pipeline has always used, so a missing
//! parameter file is equivalent to an empty one.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the model variable read from a PEB file when none is configured.
pub const DEFAULT_MODEL_VARIABLE: &str = "BMA";

/// Posterior probability below which a parameter is treated as absent.
pub const DEFAULT_PP_THRESHOLD: f64 = 0.99;

/// Errors raised while reading or validating processing parameters.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read parameter file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML parameter file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Posterior probability threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("Hook timeout must be a finite number of seconds >= 0, got {0}")]
    InvalidHookTimeout(f64),
    #[error("ROI reorder must list {expected} region indices, got {found}")]
    ReorderLengthMismatch { found: usize, expected: usize },
    #[error("ROI reorder is not a permutation of the {0} regions: {1:?}")]
    ReorderNotPermutation(usize, Vec<usize>),
}

/// Parameters for reshaping and post-processing one PEB result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotParameters {
    /// Top-level variable holding the posterior (usually the Bayesian model average).
    pub model: String,
    /// Entries whose posterior probability is below this value are zeroed.
    pub pp_threshold: f64,
    /// Optional region permutation, 1-based when every index is at least 1.
    pub roi_reorder: Option<Vec<usize>>,
    /// Undo DCM's log parameterization of self-connections.
    pub revert_diag: bool,
    /// Permit the row-major fill for constrained models that carry no `Pnames`.
    pub allow_sequential_fallback: bool,
}

impl Default for PlotParameters {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_VARIABLE.to_string(),
            pp_threshold: DEFAULT_PP_THRESHOLD,
            roi_reorder: None,
            revert_diag: true,
            allow_sequential_fallback: true,
        }
    }
}

impl PlotParameters {
    /// Loads parameters from a TOML file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let params: Self = toml::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.pp_threshold.is_finite() || !(0.0..=1.0).contains(&self.pp_threshold) {
            return Err(ConfigError::InvalidThreshold(self.pp_threshold));
        }
        Ok(())
    }

    /// Resolves `roi_reorder` into 0-based indices for `roi_n` regions.
    ///
    /// A list whose every entry is at least 1 is read as 1-based. The result must be
    /// a permutation so that no region is dropped or duplicated on either axis.
    pub fn resolved_reorder(&self, roi_n: usize) -> Result<Option<Vec<usize>>, ConfigError> {
        let Some(order) = &self.roi_reorder else {
            return Ok(None);
        };
        if order.len() != roi_n {
            return Err(ConfigError::ReorderLengthMismatch {
                found: order.len(),
                expected: roi_n,
            });
        }

        let zero_based: Vec<usize> = if order.iter().all(|&idx| idx >= 1) {
            order.iter().map(|&idx| idx - 1).collect()
        } else {
            order.clone()
        };

        let mut seen = vec![false; roi_n];
        for &idx in &zero_based {
            if idx >= roi_n || seen[idx] {
                return Err(ConfigError::ReorderNotPermutation(roi_n, order.clone()));
            }
            seen[idx] = true;
        }
        Ok(Some(zero_based))
    }
}
