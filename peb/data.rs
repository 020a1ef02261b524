//! # PEB File Loading and Validation
//!
//! Every analysis is stored as one TOML document exported from the estimation
//! workspace. The layout mirrors the variables of that workspace:
//!
//! ```toml
//! PEB_type = "change"
//! ROI_names = ["lDLPFC", "rDLPFC", "lHIP"]
//! GCM = ["sub-01/DCM_rest.toml", "sub-02/DCM_rest.toml"]
//!
//! [BMA] # posterior of the model variable
//! Ep = [0.1, 0.0, -0.2]
//! Pp = [0.99, 0.4, 1.0]
//! Pnames = ["A(1,1)", "A(2,1)", "A(3,1)"]
//! Xnames = ["mean of group 1", "group difference"]
//!
//! [BMA.M] # second-level design
//! X = [[1.0, -1.0], [1.0, 1.0]] # one row per subject
//! ```
//!
//! - Required: the configured model variable, `BMA` and `GCM`. Any of them
//!   missing aborts the load with an error naming the field.
//! - `ROI_names` may be absent; the names are then read from the first DCM listed
//!   in `GCM` (`DCM.xY.name`). Relative paths resolve against the PEB file.
//! - An unrecognized `PEB_type` loads as untyped, which disables every
//!   type-specific transform.

use crate::reshape::FlatPosterior;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// The kind of second-level design a PEB result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PebType {
    /// Baseline group mean plus a session change (two covariates).
    #[serde(rename = "change")]
    Change,
    /// Association with a behavioral score.
    #[serde(rename = "behav_associations")]
    BehavAssociations,
    /// A single group mean.
    #[serde(rename = "groupmean")]
    GroupMean,
}

impl PebType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::BehavAssociations => "behav_associations",
            Self::GroupMean => "groupmean",
        }
    }
}

impl fmt::Display for PebType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown PEB type '{0}'; expected change, behav_associations or groupmean")]
pub struct UnknownPebType(pub String);

impl FromStr for PebType {
    type Err = UnknownPebType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "change" => Ok(Self::Change),
            "behav_associations" => Ok(Self::BehavAssociations),
            "groupmean" => Ok(Self::GroupMean),
            other => Err(UnknownPebType(other.to_string())),
        }
    }
}

/// The second-level design stored alongside the posterior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecondLevelDesign {
    /// Design matrix, one row per subject and one column per covariate.
    #[serde(rename = "X", default)]
    pub x: Option<Vec<Vec<f64>>>,
}

/// Posterior fields of the model variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorModel {
    #[serde(rename = "Ep")]
    pub ep: Vec<f64>,
    #[serde(rename = "Pp")]
    pub pp: Vec<f64>,
    #[serde(rename = "Pnames", default)]
    pub pnames: Option<Vec<String>>,
    #[serde(rename = "Xnames", default)]
    pub xnames: Option<Vec<String>>,
    #[serde(rename = "M", default)]
    pub design: Option<SecondLevelDesign>,
}

impl PosteriorModel {
    /// Number of covariates according to the design matrix, if one was stored.
    pub fn design_columns(&self) -> Option<usize> {
        self.design
            .as_ref()
            .and_then(|m| m.x.as_ref())
            .and_then(|rows| rows.first())
            .map(Vec::len)
            .filter(|&n| n > 0)
    }

    pub fn flat(&self) -> FlatPosterior<'_> {
        FlatPosterior {
            ep: &self.ep,
            pp: &self.pp,
            pnames: self.pnames.as_deref(),
            design_columns: self.design_columns(),
        }
    }
}

/// A validated PEB result, ready for reshaping.
#[derive(Debug, Clone)]
pub struct PebResult {
    pub source: PathBuf,
    pub model: PosteriorModel,
    /// Canonical region order for both matrix axes.
    pub roi_names: Vec<String>,
    pub peb_type: Option<PebType>,
    /// Per-subject DCM files that entered the group model.
    pub gcm: Vec<String>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse PEB file as TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Required field '{0}' was not found in the PEB file.")]
    MissingField(String),
    #[error("Field '{field}' has an unexpected shape: {source}")]
    InvalidField {
        field: String,
        source: toml::de::Error,
    },
    #[error("ROI_names not found in the PEB file and could not be extracted from GCM: {0}")]
    RoiNamesUnavailable(String),
}

/// Reads a `PEB_type` value; anything other than a known string tag is unknown.
fn peb_type_from_value(value: &toml::Value) -> Result<PebType, UnknownPebType> {
    match value.as_str() {
        Some(tag) => tag.parse(),
        None => Err(UnknownPebType(value.to_string())),
    }
}

/// Loads a PEB result, reading the posterior from `model_variable`.
pub fn load_peb_result(path: &Path, model_variable: &str) -> Result<PebResult, DataError> {
    let text = fs::read_to_string(path)?;
    let table: toml::Table = text.parse()?;

    let model_value = table
        .get(model_variable)
        .ok_or_else(|| DataError::MissingField(model_variable.to_string()))?;
    for required in ["BMA", "GCM"] {
        if !table.contains_key(required) {
            return Err(DataError::MissingField(required.to_string()));
        }
    }

    let model: PosteriorModel = typed_field(model_value, model_variable)?;
    let gcm: Vec<String> = typed_field(&table["GCM"], "GCM")?;

    let roi_names = match table.get("ROI_names") {
        Some(value) => typed_field::<Vec<String>>(value, "ROI_names")?,
        None => {
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            roi_names_from_gcm(&gcm, base_dir)?
        }
    };
    if roi_names.is_empty() {
        return Err(DataError::RoiNamesUnavailable(
            "ROI_names is empty".to_string(),
        ));
    }

    let peb_type = match table.get("PEB_type").map(peb_type_from_value) {
        Some(Ok(peb_type)) => Some(peb_type),
        Some(Err(err)) => {
            log::warn!("{err}; no type-specific transforms will be applied");
            None
        }
        None => None,
    };

    log::info!(
        "Loaded {} ({} regions, {} parameters, PEB type: {})",
        path.display(),
        roi_names.len(),
        model.ep.len(),
        peb_type.map_or("none", PebType::as_str)
    );

    Ok(PebResult {
        source: path.to_path_buf(),
        model,
        roi_names,
        peb_type,
        gcm,
    })
}

fn typed_field<T: for<'de> Deserialize<'de>>(
    value: &toml::Value,
    field: &str,
) -> Result<T, DataError> {
    value
        .clone()
        .try_into()
        .map_err(|source| DataError::InvalidField {
            field: field.to_string(),
            source,
        })
}

/// Reads region names from the first DCM in the group list (`DCM.xY.name`).
pub fn roi_names_from_gcm(gcm: &[String], base_dir: &Path) -> Result<Vec<String>, DataError> {
    let first = gcm
        .first()
        .ok_or_else(|| DataError::RoiNamesUnavailable("GCM lists no DCM files".to_string()))?;

    let dcm_path = {
        let candidate = PathBuf::from(first);
        if candidate.is_absolute() {
            candidate
        } else {
            base_dir.join(candidate)
        }
    };

    let text = fs::read_to_string(&dcm_path).map_err(|err| {
        log::warn!("Could not load DCM file {}: {err}", dcm_path.display());
        DataError::RoiNamesUnavailable(format!("cannot read {}: {err}", dcm_path.display()))
    })?;
    let table: toml::Table = text.parse().map_err(|err| {
        DataError::RoiNamesUnavailable(format!("cannot parse {}: {err}", dcm_path.display()))
    })?;

    let names = table
        .get("DCM")
        .and_then(|dcm| dcm.get("xY"))
        .and_then(|xy| xy.get("name"))
        .and_then(toml::Value::as_array)
        .ok_or_else(|| {
            DataError::RoiNamesUnavailable(format!(
                "DCM.xY.name not found in {}",
                dcm_path.display()
            ))
        })?;

    Ok(names
        .iter()
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .collect())
}
