//! # Region Coordinates
//!
//! Connectome renderers place each region at an MNI coordinate. Where those
//! coordinates come from is outside this crate; [`CoordinateLookup`] is the seam,
//! and [`AtlasTable`] is the table-backed implementation read from a TSV with the
//! columns `label`, `x`, `y`, `z`.
//!
//! Region names in PEB files rarely match atlas labels exactly, so a lookup tries
//! an exact match first and then case-insensitive containment in either
//! direction. Regions that still match nothing are placed at the origin.

use ndarray::Array2;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Atlas table is missing required column '{0}'")]
    ColumnNotFound(String),
    #[error("Atlas column '{0}' contains missing or non-numeric values")]
    InvalidColumn(String),
    #[error("Atlas table contains no regions")]
    Empty,
}

/// Maps region names to MNI coordinates.
pub trait CoordinateLookup {
    /// The coordinate of one region, if it can be matched.
    fn lookup(&self, roi_name: &str) -> Option<[f64; 3]>;

    /// Coordinates for every region as an `(N, 3)` array. Unmatched regions sit at
    /// the origin and are reported together in one warning.
    fn coordinates(&self, roi_names: &[String]) -> Array2<f64> {
        let mut coords = Array2::zeros((roi_names.len(), 3));
        let mut missing = Vec::new();
        for (row, name) in roi_names.iter().enumerate() {
            match self.lookup(name) {
                Some(xyz) => {
                    for (axis, value) in xyz.into_iter().enumerate() {
                        coords[[row, axis]] = value;
                    }
                }
                None => missing.push(name.as_str()),
            }
        }
        if !missing.is_empty() {
            log::warn!(
                "No coordinates found for {} region(s), placed at the origin: {:?}",
                missing.len(),
                missing
            );
        }
        coords
    }
}

#[derive(Debug, Clone, Default)]
pub struct AtlasTable {
    entries: Vec<(String, [f64; 3])>,
}

impl AtlasTable {
    pub fn from_entries(entries: Vec<(String, [f64; 3])>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads a tab-separated atlas table.
    pub fn load(path: &Path) -> Result<Self, AtlasError> {
        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
            )
            .finish()?;

        let columns: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        for required in ["label", "x", "y", "z"] {
            if !columns.iter().any(|c| c == required) {
                return Err(AtlasError::ColumnNotFound(required.to_string()));
            }
        }

        let labels_column = df.column("label")?.cast(&DataType::String)?;
        let labels: Vec<String> = labels_column
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|label| label.map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| AtlasError::InvalidColumn("label".to_string()))?;

        let x = numeric_column(&df, "x")?;
        let y = numeric_column(&df, "y")?;
        let z = numeric_column(&df, "z")?;

        let entries: Vec<(String, [f64; 3])> = labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| (label, [x[i], y[i], z[i]]))
            .collect();
        if entries.is_empty() {
            return Err(AtlasError::Empty);
        }

        log::info!("Loaded {} atlas regions from {}", entries.len(), path.display());
        Ok(Self { entries })
    }
}

fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, AtlasError> {
    let casted = df
        .column(name)?
        .cast(&DataType::Float64)
        .map_err(|err| {
            log::debug!("Casting atlas column '{name}' failed: {err}");
            AtlasError::InvalidColumn(name.to_string())
        })?;
    if casted.null_count() > 0 {
        return Err(AtlasError::InvalidColumn(name.to_string()));
    }
    let chunked = casted.f64()?.rechunk();
    Ok(chunked.into_no_null_iter().collect())
}

impl CoordinateLookup for AtlasTable {
    fn lookup(&self, roi_name: &str) -> Option<[f64; 3]> {
        if let Some((_, xyz)) = self.entries.iter().find(|(label, _)| label == roi_name) {
            return Some(*xyz);
        }

        let wanted = roi_name.to_lowercase();
        let (label, xyz) = self.entries.iter().find(|(label, _)| {
            let label = label.to_lowercase();
            label.contains(&wanted) || wanted.contains(&label)
        })?;
        log::debug!("Matched '{roi_name}' to atlas region '{label}'");
        Some(*xyz)
    }
}
