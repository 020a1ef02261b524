//! # Batch Matrix Generation
//!
//! A catalog lists every analysis of a study. Each entry is loaded, reshaped and
//! exported independently; a missing file or a failing analysis is counted and
//! the batch moves on to the next entry.
//!
//! ```toml
//! data_dir = "results/peb"
//! output_dir = "figures/matrices"
//! pp_threshold = 0.99
//!
//! [hook]
//! program = "render-heatmap"
//! args = ["{input}", "{output}"]
//! output_extension = "svg"
//!
//! [[analysis]]
//! code = "sc"
//! file = "PEB_change.toml"
//! name = "Session change"
//! peb_type = "change"
//! ```
//!
//! Entries default to `paper = true`; paper mode skips the others. Relative
//! directories resolve against the catalog file.

use crate::config::{ConfigError, PlotParameters};
use crate::data::PebType;
use crate::export::{ExportError, export_covariate_as};
use crate::hook::ExternalTool;
use crate::posterior::{ConnectivityError, ConnectivityResult, load_connectivity};
use crate::progress::{AnalysisOutcome, BatchProgressObserver};
use crate::transform::{CHANGE_TOWARD_ZERO, FIRST_GROUP_MEAN, SECOND_GROUP_MEAN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Covariates exported for change analyses and the file suffix each one gets.
const CHANGE_EXPORTS: [(&str, &str); 3] = [
    (FIRST_GROUP_MEAN, "pre"),
    (SECOND_GROUP_MEAN, "post"),
    (CHANGE_TOWARD_ZERO, "change"),
];

fn default_paper() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEntry {
    /// Short code used as the output file prefix.
    pub code: String,
    /// PEB file, relative to `data_dir`.
    pub file: PathBuf,
    pub name: String,
    pub peb_type: PebType,
    #[serde(default = "default_paper")]
    pub paper: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCatalog {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub pp_threshold: Option<f64>,
    #[serde(default)]
    pub hook: Option<ExternalTool>,
    #[serde(rename = "analysis", default)]
    pub analyses: Vec<AnalysisEntry>,
}

impl BatchCatalog {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let mut catalog: Self = toml::from_str(&text)?;
        if let Some(threshold) = catalog.pp_threshold {
            if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::InvalidThreshold(threshold));
            }
        }
        if let Some(hook) = &catalog.hook {
            if hook.timeout().is_err() {
                return Err(ConfigError::InvalidHookTimeout(hook.timeout_secs));
            }
        }
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        catalog.data_dir = base.join(&catalog.data_dir);
        catalog.output_dir = base.join(&catalog.output_dir);
        Ok(catalog)
    }

    /// `base` with the catalog's own settings applied on top.
    pub fn plot_parameters(&self, base: &PlotParameters) -> PlotParameters {
        let mut params = base.clone();
        if let Some(threshold) = self.pp_threshold {
            params.pp_threshold = threshold;
        }
        params
    }

    /// Entries processed in the requested mode, in catalog order.
    pub fn selected(&self, full: bool) -> Vec<&AnalysisEntry> {
        self.analyses
            .iter()
            .filter(|entry| full || entry.paper)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Matrices exported.
    pub generated: usize,
    /// Catalog entries whose file does not exist.
    pub missing: usize,
    /// Catalog entries that failed to load, reshape or export.
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub stats: BatchStats,
    /// Every file written, converted files included.
    pub generated_files: Vec<PathBuf>,
}

#[derive(Error, Debug)]
enum AnalysisError {
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Runs every selected catalog entry with `params` as given. Callers merge the
/// catalog's settings first through [`BatchCatalog::plot_parameters`].
pub fn run_batch(
    catalog: &BatchCatalog,
    full: bool,
    params: &PlotParameters,
    observer: &mut dyn BatchProgressObserver,
) -> BatchReport {
    let entries = catalog.selected(full);
    log::info!(
        "Processing {} of {} analyses ({} mode)",
        entries.len(),
        catalog.analyses.len(),
        if full { "full" } else { "paper" }
    );
    observer.on_batch_start(entries.len());

    let mut report = BatchReport::default();
    for entry in entries {
        observer.on_analysis_start(&entry.code, &entry.name);
        let path = catalog.data_dir.join(&entry.file);
        if !path.exists() {
            log::warn!("{}: file not found: {}", entry.code, path.display());
            report.stats.missing += 1;
            observer.on_analysis_finish(&entry.code, AnalysisOutcome::Missing);
            continue;
        }

        match process_analysis(entry, &path, &catalog.output_dir, params) {
            Ok((matrices, files)) => {
                report.stats.generated += matrices;
                for file in files {
                    if let Some(tool) = &catalog.hook {
                        match tool.run(&file) {
                            Ok(converted) if converted != file => {
                                report.generated_files.push(converted)
                            }
                            Ok(_) => {}
                            Err(err) => log::warn!("{}: external tool failed: {err}", entry.code),
                        }
                    }
                    report.generated_files.push(file);
                }
                observer.on_analysis_finish(&entry.code, AnalysisOutcome::Generated);
            }
            Err(err) => {
                log::error!("{}: {err}", entry.code);
                report.stats.errors += 1;
                observer.on_analysis_finish(&entry.code, AnalysisOutcome::Failed);
            }
        }
    }

    observer.on_batch_finish();
    report.generated_files.sort();
    log::info!(
        "Batch finished: {} generated, {} missing, {} errors",
        report.stats.generated,
        report.stats.missing,
        report.stats.errors
    );
    report
}

fn process_analysis(
    entry: &AnalysisEntry,
    path: &Path,
    output_dir: &Path,
    params: &PlotParameters,
) -> Result<(usize, Vec<PathBuf>), AnalysisError> {
    let result = load_connectivity(path, params, Some(entry.peb_type))?;
    let mut matrices = 0usize;
    let mut files = Vec::new();
    for (index, base) in export_plan(entry, &result) {
        files.extend(export_covariate_as(&result, index, output_dir, &base)?);
        matrices += 1;
    }
    Ok((matrices, files))
}

/// Which covariates of an analysis are exported, and under which file stem.
fn export_plan(entry: &AnalysisEntry, result: &ConnectivityResult) -> Vec<(usize, String)> {
    match entry.peb_type {
        PebType::Change => {
            for name in &result.covariate_names {
                if !CHANGE_EXPORTS.iter().any(|(wanted, _)| wanted == name) {
                    log::debug!("{}: skipping covariate '{name}'", entry.code);
                }
            }
            CHANGE_EXPORTS
                .iter()
                .filter_map(|(name, suffix)| {
                    result
                        .covariate_index(name)
                        .map(|idx| (idx, format!("{}_matrix_{suffix}", entry.code)))
                })
                .collect()
        }
        PebType::BehavAssociations | PebType::GroupMean => {
            // The association of interest follows the group mean when both exist.
            let index = if result.covariate_n() > 1 { 1 } else { 0 };
            vec![(index, format!("{}_matrix", entry.code))]
        }
    }
}
