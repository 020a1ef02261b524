//! Copies generated outputs into the grouped directory layout of a manuscript.
//!
//! ```toml
//! source_root = "figures"
//! destination_root = "manuscript"
//!
//! [groups.main]
//! "fig2_change.svg" = "matrices/sc_matrix_change.svg"
//! ```

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureMapping {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    /// Group directory name to `destination file name = source path` entries.
    #[serde(default)]
    pub groups: BTreeMap<String, BTreeMap<String, PathBuf>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrganizeStats {
    pub copied: usize,
    pub missing: usize,
    pub errors: usize,
}

impl FigureMapping {
    /// Loads a mapping; relative roots resolve against the mapping file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let mut mapping: Self = toml::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        mapping.source_root = base.join(&mapping.source_root);
        mapping.destination_root = base.join(&mapping.destination_root);
        Ok(mapping)
    }

    /// Copies every mapped file. Missing sources and failed copies are counted and
    /// skipped.
    pub fn organize(&self) -> OrganizeStats {
        let mut stats = OrganizeStats::default();
        for (group, files) in &self.groups {
            let group_dir = self.destination_root.join(group);
            if let Err(err) = fs::create_dir_all(&group_dir) {
                log::error!("Cannot create {}: {err}", group_dir.display());
                stats.errors += files.len();
                continue;
            }

            for (dest_name, relative) in files {
                let source = self.source_root.join(relative);
                if !source.exists() {
                    log::warn!("{group}/{dest_name}: source not found: {}", source.display());
                    stats.missing += 1;
                    continue;
                }
                match fs::copy(&source, group_dir.join(dest_name)) {
                    Ok(_) => stats.copied += 1,
                    Err(err) => {
                        log::error!("{group}/{dest_name}: copy failed: {err}");
                        stats.errors += 1;
                    }
                }
            }
        }
        log::info!(
            "Organized figures: {} copied, {} missing, {} errors",
            stats.copied,
            stats.missing,
            stats.errors
        );
        stats
    }
}
