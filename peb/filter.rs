//! Selection of connections from one `[target, source]` matrix by region name,
//! direction and strength.

use itertools::iproduct;
use ndarray::{Array2, ArrayView2, Zip};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    /// Connections leaving the selected sources toward the selected targets.
    #[default]
    Outgoing,
    /// Connections arriving at the selected targets from the selected sources.
    Incoming,
    /// Every connection touching a selected source or target, either direction.
    Bidirectional,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
            Self::Bidirectional => "bidirectional",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown connection type '{0}'; expected outgoing, incoming or bidirectional")]
pub struct UnknownConnectionType(pub String);

impl FromStr for ConnectionType {
    type Err = UnknownConnectionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outgoing" => Ok(Self::Outgoing),
            "incoming" => Ok(Self::Incoming),
            "bidirectional" => Ok(Self::Bidirectional),
            other => Err(UnknownConnectionType(other.to_string())),
        }
    }
}

/// Region substrings select regions; an empty list selects every region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionFilter {
    pub source_regions: Vec<String>,
    pub target_regions: Vec<String>,
    pub connection_type: ConnectionType,
    /// Connections with `|w|` below this value are dropped.
    pub strength_threshold: f64,
}

fn matching_indices(roi_names: &[String], patterns: &[String]) -> Vec<usize> {
    roi_names
        .iter()
        .enumerate()
        .filter(|(_, name)| patterns.is_empty() || patterns.iter().any(|p| name.contains(p.as_str())))
        .map(|(idx, _)| idx)
        .collect()
}

impl ConnectionFilter {
    /// Returns a filtered copy of `matrix`. Self-connections are always removed.
    pub fn apply(&self, matrix: ArrayView2<'_, f64>, roi_names: &[String]) -> Array2<f64> {
        let roi_n = roi_names.len();
        let sources = matching_indices(roi_names, &self.source_regions);
        let targets = matching_indices(roi_names, &self.target_regions);

        let mut keep = Array2::from_elem((roi_n, roi_n), false);
        match self.connection_type {
            ConnectionType::Outgoing | ConnectionType::Incoming => {
                for (&src, &tgt) in iproduct!(&sources, &targets) {
                    keep[[tgt, src]] = true;
                }
            }
            ConnectionType::Bidirectional => {
                for (&selected, other) in iproduct!(sources.iter().chain(&targets), 0..roi_n) {
                    keep[[other, selected]] = true;
                    keep[[selected, other]] = true;
                }
            }
        }
        keep.diag_mut().fill(false);

        let mut filtered = matrix.to_owned();
        Zip::from(&mut filtered).and(&keep).for_each(|w, &kept| {
            if !kept || w.abs() < self.strength_threshold {
                *w = 0.0;
            }
        });

        log::info!(
            "Filtered to {} {} connection(s) ({} source, {} target region(s))",
            filtered.iter().filter(|&&w| w != 0.0).count(),
            self.connection_type,
            sources.len(),
            targets.len()
        );
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn full() -> Array2<f64> {
        array![[1.0, 0.2, 0.3], [0.4, 1.0, 0.6], [0.7, 0.8, 1.0]]
    }

    #[test]
    fn default_filter_only_drops_self_connections() {
        let rois = names(&["lHIP", "rHIP", "PCC"]);
        let out = ConnectionFilter::default().apply(full().view(), &rois);
        assert_eq!(out.diag().iter().filter(|&&v| v != 0.0).count(), 0);
        assert_eq!(out[[1, 0]], 0.4);
        assert_eq!(out[[0, 2]], 0.3);
    }

    #[test]
    fn outgoing_keeps_selected_source_columns() {
        let rois = names(&["lHIP", "rHIP", "PCC"]);
        let filter = ConnectionFilter {
            source_regions: vec!["PCC".to_string()],
            ..ConnectionFilter::default()
        };
        let out = filter.apply(full().view(), &rois);
        assert_eq!(out, array![[0.0, 0.0, 0.3], [0.0, 0.0, 0.6], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn incoming_matches_outgoing_selection() {
        let rois = names(&["lHIP", "rHIP", "PCC"]);
        let outgoing = ConnectionFilter {
            source_regions: vec!["HIP".to_string()],
            target_regions: vec!["PCC".to_string()],
            ..ConnectionFilter::default()
        };
        let incoming = ConnectionFilter {
            connection_type: ConnectionType::Incoming,
            ..outgoing.clone()
        };
        let a = outgoing.apply(full().view(), &rois);
        let b = incoming.apply(full().view(), &rois);
        assert_eq!(a, b);
        assert_eq!(a, array![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.7, 0.8, 0.0]]);
    }

    #[test]
    fn bidirectional_keeps_rows_and_columns_of_selection() {
        let rois = names(&["lHIP", "rHIP", "PCC"]);
        let filter = ConnectionFilter {
            source_regions: vec!["lHIP".to_string()],
            target_regions: vec!["lHIP".to_string()],
            connection_type: ConnectionType::Bidirectional,
            ..ConnectionFilter::default()
        };
        let out = filter.apply(full().view(), &rois);
        assert_eq!(out, array![[0.0, 0.2, 0.3], [0.4, 0.0, 0.0], [0.7, 0.0, 0.0]]);
    }

    #[test]
    fn strength_threshold_uses_absolute_value() {
        let rois = names(&["a", "b"]);
        let matrix = array![[0.0, -0.5], [0.1, 0.0]];
        let filter = ConnectionFilter {
            strength_threshold: 0.3,
            ..ConnectionFilter::default()
        };
        let out = filter.apply(matrix.view(), &rois);
        assert_eq!(out, array![[0.0, -0.5], [0.0, 0.0]]);
    }

    #[test]
    fn connection_type_parses_case_insensitively() {
        assert_eq!("Incoming".parse::<ConnectionType>(), Ok(ConnectionType::Incoming));
        assert!("sideways".parse::<ConnectionType>().is_err());
    }
}
