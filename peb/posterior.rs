//! # Connectivity Results
//!
//! Runs the full chain from a loaded PEB result to display-ready connectivity:
//! reshape, threshold, self-connection reversal, derived change covariates and
//! optional region reordering. The order matters: thresholding sees the raw
//! posterior, and the derived covariates see the reverted diagonal.

use crate::config::{ConfigError, PlotParameters};
use crate::data::{DataError, PebResult, PebType, load_peb_result};
use crate::reshape::{MatrixLayout, PosteriorTensors, ReshapeError, reshape_posterior};
use crate::transform::{
    CHANGE_TOWARD_ZERO, ChangeAnalysis, SECOND_GROUP_MEAN, apply_threshold,
    derive_change_covariates, revert_diagonal,
};
use ndarray::{Array2, Array3, ArrayView2, Axis, s};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectivityError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Reshape(#[from] ReshapeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Connectivity matrices of one analysis, `[target, source, covariate]`.
#[derive(Debug, Clone)]
pub struct ConnectivityResult {
    pub ep: Array3<f64>,
    /// One name per covariate, in third-axis order.
    pub covariate_names: Vec<String>,
    /// Labels of both matrix axes, after any reordering.
    pub roi_names: Vec<String>,
    pub layout: MatrixLayout,
    pub peb_type: Option<PebType>,
    /// Present only for two-covariate change analyses.
    pub change: Option<ChangeAnalysis>,
}

/// Loads a PEB file and produces its connectivity matrices.
///
/// `peb_type_override` takes precedence over the `PEB_type` stored in the file.
pub fn load_connectivity(
    path: &Path,
    params: &PlotParameters,
    peb_type_override: Option<PebType>,
) -> Result<ConnectivityResult, ConnectivityError> {
    params.validate()?;
    let result = load_peb_result(path, &params.model)?;
    reshape_connectivity(&result, params, peb_type_override)
}

/// Produces connectivity matrices from an already loaded PEB result.
pub fn reshape_connectivity(
    result: &PebResult,
    params: &PlotParameters,
    peb_type_override: Option<PebType>,
) -> Result<ConnectivityResult, ConnectivityError> {
    let roi_n = result.roi_names.len();
    let peb_type = peb_type_override.or(result.peb_type);

    let PosteriorTensors {
        mut ep, pp, layout, ..
    } = reshape_posterior(
        &result.model.flat(),
        roi_n,
        params.allow_sequential_fallback,
    )?;

    let cleared = apply_threshold(&mut ep, &pp, params.pp_threshold);
    log::debug!(
        "Cleared {cleared} connection(s) below Pp threshold {}",
        params.pp_threshold
    );

    if params.revert_diag {
        match peb_type {
            Some(peb_type) => {
                revert_diagonal(&mut ep, peb_type);
            }
            None => log::debug!("No PEB type; self-connections left on the log scale"),
        }
    }

    let mut covariate_names = resolve_covariate_names(result.model.xnames.as_deref(), ep.shape()[2]);
    let mut change = None;
    if peb_type == Some(PebType::Change) {
        match derive_change_covariates(&ep) {
            Some((expanded, analysis)) => {
                ep = expanded;
                covariate_names.push(SECOND_GROUP_MEAN.to_string());
                covariate_names.push(CHANGE_TOWARD_ZERO.to_string());
                change = Some(analysis);
            }
            None => log::warn!(
                "Change analysis has {} covariates; derived covariates need exactly 2",
                ep.shape()[2]
            ),
        }
    }

    let mut roi_names = result.roi_names.clone();
    if let Some(order) = params.resolved_reorder(roi_n)? {
        ep = ep.select(Axis(0), &order).select(Axis(1), &order);
        roi_names = order.iter().map(|&idx| roi_names[idx].clone()).collect();
        change = change.map(|analysis| ChangeAnalysis {
            magnitude_change: analysis
                .magnitude_change
                .select(Axis(0), &order)
                .select(Axis(1), &order),
            sign_change_mask: analysis
                .sign_change_mask
                .select(Axis(0), &order)
                .select(Axis(1), &order),
        });
    }

    log::info!(
        "Reshaped {} into {} covariate(s) over {} regions ({} layout)",
        result.source.display(),
        covariate_names.len(),
        roi_n,
        layout.describe()
    );

    Ok(ConnectivityResult {
        ep,
        covariate_names,
        roi_names,
        layout,
        peb_type,
        change,
    })
}

fn resolve_covariate_names(xnames: Option<&[String]>, cov_n: usize) -> Vec<String> {
    let names = xnames.unwrap_or(&[]);
    if !names.is_empty() && names.len() != cov_n {
        log::warn!(
            "Xnames lists {} covariates but the posterior holds {cov_n}",
            names.len()
        );
    }
    (0..cov_n)
        .map(|idx| match names.get(idx) {
            Some(name) => name.clone(),
            None => format!("covariate {}", idx + 1),
        })
        .collect()
}

impl ConnectivityResult {
    pub fn covariate_n(&self) -> usize {
        self.ep.shape()[2]
    }

    pub fn roi_n(&self) -> usize {
        self.ep.shape()[0]
    }

    /// The `[target, source]` matrix of covariate `index`. An out-of-range index
    /// falls back to the first covariate.
    pub fn covariate(&self, index: usize) -> ArrayView2<'_, f64> {
        let index = if index < self.covariate_n() {
            index
        } else {
            log::warn!(
                "Covariate index {index} out of range (0..{}); using covariate 0",
                self.covariate_n()
            );
            0
        };
        self.ep.slice(s![.., .., index])
    }

    pub fn covariate_index(&self, name: &str) -> Option<usize> {
        self.covariate_names.iter().position(|n| n == name)
    }

    pub fn covariate_by_name(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        self.covariate_index(name)
            .map(|idx| self.ep.slice(s![.., .., idx]))
    }

    /// Connections that are non-zero in at least one covariate.
    pub fn estimated_mask(&self) -> Array2<bool> {
        self.ep
            .map_axis(Axis(2), |lane| lane.iter().any(|&v| v != 0.0))
    }

    /// Covariate `index` as `[source, target]`, the orientation heatmap renderers
    /// expect (rows are senders). This is the only place the convention flips.
    pub fn heatmap_orientation(&self, index: usize) -> ArrayView2<'_, f64> {
        self.covariate(index).reversed_axes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PosteriorModel;
    use approx::assert_abs_diff_eq;
    use std::path::PathBuf;

    fn peb_result(
        ep: Vec<f64>,
        pp: Vec<f64>,
        xnames: Option<Vec<&str>>,
        roi_names: &[&str],
        peb_type: Option<PebType>,
    ) -> PebResult {
        PebResult {
            source: PathBuf::from("memory.toml"),
            model: PosteriorModel {
                ep,
                pp,
                pnames: None,
                xnames: xnames.map(|names| names.into_iter().map(String::from).collect()),
                design: None,
            },
            roi_names: roi_names.iter().map(|s| s.to_string()).collect(),
            peb_type,
            gcm: Vec::new(),
        }
    }

    #[test]
    fn change_analysis_gains_derived_covariates() {
        // Column-major 2x2 blocks: baseline then change.
        let ep = vec![0.0, 0.3, 0.2, 0.0, 0.0, -0.1, 0.05, 0.0];
        let pp = vec![1.0; 8];
        let result = peb_result(
            ep,
            pp,
            Some(vec!["mean of group 1", "session"]),
            &["lHIP", "rHIP"],
            Some(PebType::Change),
        );

        let conn = reshape_connectivity(&result, &PlotParameters::default(), None).unwrap();
        assert_eq!(conn.covariate_n(), 4);
        assert_eq!(
            conn.covariate_names,
            vec![
                "mean of group 1",
                "session",
                "mean of second group",
                "Change toward 0"
            ]
        );
        assert_abs_diff_eq!(conn.ep[[0, 0, 0]], -0.5);
        assert_abs_diff_eq!(conn.ep[[0, 0, 1]], 0.0);
        assert_abs_diff_eq!(conn.ep[[1, 0, 2]], 0.3 - 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(conn.ep[[0, 1, 3]], 0.05, epsilon = 1e-12);

        let change = conn.change.as_ref().unwrap();
        assert!(!change.sign_change_mask[[1, 0]]);
    }

    #[test]
    fn threshold_runs_before_reversal() {
        let ep = vec![1.2, 0.4, 0.6, -0.3];
        let pp = vec![0.2, 0.999, 0.5, 1.0];
        let result = peb_result(ep, pp, None, &["a", "b"], Some(PebType::GroupMean));

        let conn = reshape_connectivity(&result, &PlotParameters::default(), None).unwrap();
        // The thresholded diagonal is zero on the log scale, so it reverts to -1/2.
        assert_abs_diff_eq!(conn.ep[[0, 0, 0]], -0.5);
        assert_abs_diff_eq!(conn.ep[[1, 0, 0]], 0.4);
        assert_eq!(conn.ep[[0, 1, 0]], 0.0);
        assert_abs_diff_eq!(conn.ep[[1, 1, 0]], -(-0.3_f64).exp() / 2.0, epsilon = 1e-12);
        assert_eq!(conn.covariate_names, vec!["covariate 1"]);
    }

    #[test]
    fn revert_can_be_disabled() {
        let result = peb_result(
            vec![0.3, 0.0, 0.0, 0.3],
            vec![1.0; 4],
            None,
            &["a", "b"],
            Some(PebType::GroupMean),
        );
        let params = PlotParameters {
            revert_diag: false,
            ..PlotParameters::default()
        };
        let conn = reshape_connectivity(&result, &params, None).unwrap();
        assert_eq!(conn.ep[[0, 0, 0]], 0.3);
    }

    #[test]
    fn override_replaces_stored_type() {
        let result = peb_result(vec![0.0], vec![1.0], None, &["a"], None);
        let untyped = reshape_connectivity(&result, &PlotParameters::default(), None).unwrap();
        assert_eq!(untyped.ep[[0, 0, 0]], 0.0);

        let typed = reshape_connectivity(
            &result,
            &PlotParameters::default(),
            Some(PebType::BehavAssociations),
        )
        .unwrap();
        assert_abs_diff_eq!(typed.ep[[0, 0, 0]], -0.5);
        assert_eq!(typed.peb_type, Some(PebType::BehavAssociations));
    }

    #[test]
    fn reorder_permutes_both_axes_and_names() {
        let ep: Vec<f64> = (1..=9).map(f64::from).collect();
        let result = peb_result(ep, vec![1.0; 9], None, &["a", "b", "c"], None);
        let params = PlotParameters {
            roi_reorder: Some(vec![3, 1, 2]),
            ..PlotParameters::default()
        };

        let plain = reshape_connectivity(&result, &PlotParameters::default(), None).unwrap();
        let conn = reshape_connectivity(&result, &params, None).unwrap();
        assert_eq!(conn.roi_names, vec!["c", "a", "b"]);
        let order = [2usize, 0, 1];
        for (i, &oi) in order.iter().enumerate() {
            for (j, &oj) in order.iter().enumerate() {
                assert_eq!(conn.ep[[i, j, 0]], plain.ep[[oi, oj, 0]]);
            }
        }
    }

    #[test]
    fn covariate_lookup_falls_back_to_first() {
        let ep: Vec<f64> = (1..=8).map(f64::from).collect();
        let result = peb_result(ep, vec![1.0; 8], Some(vec!["mean", "age"]), &["a", "b"], None);
        let conn = reshape_connectivity(&result, &PlotParameters::default(), None).unwrap();

        assert_eq!(conn.covariate(7), conn.covariate(0));
        assert_eq!(conn.covariate_by_name("age").unwrap(), conn.covariate(1));
        assert!(conn.covariate_by_name("missing").is_none());
    }

    #[test]
    fn heatmap_orientation_is_transposed() {
        let ep = vec![1.0, 2.0, 3.0, 4.0];
        let result = peb_result(ep, vec![1.0; 4], None, &["a", "b"], None);
        let conn = reshape_connectivity(&result, &PlotParameters::default(), None).unwrap();

        // [target, source]: 2.0 is the connection from a to b.
        assert_eq!(conn.covariate(0)[[1, 0]], 2.0);
        assert_eq!(conn.heatmap_orientation(0)[[0, 1]], 2.0);
    }

    #[test]
    fn estimated_mask_unions_covariates() {
        let names = vec!["A(1,2)".to_string(), "A(2,1)".to_string()];
        let mut result = peb_result(
            vec![0.5, 0.0, 0.0, -0.2],
            vec![1.0; 4],
            None,
            &["a", "b", "c"],
            None,
        );
        result.model.pnames = Some(names);

        let conn = reshape_connectivity(&result, &PlotParameters::default(), None).unwrap();
        assert_eq!(conn.layout, MatrixLayout::Constrained);
        let mask = conn.estimated_mask();
        assert!(mask[[0, 1]]);
        assert!(mask[[1, 0]]);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 2);
    }

    #[test]
    fn invalid_reorder_is_reported() {
        let result = peb_result(vec![1.0; 4], vec![1.0; 4], None, &["a", "b"], None);
        let params = PlotParameters {
            roi_reorder: Some(vec![1, 2, 3]),
            ..PlotParameters::default()
        };
        assert!(matches!(
            reshape_connectivity(&result, &params, None),
            Err(ConnectivityError::Config(ConfigError::ReorderLengthMismatch { .. }))
        ));
    }
}
