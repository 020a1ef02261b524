//! Post-reshape transforms: probability thresholding, reversal of the
//! self-connection log parameterization, and the derived "change toward 0"
//! covariates of session-change analyses.
//!
//! DCM stores each self-connection `x` as `f(x) = log(-2x)`. The inverse
//! `g(y) = -exp(y) / 2` is applied to diagonal entries only.

use crate::data::PebType;
use ndarray::{Array1, Array2, Array3, Zip, s};

/// Name of the baseline covariate of a session-change design.
pub const FIRST_GROUP_MEAN: &str = "mean of group 1";
/// Name given to the derived post-change connectivity (baseline + change).
pub const SECOND_GROUP_MEAN: &str = "mean of second group";
/// Name given to the derived signed change covariate.
pub const CHANGE_TOWARD_ZERO: &str = "Change toward 0";

/// Zeroes every expectation whose posterior probability is below `threshold`.
///
/// NaN probabilities count as below threshold. Returns how many non-zero entries
/// were cleared.
pub fn apply_threshold(ep: &mut Array3<f64>, pp: &Array3<f64>, threshold: f64) -> usize {
    let mut cleared = 0usize;
    Zip::from(ep).and(pp).for_each(|e, &p| {
        if !(p >= threshold) && *e != 0.0 {
            *e = 0.0;
            cleared += 1;
        }
    });
    cleared
}

fn inverse_log_transform(y: f64) -> f64 {
    -y.exp() / 2.0
}

/// Applies `g(y) = -exp(y) / 2` to the self-connections of the covariates that
/// `peb_type` parameterizes on the log scale. Returns whether anything changed.
///
/// For a two-covariate `change` design the change covariate is rewritten so that
/// baseline plus change equals the reverted post-change value:
/// `exp(d0)/2 - exp(d0 + d1)/2`. Both diagonals come from the same snapshot taken
/// before either is rewritten.
pub fn revert_diagonal(ep: &mut Array3<f64>, peb_type: PebType) -> bool {
    let cov_n = ep.shape()[2];
    match peb_type {
        PebType::Change if cov_n == 2 => {
            let baseline: Array1<f64> = ep.slice(s![.., .., 0]).diag().to_owned();
            let delta: Array1<f64> = ep.slice(s![.., .., 1]).diag().to_owned();

            let reverted_baseline = baseline.mapv(inverse_log_transform);
            let reverted_delta = Zip::from(&baseline)
                .and(&delta)
                .map_collect(|&d0, &d1| d0.exp() / 2.0 - (d0 + d1).exp() / 2.0);

            ep.slice_mut(s![.., .., 0])
                .diag_mut()
                .assign(&reverted_baseline);
            ep.slice_mut(s![.., .., 1]).diag_mut().assign(&reverted_delta);
            true
        }
        PebType::Change => {
            log::warn!(
                "Change-type result has {cov_n} covariates instead of 2; self-connections left on the log scale"
            );
            false
        }
        PebType::GroupMean | PebType::BehavAssociations if cov_n >= 1 => {
            ep.slice_mut(s![.., .., 0])
                .diag_mut()
                .mapv_inplace(inverse_log_transform);
            true
        }
        PebType::GroupMean | PebType::BehavAssociations => false,
    }
}

/// Per-connection summaries of a session change, used to color and annotate the
/// change matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeAnalysis {
    /// `|final| - |baseline|`: positive moves away from zero, negative toward it.
    pub magnitude_change: Array2<f64>,
    /// Baseline and final state have opposite signs (excitatory and inhibitory swap).
    pub sign_change_mask: Array2<bool>,
}

/// Appends the post-change state and the signed change to a two-covariate
/// `[baseline, change]` tensor, giving `[baseline, change, final, final - baseline]`.
///
/// Returns `None` when the tensor does not have exactly two covariates.
pub fn derive_change_covariates(ep: &Array3<f64>) -> Option<(Array3<f64>, ChangeAnalysis)> {
    let shape = ep.shape();
    if shape[2] != 2 {
        return None;
    }
    let (rows, cols) = (shape[0], shape[1]);

    let baseline = ep.slice(s![.., .., 0]);
    let delta = ep.slice(s![.., .., 1]);
    let final_state: Array2<f64> = &baseline + &delta;
    let change: Array2<f64> = &final_state - &baseline;

    let magnitude_change = final_state.mapv(f64::abs) - baseline.mapv(f64::abs);
    let sign_change_mask = Zip::from(&baseline)
        .and(&final_state)
        .map_collect(|&before, &after| before * after < 0.0);

    let mut expanded = Array3::zeros((rows, cols, 4));
    expanded.slice_mut(s![.., .., 0..2]).assign(ep);
    expanded.slice_mut(s![.., .., 2]).assign(&final_state);
    expanded.slice_mut(s![.., .., 3]).assign(&change);

    Some((
        expanded,
        ChangeAnalysis {
            magnitude_change,
            sign_change_mask,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn stack(covariates: &[Array2<f64>]) -> Array3<f64> {
        let (rows, cols) = covariates[0].dim();
        let mut out = Array3::zeros((rows, cols, covariates.len()));
        for (i, cov) in covariates.iter().enumerate() {
            out.slice_mut(s![.., .., i]).assign(cov);
        }
        out
    }

    #[test]
    fn threshold_zeroes_low_probability_entries() {
        let mut ep = stack(&[array![[1.0, 2.0], [3.0, 4.0]]]);
        let pp = stack(&[array![[0.999, 0.5], [0.99, f64::NAN]]]);
        let cleared = apply_threshold(&mut ep, &pp, 0.99);
        assert_eq!(cleared, 2);
        assert_eq!(ep.slice(s![.., .., 0]), array![[1.0, 0.0], [3.0, 0.0]]);
    }

    #[test]
    fn threshold_is_idempotent_and_monotonic() {
        let original = stack(&[array![[1.0, -2.0, 0.5], [3.0, 4.0, -0.1], [0.2, 0.3, 0.4]]]);
        let pp = stack(&[array![[0.95, 0.99, 0.999], [0.5, 0.97, 1.0], [0.991, 0.0, 0.98]]]);

        let mut low = original.clone();
        apply_threshold(&mut low, &pp, 0.95);
        let mut again = low.clone();
        assert_eq!(apply_threshold(&mut again, &pp, 0.95), 0);
        assert_eq!(again, low);

        let mut high = original.clone();
        apply_threshold(&mut high, &pp, 0.99);
        Zip::from(&low).and(&high).for_each(|&l, &h| {
            if l == 0.0 {
                assert_eq!(h, 0.0);
            }
        });
        assert!(high.iter().filter(|&&v| v != 0.0).count() < low.iter().filter(|&&v| v != 0.0).count());
    }

    #[test]
    fn change_diagonal_from_zero_snapshot() {
        let mut ep = stack(&[Array2::zeros((2, 2)), Array2::zeros((2, 2))]);
        assert!(revert_diagonal(&mut ep, PebType::Change));
        for i in 0..2 {
            assert_abs_diff_eq!(ep[[i, i, 0]], -0.5);
            assert_abs_diff_eq!(ep[[i, i, 1]], 0.0);
        }
    }

    #[test]
    fn change_diagonal_uses_pre_transform_values() {
        let d0 = 0.3_f64;
        let d1 = -0.2_f64;
        let mut ep = stack(&[array![[d0, 0.7], [0.1, 0.0]], array![[d1, -0.4], [0.0, 0.0]]]);
        revert_diagonal(&mut ep, PebType::Change);

        assert_abs_diff_eq!(ep[[0, 0, 0]], -d0.exp() / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            ep[[0, 0, 1]],
            d0.exp() / 2.0 - (d0 + d1).exp() / 2.0,
            epsilon = 1e-12
        );
        // Baseline plus change gives the reverted post-change self-connection.
        assert_abs_diff_eq!(
            ep[[0, 0, 0]] + ep[[0, 0, 1]],
            -(d0 + d1).exp() / 2.0,
            epsilon = 1e-12
        );
        assert_eq!(ep[[0, 1, 0]], 0.7);
        assert_eq!(ep[[0, 1, 1]], -0.4);
        assert_eq!(ep[[1, 0, 0]], 0.1);
    }

    #[test]
    fn single_covariate_types_revert_first_covariate_diagonal() {
        for peb_type in [PebType::GroupMean, PebType::BehavAssociations] {
            let mut ep = stack(&[array![[0.0, 0.25], [0.5, 1.0]]]);
            assert!(revert_diagonal(&mut ep, peb_type));
            assert_abs_diff_eq!(ep[[0, 0, 0]], -0.5);
            assert_abs_diff_eq!(ep[[1, 1, 0]], -(1.0_f64).exp() / 2.0);
            assert_eq!(ep[[0, 1, 0]], 0.25);
            assert_eq!(ep[[1, 0, 0]], 0.5);
        }
    }

    #[test]
    fn change_with_wrong_covariate_count_is_left_alone() {
        let mut ep = stack(&[array![[0.3]]]);
        assert!(!revert_diagonal(&mut ep, PebType::Change));
        assert_eq!(ep[[0, 0, 0]], 0.3);
    }

    #[test]
    fn derived_covariates_are_exact() {
        let ep = stack(&[
            array![[-0.5, 0.31], [0.12, -0.5]],
            array![[0.1, -0.45], [0.07, 0.0]],
        ]);
        let (expanded, _) = derive_change_covariates(&ep).unwrap();
        assert_eq!(expanded.shape(), &[2, 2, 4]);
        for i in 0..2 {
            for j in 0..2 {
                assert_eq!(expanded[[i, j, 2]], expanded[[i, j, 0]] + expanded[[i, j, 1]]);
                assert_eq!(expanded[[i, j, 3]], expanded[[i, j, 2]] - expanded[[i, j, 0]]);
            }
        }
    }

    #[test]
    fn sign_change_mask_and_magnitude() {
        let ep = stack(&[array![[1.0, 1.0]], array![[-2.0, 1.0]]]);
        let (_, analysis) = derive_change_covariates(&ep).unwrap();
        // final = [-1.0, 2.0]
        assert!(analysis.sign_change_mask[[0, 0]]);
        assert!(!analysis.sign_change_mask[[0, 1]]);
        assert_eq!(analysis.magnitude_change[[0, 0]], 0.0);
        assert_eq!(analysis.magnitude_change[[0, 1]], 1.0);
    }

    #[test]
    fn derivation_requires_two_covariates() {
        let ep = stack(&[array![[1.0]]]);
        assert!(derive_change_covariates(&ep).is_none());
    }
}
