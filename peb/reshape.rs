//! # Posterior Reshaping
//!
//! Converts the flat, covariate-blocked posterior vectors of a PEB result into a
//! `(region, region, covariate)` tensor. Entry `[i, j, c]` is the connection
//! FROM region `j` TO region `i` under covariate `c`.
//!
//! Two serialization conventions exist and are mutually exclusive:
//!
//! - Dense: every one of the `N * N` connections was estimated. Each covariate
//!   block is an `N x N` matrix flattened in column-major order, so element `k`
//!   of a block lands at `row = k % N`, `col = k / N`.
//! - Constrained: only `P < N * N` connections were estimated and `Pnames`
//!   records where each one belongs. Positions that are not named stay zero.
//!
//! A constrained result without `Pnames` can only be placed by guessing. That
//! guess is kept as [`MatrixLayout::SequentialFallback`] so callers can tell it
//! apart from a trustworthy mapping.

use crate::pnames::parse_parameter_names;
use ndarray::{Array3, s};
use thiserror::Error;

/// How the flat parameter vector was mapped onto the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixLayout {
    /// All `N * N` connections, column-major per covariate.
    Dense,
    /// A subset of connections placed through `Pnames`.
    Constrained,
    /// A subset of connections placed row-major without names. Best effort only.
    SequentialFallback,
}

impl MatrixLayout {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Constrained => "constrained",
            Self::SequentialFallback => "sequential fallback",
        }
    }
}

/// Borrowed view of the posterior fields needed for reshaping.
#[derive(Debug, Clone, Copy)]
pub struct FlatPosterior<'a> {
    pub ep: &'a [f64],
    pub pp: &'a [f64],
    pub pnames: Option<&'a [String]>,
    /// Column count of the second-level design matrix, when it was stored.
    pub design_columns: Option<usize>,
}

/// Reshaped posterior expectations and probabilities.
#[derive(Debug, Clone)]
pub struct PosteriorTensors {
    pub ep: Array3<f64>,
    pub pp: Array3<f64>,
    pub layout: MatrixLayout,
    pub params_per_covariate: usize,
}

impl PosteriorTensors {
    pub fn roi_n(&self) -> usize {
        self.ep.shape()[0]
    }

    pub fn covariate_n(&self) -> usize {
        self.ep.shape()[2]
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ReshapeError {
    #[error("Ep has {ep} entries but Pp has {pp}; the two must be parallel.")]
    LengthMismatch { ep: usize, pp: usize },
    #[error("The posterior contains no parameters.")]
    EmptyPosterior,
    #[error("Cannot build a connectivity matrix over zero regions.")]
    NoRegions,
    #[error(
        "Ep has {len} entries, which does not divide evenly into {covariates} covariates; the parameterization is ambiguous."
    )]
    UnevenCovariates { len: usize, covariates: usize },
    #[error(
        "{per_covariate} parameters per covariate exceed the {full} possible connections between the regions."
    )]
    TooManyParameters { per_covariate: usize, full: usize },
    #[error(
        "Ep has {len} entries, which is not a whole number of covariate blocks of the {names} named parameters."
    )]
    ParameterNamesMismatch { len: usize, names: usize },
    #[error(
        "Constrained model ({per_covariate}/{full} connections per covariate) has no Pnames and the sequential fallback is disabled."
    )]
    MissingParameterNames { per_covariate: usize, full: usize },
}

/// Infers how many covariates the flat vector holds.
///
/// The design matrix is authoritative. Without it, a `Pnames` list shorter than
/// `N * N` marks a constrained model and fixes the parameters per covariate;
/// otherwise a length that is a multiple of `N * N` is read as a dense model, and a
/// single covariate is assumed last.
pub fn infer_covariate_count(
    ep_len: usize,
    roi_n: usize,
    pnames_len: Option<usize>,
    design_columns: Option<usize>,
) -> Result<usize, ReshapeError> {
    if let Some(columns) = design_columns.filter(|&c| c > 0) {
        return Ok(columns);
    }
    let full = roi_n * roi_n;
    if let Some(names) = pnames_len.filter(|&p| p > 0 && p < full) {
        if ep_len % names != 0 {
            return Err(ReshapeError::ParameterNamesMismatch { len: ep_len, names });
        }
        return Ok(ep_len / names);
    }
    if full > 0 && ep_len >= full && ep_len % full == 0 {
        return Ok(ep_len / full);
    }
    Ok(1)
}

/// Reshapes `Ep` and `Pp` into `(roi_n, roi_n, covariates)` tensors.
pub fn reshape_posterior(
    flat: &FlatPosterior<'_>,
    roi_n: usize,
    allow_sequential_fallback: bool,
) -> Result<PosteriorTensors, ReshapeError> {
    if flat.ep.len() != flat.pp.len() {
        return Err(ReshapeError::LengthMismatch {
            ep: flat.ep.len(),
            pp: flat.pp.len(),
        });
    }
    if flat.ep.is_empty() {
        return Err(ReshapeError::EmptyPosterior);
    }
    if roi_n == 0 {
        return Err(ReshapeError::NoRegions);
    }

    let cov_n = infer_covariate_count(
        flat.ep.len(),
        roi_n,
        flat.pnames.map(<[String]>::len),
        flat.design_columns,
    )?;
    if flat.ep.len() % cov_n != 0 {
        return Err(ReshapeError::UnevenCovariates {
            len: flat.ep.len(),
            covariates: cov_n,
        });
    }

    let full = roi_n * roi_n;
    let param_n = flat.ep.len() / cov_n;
    log::debug!(
        "Ep length={}, roi_n={}, cov_n={}, params per covariate={} (full={})",
        flat.ep.len(),
        roi_n,
        cov_n,
        param_n,
        full
    );

    if param_n > full {
        return Err(ReshapeError::TooManyParameters {
            per_covariate: param_n,
            full,
        });
    }

    if param_n == full {
        log::debug!("Detected fully connected model");
        return Ok(reshape_dense(flat, roi_n, cov_n));
    }

    log::info!("Detected constrained connectivity model ({param_n}/{full} connections)");
    match flat.pnames {
        Some(names) if !names.is_empty() => Ok(reshape_with_names(flat, names, roi_n, cov_n)),
        _ if allow_sequential_fallback => {
            log::warn!(
                "No parameter names found; filling {param_n} parameters per covariate row-major. \
                 Connection placement is a guess and may be wrong."
            );
            Ok(reshape_sequential(flat, roi_n, cov_n))
        }
        _ => Err(ReshapeError::MissingParameterNames {
            per_covariate: param_n,
            full,
        }),
    }
}

fn reshape_dense(flat: &FlatPosterior<'_>, roi_n: usize, cov_n: usize) -> PosteriorTensors {
    let param_n = roi_n * roi_n;
    let mut ep = Array3::zeros((roi_n, roi_n, cov_n));
    let mut pp = Array3::zeros((roi_n, roi_n, cov_n));

    for cov in 0..cov_n {
        let block = cov * param_n;
        for k in 0..param_n {
            let (row, col) = (k % roi_n, k / roi_n);
            ep[[row, col, cov]] = flat.ep[block + k];
            pp[[row, col, cov]] = flat.pp[block + k];
        }
    }

    PosteriorTensors {
        ep,
        pp,
        layout: MatrixLayout::Dense,
        params_per_covariate: param_n,
    }
}

fn reshape_with_names(
    flat: &FlatPosterior<'_>,
    names: &[String],
    roi_n: usize,
    cov_n: usize,
) -> PosteriorTensors {
    let param_n = flat.ep.len() / cov_n;
    if names.len() < param_n {
        log::warn!(
            "Only {} parameter names for {} parameters per covariate; the remainder stay unplaced",
            names.len(),
            param_n
        );
    }

    let parsed = parse_parameter_names(&names[..names.len().min(param_n)]);
    let mut ep = Array3::zeros((roi_n, roi_n, cov_n));
    let mut pp = Array3::zeros((roi_n, roi_n, cov_n));

    let mut out_of_range = Vec::new();
    for (k, param) in parsed.iter().enumerate() {
        let Some((row, col)) = param.position() else {
            continue;
        };
        if row >= roi_n || col >= roi_n {
            out_of_range.push(names[k].as_str());
            continue;
        }
        for cov in 0..cov_n {
            let idx = cov * param_n + k;
            ep[[row, col, cov]] = flat.ep[idx];
            pp[[row, col, cov]] = flat.pp[idx];
        }
    }
    if !out_of_range.is_empty() {
        log::warn!(
            "Skipped {} parameter(s) outside the {roi_n}x{roi_n} region grid: {:?}",
            out_of_range.len(),
            out_of_range
        );
    }

    PosteriorTensors {
        ep,
        pp,
        layout: MatrixLayout::Constrained,
        params_per_covariate: param_n,
    }
}

fn reshape_sequential(flat: &FlatPosterior<'_>, roi_n: usize, cov_n: usize) -> PosteriorTensors {
    let param_n = flat.ep.len() / cov_n;
    let mut ep = Array3::zeros((roi_n, roi_n, cov_n));
    let mut pp = Array3::zeros((roi_n, roi_n, cov_n));

    for cov in 0..cov_n {
        let block = cov * param_n;
        for k in 0..param_n {
            let (row, col) = (k / roi_n, k % roi_n);
            ep[[row, col, cov]] = flat.ep[block + k];
            pp[[row, col, cov]] = flat.pp[block + k];
        }
    }

    PosteriorTensors {
        ep,
        pp,
        layout: MatrixLayout::SequentialFallback,
        params_per_covariate: param_n,
    }
}

/// Flattens a tensor back into the dense serialization, covariate by covariate,
/// column-major within each covariate.
pub fn flatten_dense(tensor: &Array3<f64>) -> Vec<f64> {
    let cov_n = tensor.shape()[2];
    let mut out = Vec::with_capacity(tensor.len());
    for cov in 0..cov_n {
        out.extend(tensor.slice(s![.., .., cov]).t().iter().copied());
    }
    out
}
