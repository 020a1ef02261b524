//! # Table Export
//!
//! Writes connectivity matrices as tab-separated tables for external renderers.
//!
//! - Heatmap tables are in display orientation: one row per source region, one
//!   column per target region. Zero cells are left empty so renderers draw them
//!   transparent.
//! - Edge tables list every non-zero off-diagonal connection with the coordinates
//!   of both endpoints, for connectome plots.
//! - Node tables list each region with its coordinate.

use crate::data::PebType;
use crate::posterior::ConnectivityResult;
use crate::transform::CHANGE_TOWARD_ZERO;
use csv::WriterBuilder;
use ndarray::ArrayView2;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CORNER_LABEL: &str = "from\\to";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to write table: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Matrix is {rows}x{cols} but {labels} region labels were given")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        labels: usize,
    },
}

/// File-name-safe form of a covariate name.
pub fn safe_covariate_name(name: &str) -> String {
    name.replace([' ', '/'], "_")
}

fn check_square(rows: usize, cols: usize, labels: usize) -> Result<(), ExportError> {
    if rows != labels || cols != labels {
        return Err(ExportError::ShapeMismatch { rows, cols, labels });
    }
    Ok(())
}

fn format_weight(buffer: &mut ryu::Buffer, value: f64) -> String {
    if value == 0.0 {
        String::new()
    } else {
        buffer.format(value).to_string()
    }
}

fn write_labeled_matrix<T: Copy>(
    path: &Path,
    matrix: ArrayView2<'_, T>,
    roi_names: &[String],
    mut cell: impl FnMut(T) -> String,
) -> Result<(), ExportError> {
    let (rows, cols) = matrix.dim();
    check_square(rows, cols, roi_names.len())?;

    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(std::iter::once(CORNER_LABEL).chain(roi_names.iter().map(String::as_str)))?;
    for (row, label) in matrix.rows().into_iter().zip(roi_names) {
        let mut record = Vec::with_capacity(cols + 1);
        record.push(label.clone());
        record.extend(row.iter().map(|&v| cell(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a display-oriented (`[source, target]`) matrix.
pub fn write_heatmap_table(
    path: &Path,
    matrix: ArrayView2<'_, f64>,
    roi_names: &[String],
) -> Result<(), ExportError> {
    let mut buffer = ryu::Buffer::new();
    write_labeled_matrix(path, matrix, roi_names, |v| format_weight(&mut buffer, v))
}

/// Writes a display-oriented boolean mask as `1` and `0`.
pub fn write_mask_table(
    path: &Path,
    mask: ArrayView2<'_, bool>,
    roi_names: &[String],
) -> Result<(), ExportError> {
    write_labeled_matrix(path, mask, roi_names, |m| {
        if m { "1".to_string() } else { "0".to_string() }
    })
}

/// Exports covariate `index` as `{stem}_{covariate}.tsv` in `output_dir`.
///
/// The change covariate of a change analysis also gets `_magnitude.tsv` and
/// `_sign_change.tsv` siblings. Returns every file written.
pub fn export_covariate(
    result: &ConnectivityResult,
    index: usize,
    output_dir: &Path,
    stem: &str,
) -> Result<Vec<PathBuf>, ExportError> {
    let index = if index < result.covariate_n() { index } else { 0 };
    let name = &result.covariate_names[index];
    let base = format!("{stem}_{}", safe_covariate_name(name));
    export_covariate_as(result, index, output_dir, &base)
}

/// Exports covariate `index` under the exact file stem `base`.
pub fn export_covariate_as(
    result: &ConnectivityResult,
    index: usize,
    output_dir: &Path,
    base: &str,
) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();

    let path = output_dir.join(format!("{base}.tsv"));
    write_heatmap_table(&path, result.heatmap_orientation(index), &result.roi_names)?;
    written.push(path);

    let is_change_covariate = result
        .covariate_names
        .get(index)
        .is_some_and(|name| name == CHANGE_TOWARD_ZERO);
    if let (true, Some(change)) = (is_change_covariate, result.change.as_ref()) {
        let magnitude = output_dir.join(format!("{base}_magnitude.tsv"));
        write_heatmap_table(&magnitude, change.magnitude_change.t(), &result.roi_names)?;
        written.push(magnitude);

        let sign = output_dir.join(format!("{base}_sign_change.tsv"));
        write_mask_table(&sign, change.sign_change_mask.t(), &result.roi_names)?;
        written.push(sign);
    }

    log::debug!("Wrote {} table(s) for {base}", written.len());
    Ok(written)
}

/// Exports every covariate. Behavioral analyses also get `{stem}_template.tsv`,
/// the mask of connections estimated in any covariate.
pub fn export_all_covariates(
    result: &ConnectivityResult,
    output_dir: &Path,
    stem: &str,
) -> Result<Vec<PathBuf>, ExportError> {
    let mut written = Vec::new();
    for index in 0..result.covariate_n() {
        written.extend(export_covariate(result, index, output_dir, stem)?);
    }
    if result.peb_type == Some(PebType::BehavAssociations) {
        let template = output_dir.join(format!("{stem}_template.tsv"));
        write_mask_table(&template, result.estimated_mask().t(), &result.roi_names)?;
        written.push(template);
    }
    Ok(written)
}

/// Writes one row per non-zero off-diagonal connection of a `[target, source]`
/// matrix. Returns the number of edges.
pub fn write_edge_table(
    path: &Path,
    matrix: ArrayView2<'_, f64>,
    roi_names: &[String],
    coords: ArrayView2<'_, f64>,
) -> Result<usize, ExportError> {
    let (rows, cols) = matrix.dim();
    check_square(rows, cols, roi_names.len())?;
    check_square(coords.nrows(), roi_names.len(), roi_names.len())?;

    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "source", "target", "weight", "source_x", "source_y", "source_z", "target_x",
        "target_y", "target_z",
    ])?;

    let mut buffer = ryu::Buffer::new();
    let mut edges = 0usize;
    for ((target, source), &weight) in matrix.indexed_iter() {
        if target == source || weight == 0.0 {
            continue;
        }
        let mut record = vec![
            roi_names[source].clone(),
            roi_names[target].clone(),
            buffer.format(weight).to_string(),
        ];
        for endpoint in [source, target] {
            record.extend(coords.row(endpoint).iter().map(|&c| buffer.format(c).to_string()));
        }
        writer.write_record(&record)?;
        edges += 1;
    }
    writer.flush()?;
    Ok(edges)
}

/// Writes `label`, `x`, `y`, `z` for every region.
pub fn write_node_table(
    path: &Path,
    roi_names: &[String],
    coords: ArrayView2<'_, f64>,
) -> Result<(), ExportError> {
    check_square(coords.nrows(), roi_names.len(), roi_names.len())?;
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["label", "x", "y", "z"])?;
    let mut buffer = ryu::Buffer::new();
    for (label, row) in roi_names.iter().zip(coords.rows()) {
        let mut record = vec![label.clone()];
        record.extend(row.iter().map(|&c| buffer.format(c).to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshape::MatrixLayout;
    use crate::transform::derive_change_covariates;
    use ndarray::{Array3, array, s};
    use tempfile::tempdir;

    fn names(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn single(matrix: ndarray::Array2<f64>, roi_names: &[&str]) -> ConnectivityResult {
        let (n, m) = matrix.dim();
        let mut ep = Array3::zeros((n, m, 1));
        ep.slice_mut(s![.., .., 0]).assign(&matrix);
        ConnectivityResult {
            ep,
            covariate_names: vec!["covariate 1".to_string()],
            roi_names: names(roi_names),
            layout: MatrixLayout::Dense,
            peb_type: None,
            change: None,
        }
    }

    #[test]
    fn covariate_names_become_file_safe() {
        assert_eq!(safe_covariate_name("Change toward 0"), "Change_toward_0");
        assert_eq!(safe_covariate_name("age/sex"), "age_sex");
    }

    #[test]
    fn heatmap_rows_are_sources_and_zero_cells_empty() {
        let dir = tempdir().unwrap();
        // 0.25 is the connection from b to a.
        let result = single(array![[0.0, 0.25], [0.0, -0.5]], &["a", "b"]);
        let written = export_covariate(&result, 0, dir.path(), "peb").unwrap();
        assert_eq!(written, vec![dir.path().join("peb_covariate_1.tsv")]);

        let text = fs::read_to_string(&written[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "from\\to\ta\tb");
        assert_eq!(lines[1], "a\t\t");
        assert_eq!(lines[2], "b\t0.25\t-0.5");
    }

    #[test]
    fn change_covariate_gets_sibling_tables() {
        let dir = tempdir().unwrap();
        let mut ep = Array3::zeros((2, 2, 2));
        ep[[1, 0, 0]] = 0.4;
        ep[[1, 0, 1]] = -0.6;
        let (expanded, analysis) = derive_change_covariates(&ep).unwrap();
        let result = ConnectivityResult {
            ep: expanded,
            covariate_names: names(&[
                "mean of group 1",
                "session",
                "mean of second group",
                "Change toward 0",
            ]),
            roi_names: names(&["a", "b"]),
            layout: MatrixLayout::Dense,
            peb_type: Some(PebType::Change),
            change: Some(analysis),
        };

        let written = export_all_covariates(&result, dir.path(), "peb").unwrap();
        assert_eq!(written.len(), 6);
        let sign = fs::read_to_string(dir.path().join("peb_Change_toward_0_sign_change.tsv")).unwrap();
        let lines: Vec<&str> = sign.lines().collect();
        assert_eq!(lines[1], "a\t0\t1");
        assert_eq!(lines[2], "b\t0\t0");
    }

    #[test]
    fn edges_skip_self_and_zero_connections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edges.tsv");
        let matrix = array![[0.9, 0.0], [-0.3, 0.9]];
        let coords = array![[1.0, 2.0, 3.0], [-1.0, -2.0, -3.0]];

        let edges = write_edge_table(&path, matrix.view(), &names(&["a", "b"]), coords.view()).unwrap();
        assert_eq!(edges, 1);
        let text = fs::read_to_string(&path).unwrap();
        let row: Vec<&str> = text.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(&row[..3], &["a", "b", "-0.3"]);
        assert_eq!(&row[3..], &["1.0", "2.0", "3.0", "-1.0", "-2.0", "-3.0"]);
    }

    #[test]
    fn label_count_must_match_matrix() {
        let dir = tempdir().unwrap();
        let matrix = array![[0.0, 1.0], [1.0, 0.0]];
        assert!(matches!(
            write_heatmap_table(&dir.path().join("x.tsv"), matrix.view(), &names(&["a"])),
            Err(ExportError::ShapeMismatch { labels: 1, .. })
        ));
    }
}
