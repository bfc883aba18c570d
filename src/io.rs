use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use camera_intrinsic_model::GenericModel;
use log::{info, warn};
use nalgebra as na;
use serde::Deserialize;

use crate::reconstruct::Reconstruction;
use crate::types::{DltCoefficients, TrackTable, DLT_LEN};
use crate::undistort::{CameraProfile, OmnidirectionalModel, PinholeDistortion};

/// Empty cells and `NaN` both read as a missing value.
fn parse_cell(cell: &str) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(f64::NAN);
    }
    cell.parse()
        .with_context(|| format!("not a number: {:?}", cell))
}

/// `{track}_cam_{c}_{x|y}` headers reduced to unique track names, in order.
pub fn track_names<'a>(header: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for column in header {
        let name = column.rsplitn(4, '_').last().unwrap_or(column);
        if !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
    }
    names
}

pub fn parse_track_table<R: std::io::Read>(rdr: R) -> Result<TrackTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(rdr);
    let header = reader.headers()?.clone();
    let names = track_names(header.iter());
    ensure!(!names.is_empty(), "observation table has no columns");
    let width = header.len();
    ensure!(
        width % (2 * names.len()) == 0,
        "{} columns do not split into u, v pairs for {} tracks",
        width,
        names.len()
    );
    let camera_count = width / (2 * names.len());

    let mut values = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("observation row {}", row + 1))?;
        for cell in record.iter() {
            values.push(parse_cell(cell).with_context(|| format!("observation row {}", row + 1))?);
        }
    }
    let frames = values.len() / width;
    let data = na::DMatrix::from_row_iterator(frames, width, values);
    Ok(TrackTable::new(names, camera_count, data)?)
}

pub fn read_track_table(path: &Path) -> Result<TrackTable> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let table = parse_track_table(file).with_context(|| format!("reading {}", path.display()))?;
    info!(
        "{}: {} tracks, {} cameras, {} frames",
        path.display(),
        table.track_names().len(),
        table.camera_count(),
        table.frame_count()
    );
    Ok(table)
}

fn parse_rows<R: std::io::Read>(rdr: R) -> Result<Vec<Vec<f64>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(rdr);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = record.iter().map(parse_cell).collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoefficientLayout {
    CameraPerColumn,
    CameraPerRow,
}

/// Orientation of a `rows x columns` coefficient table. One camera per column
/// wins when both readings are possible.
pub fn coefficient_layout(rows: usize, columns: usize) -> Option<CoefficientLayout> {
    let is_dlt_len = |n: usize| n == DLT_LEN || n == DLT_LEN + 1;
    match (is_dlt_len(rows), is_dlt_len(columns)) {
        (true, true) => {
            warn!(
                "{}x{} coefficient table read as one camera per column",
                rows, columns
            );
            Some(CoefficientLayout::CameraPerColumn)
        }
        (true, false) => Some(CoefficientLayout::CameraPerColumn),
        (false, true) => Some(CoefficientLayout::CameraPerRow),
        (false, false) => None,
    }
}

/// Coefficient table without header: one camera per column, 11 or 12 rows.
/// A table with one camera per row is accepted too. Blank cells are errors.
pub fn parse_coefficients<R: std::io::Read>(rdr: R) -> Result<Vec<DltCoefficients>> {
    let rows = parse_rows(rdr)?;
    let width = match rows.first() {
        Some(row) => row.len(),
        None => bail!("empty coefficient table"),
    };
    let cameras: Vec<Vec<f64>> = match coefficient_layout(rows.len(), width) {
        Some(CoefficientLayout::CameraPerColumn) => (0..width)
            .map(|cam| rows.iter().map(|row| row[cam]).collect())
            .collect(),
        Some(CoefficientLayout::CameraPerRow) => rows,
        None => bail!(
            "a {}x{} table holds no {} coefficient vectors",
            rows.len(),
            width,
            DLT_LEN
        ),
    };
    Ok(cameras
        .iter()
        .enumerate()
        .map(|(cam, values)| DltCoefficients::from_slice(values).map_err(|e| e.for_camera(cam)))
        .collect::<Result<Vec<_>, _>>()?)
}

pub fn read_coefficients(path: &Path) -> Result<Vec<DltCoefficients>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    parse_coefficients(file).with_context(|| format!("reading {}", path.display()))
}

/// Whitespace separated profile rows, one per camera.
pub fn parse_profile_rows(contents: &str) -> Result<Vec<Vec<f64>>> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            line.split_whitespace()
                .map(parse_cell)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("profile row {}", i + 1))
        })
        .collect()
}

pub fn read_profile_rows(path: &Path) -> Result<Vec<Vec<f64>>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_profile_rows(&contents).with_context(|| format!("reading {}", path.display()))
}

pub fn read_pinhole_profiles(path: &Path) -> Result<Vec<CameraProfile>> {
    read_profile_rows(path)?
        .iter()
        .enumerate()
        .map(|(cam, row)| -> Result<CameraProfile> {
            let pinhole = PinholeDistortion::from_profile_row(row)
                .with_context(|| format!("camera {} in {}", cam, path.display()))?;
            Ok(CameraProfile::Pinhole(pinhole))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct OmnidirectionalDescriptor {
    cameras: Vec<OmnidirectionalCamera>,
}

#[derive(Debug, Deserialize)]
struct OmnidirectionalCamera {
    /// `camera-intrinsic-model` json, relative to the descriptor.
    model: PathBuf,
    focal: f64,
    cx: f64,
    cy: f64,
}

pub fn read_omnidirectional_profiles(path: &Path) -> Result<Vec<CameraProfile>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let descriptor: OmnidirectionalDescriptor = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    descriptor
        .cameras
        .into_iter()
        .map(|cam| -> Result<CameraProfile> {
            let model_path = base.join(&cam.model);
            let model_json = std::fs::read_to_string(&model_path)
                .with_context(|| format!("failed to read camera model {}", model_path.display()))?;
            let model: GenericModel<f64> = serde_json::from_str(&model_json)
                .with_context(|| format!("parsing camera model {}", model_path.display()))?;
            Ok(CameraProfile::Omnidirectional(Box::new(
                OmnidirectionalModel::new(model, cam.focal, cam.cx, cam.cy),
            )))
        })
        .collect()
}

/// Everything before `xypts` in the observation path, so `trial01-xypts.csv`
/// gives `trial01-`. Paths without `xypts` use their extension-less form
/// followed by `-`.
pub fn output_prefix(xypath: &Path) -> String {
    let full = xypath.to_string_lossy();
    match full.find("xypts") {
        Some(i) => full[..i].to_owned(),
        None => format!("{}-", xypath.with_extension("").to_string_lossy()),
    }
}

fn write_matrix<W: std::io::Write>(
    wtr: W,
    header: &[String],
    m: &na::DMatrix<f64>,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(wtr);
    writer.write_record(header)?;
    for row in m.row_iter() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// `{track}_X, {track}_Y, {track}_Z` per track, `NaN` where undefined.
pub fn write_xyz<W: std::io::Write>(wtr: W, reconstruction: &Reconstruction) -> Result<()> {
    write_matrix(
        wtr,
        &reconstruction.xyz_columns(),
        &reconstruction.xyz_matrix(),
    )
}

/// One reprojection error column per track, `NaN` where undefined.
pub fn write_residuals<W: std::io::Write>(wtr: W, reconstruction: &Reconstruction) -> Result<()> {
    write_matrix(
        wtr,
        &reconstruction.track_names,
        &reconstruction.error_matrix(),
    )
}

/// Writes `{prefix}xyzpts.csv` and `{prefix}xyzres.csv`.
pub fn write_reconstruction(
    prefix: &str,
    reconstruction: &Reconstruction,
) -> Result<(PathBuf, PathBuf)> {
    let xyz_path = PathBuf::from(format!("{}xyzpts.csv", prefix));
    let res_path = PathBuf::from(format!("{}xyzres.csv", prefix));
    let create = |path: &Path| {
        std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))
    };
    write_xyz(create(&xyz_path)?, reconstruction)?;
    write_residuals(create(&res_path)?, reconstruction)?;
    Ok((xyz_path, res_path))
}
