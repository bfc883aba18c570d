//! OpenCV-style camera set built from DLT coefficients and full profile rows,
//! written as the `calibration.toml` read by pose-estimation tools.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::camera_model::decompose;
use crate::error::DltError;
use crate::types::{DltCoefficients, PoseWarning, RvecTvec};
use crate::undistort::{PinholeDistortion, FULL_PROFILE_LEN};

#[derive(Debug, Clone, Serialize)]
pub struct CameraCalibration {
    pub name: String,
    pub size: [f64; 2],
    pub matrix: [[f64; 3]; 3],
    pub distortions: [f64; 5],
    #[serde(flatten)]
    pub extrinsics: RvecTvec,
}

impl CameraCalibration {
    /// `row` is a 12 value profile row, which carries the camera number and
    /// image size.
    pub fn new(dlt: &DltCoefficients, row: &[f64]) -> Result<CameraCalibration, DltError> {
        if row.len() != FULL_PROFILE_LEN {
            return Err(DltError::ProfileLength(row.len()));
        }
        let pinhole = PinholeDistortion::from_profile_row(row)?;
        let pose = decompose(dlt)?;
        if let Some(PoseWarning::NonOrthogonalAxes { residual }) = pose.warnings.first() {
            warn!(
                "camera {}: rotation exported from non-orthogonal axes (residual {:e})",
                row[0], residual
            );
        }
        let k = pinhole.intrinsic_matrix();
        Ok(CameraCalibration {
            name: format!("{}", row[0]),
            size: [row[2], row[3]],
            matrix: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            distortions: pinhole.distortion(),
            extrinsics: pose.to_rvec_tvec(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationMetadata {
    pub adjusted: bool,
    /// No calibration residual is available from DLT coefficients alone, and
    /// toml has no null, so `None` leaves the key out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
}

/// Cameras keyed `cam_0, cam_1, ...` followed by a `metadata` entry.
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    pub cameras: Vec<CameraCalibration>,
    pub metadata: CalibrationMetadata,
}

impl CalibrationSet {
    pub fn new(dlt: &[DltCoefficients], rows: &[Vec<f64>]) -> Result<CalibrationSet, DltError> {
        if dlt.len() != rows.len() {
            return Err(DltError::CameraCountMismatch {
                expected: dlt.len(),
                found: rows.len(),
            });
        }
        let cameras = dlt
            .iter()
            .zip(rows)
            .enumerate()
            .map(|(cam, (coefs, row))| {
                CameraCalibration::new(coefs, row).map_err(|e| e.for_camera(cam))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CalibrationSet {
            cameras,
            metadata: CalibrationMetadata {
                adjusted: false,
                error: None,
            },
        })
    }
}

impl Serialize for CalibrationSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cameras.len() + 1))?;
        for (i, camera) in self.cameras.iter().enumerate() {
            map.serialize_entry(&format!("cam_{}", i), camera)?;
        }
        map.serialize_entry("metadata", &self.metadata)?;
        map.end()
    }
}

/// `calibration.toml` next to the coefficient file.
pub fn default_output(dlt_path: &Path) -> PathBuf {
    dlt_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join("calibration.toml")
}

pub fn write_calibration(path: &Path, set: &CalibrationSet) -> Result<()> {
    let text = toml::to_string(set)?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    info!("{} cameras written to {}", set.cameras.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra as na;

    fn camera(center: na::Point3<f64>) -> DltCoefficients {
        let rotation = na::Rotation3::look_at_lh(&(-center.coords), &na::Vector3::z());
        let k = na::Matrix3::new(-1000.0, 0.0, 640.0, 0.0, -1000.0, 360.0, 0.0, 0.0, 1.0);
        DltCoefficients::from_camera(&k, rotation.matrix(), &center).unwrap()
    }

    fn row(camera: f64) -> Vec<f64> {
        vec![
            camera, 1000.0, 1280.0, 720.0, 640.0, 360.0, 1.0, -0.1, 0.02, 0.0, 0.0, 0.0,
        ]
    }

    #[test]
    fn cameras_carry_profile_and_pose() {
        let centers = [na::Point3::new(3.0, 0.5, 1.0), na::Point3::new(-0.5, 3.0, 1.2)];
        let dlt: Vec<_> = centers.iter().map(|c| camera(*c)).collect();
        let set = CalibrationSet::new(&dlt, &[row(1.0), row(2.0)]).unwrap();

        assert_eq!(set.cameras.len(), 2);
        let cam = &set.cameras[1];
        assert_eq!(cam.name, "2");
        assert_eq!(cam.size, [1280.0, 720.0]);
        assert_eq!(cam.matrix[0], [1000.0, 0.0, 640.0]);
        assert_eq!(cam.matrix[1][2], 360.0);
        assert_eq!(cam.distortions, [-0.1, 0.02, 0.0, 0.0, 0.0]);
        assert_relative_eq!(cam.extrinsics.na_tvec(), centers[1].coords, epsilon = 1e-8);
    }

    #[test]
    fn toml_layout() {
        let dlt = vec![camera(na::Point3::new(2.0, 2.0, 1.0))];
        let set = CalibrationSet::new(&dlt, &[row(1.0)]).unwrap();
        let text = toml::to_string(&set).unwrap();
        let value: toml::Value = toml::from_str(&text).unwrap();

        let cam = &value["cam_0"];
        assert_eq!(cam["name"].as_str(), Some("1"));
        assert_eq!(cam["size"].as_array().unwrap().len(), 2);
        assert_eq!(cam["matrix"][1][1].as_float(), Some(1000.0));
        assert_eq!(cam["rotation"].as_array().unwrap().len(), 3);
        assert_relative_eq!(cam["translation"][2].as_float().unwrap(), 1.0, epsilon = 1e-8);
        assert_eq!(value["metadata"]["adjusted"].as_bool(), Some(false));
        assert!(value["metadata"].get("error").is_none());
    }

    #[test]
    fn default_output_sits_next_to_coefficients() {
        assert_eq!(
            default_output(Path::new("/data/wand/dlt-coefs.csv")),
            PathBuf::from("/data/wand/calibration.toml")
        );
    }

    #[test]
    fn failures_name_the_camera() {
        let dlt = vec![
            camera(na::Point3::new(2.0, 2.0, 1.0)),
            DltCoefficients::new(na::SVector::zeros()),
        ];
        assert_eq!(
            CalibrationSet::new(&dlt, &[row(1.0), row(2.0)]).unwrap_err(),
            DltError::DegenerateCalibration { camera: Some(1) }
        );
        assert_eq!(
            CalibrationSet::new(&dlt, &[row(1.0)]).unwrap_err(),
            DltError::CameraCountMismatch {
                expected: 2,
                found: 1
            }
        );
        assert_eq!(
            CalibrationSet::new(&dlt[..1], &[row(1.0)[1..9].to_vec()]).unwrap_err(),
            DltError::ProfileLength(8)
        );
    }
}
