use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::DltError;

/// Number of coefficients in a DLT camera vector.
pub const DLT_LEN: usize = 11;

/// 11-parameter DLT camera. The projection of `xyz` is
/// `u = (L0 x + L1 y + L2 z + L3) / (L8 x + L9 y + L10 z + 1)` and
/// `v = (L4 x + L5 y + L6 z + L7) / (L8 x + L9 y + L10 z + 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DltCoefficients(na::SVector<f64, DLT_LEN>);

impl DltCoefficients {
    pub fn new(coefs: na::SVector<f64, DLT_LEN>) -> DltCoefficients {
        DltCoefficients(coefs)
    }

    /// Accepts 11 coefficients, or 12 where the trailing padding value is ignored.
    /// Every used coefficient must be finite.
    pub fn from_slice(values: &[f64]) -> Result<DltCoefficients, DltError> {
        let used = match values.len() {
            11 | 12 => &values[..DLT_LEN],
            n => return Err(DltError::CoefficientCount(n)),
        };
        if let Some(index) = used.iter().position(|v| !v.is_finite()) {
            return Err(DltError::NonFiniteCoefficient {
                index,
                camera: None,
            });
        }
        Ok(DltCoefficients(na::SVector::from_column_slice(used)))
    }

    /// Flatten a 3x4 projection matrix, normalized so that `P[(2, 3)] == 1`.
    pub fn from_projection(p: &na::Matrix3x4<f64>) -> Result<DltCoefficients, DltError> {
        let w = p[(2, 3)];
        if w == 0.0 || !w.is_finite() {
            return Err(DltError::DegenerateCalibration { camera: None });
        }
        let flat: Vec<f64> = (0..3)
            .flat_map(|r| (0..4).map(move |c| (r, c)))
            .take(DLT_LEN)
            .map(|rc| p[rc] / w)
            .collect();
        DltCoefficients::from_slice(&flat)
    }

    /// Camera with intrinsic matrix `k`, world-to-camera `rotation` and optical
    /// center `center`, i.e. `P = K [R | -R C]`.
    pub fn from_camera(
        k: &na::Matrix3<f64>,
        rotation: &na::Matrix3<f64>,
        center: &na::Point3<f64>,
    ) -> Result<DltCoefficients, DltError> {
        let mut p = na::Matrix3x4::zeros();
        p.fixed_view_mut::<3, 3>(0, 0).copy_from(&(k * rotation));
        p.set_column(3, &(k * (-rotation * center.coords)));
        DltCoefficients::from_projection(&p)
    }

    pub fn as_slice(&self) -> &[f64] {
        self.0.as_slice()
    }

    pub fn vector(&self) -> &na::SVector<f64, DLT_LEN> {
        &self.0
    }

    /// The `(L0, L1, L2)` block.
    pub fn u_row(&self) -> na::Vector3<f64> {
        na::Vector3::new(self.0[0], self.0[1], self.0[2])
    }

    /// The `(L4, L5, L6)` block.
    pub fn v_row(&self) -> na::Vector3<f64> {
        na::Vector3::new(self.0[4], self.0[5], self.0[6])
    }

    /// The `(L8, L9, L10)` block.
    pub fn w_row(&self) -> na::Vector3<f64> {
        na::Vector3::new(self.0[8], self.0[9], self.0[10])
    }

    /// Forward DLT projection. `None` when the point lies on the camera's
    /// principal plane.
    pub fn project(&self, xyz: &na::Point3<f64>) -> Option<na::Point2<f64>> {
        let den = self.w_row().dot(&xyz.coords) + 1.0;
        if den == 0.0 {
            return None;
        }
        Some(na::Point2::new(
            (self.u_row().dot(&xyz.coords) + self.0[3]) / den,
            (self.v_row().dot(&xyz.coords) + self.0[7]) / den,
        ))
    }
}

impl std::ops::Index<usize> for DltCoefficients {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

/// Euler angles in degrees, extracted from the camera-to-world transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoseWarning {
    /// The recovered axes are not orthogonal, so yaw/pitch/roll only
    /// approximate the transform. `residual` is the back-calculated
    /// `|cos(yaw) cos(pitch) - T[0, 0]|`.
    NonOrthogonalAxes { residual: f64 },
}

/// Explicit pinhole camera recovered from a DLT vector.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    /// Optical center in calibration-frame coordinates.
    pub position: na::Point3<f64>,
    /// Homogeneous transform with the inverse rotation in the upper-left block
    /// and the position in the bottom row.
    pub transform: na::Matrix4<f64>,
    /// World-to-camera rotation, only approximately orthogonal.
    pub rotation: na::Matrix3<f64>,
    /// Axis-angle form of `rotation` after projection onto SO(3).
    pub rotation_vector: na::Vector3<f64>,
    pub euler: EulerAngles,
    /// Principal point `(Uo, Vo)`.
    pub principal_point: na::Point2<f64>,
    /// Focal scale term `Z`. Negative for the DLT image axis convention.
    pub scale: f64,
    pub warnings: Vec<PoseWarning>,
}

impl CameraPose {
    pub fn to_rvec_tvec(&self) -> RvecTvec {
        RvecTvec::new(&self.rotation_vector, &self.position.coords)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RvecTvec {
    #[serde(rename = "rotation")]
    rvec: (f64, f64, f64),
    #[serde(rename = "translation")]
    tvec: (f64, f64, f64),
}

impl RvecTvec {
    pub fn new(rvec: &na::Vector3<f64>, tvec: &na::Vector3<f64>) -> RvecTvec {
        RvecTvec {
            rvec: (rvec[0], rvec[1], rvec[2]),
            tvec: (tvec[0], tvec[1], tvec[2]),
        }
    }
    pub fn na_rvec(&self) -> na::Vector3<f64> {
        na::Vector3::new(self.rvec.0, self.rvec.1, self.rvec.2)
    }
    pub fn na_tvec(&self) -> na::Vector3<f64> {
        na::Vector3::new(self.tvec.0, self.tvec.1, self.tvec.2)
    }
}

/// 2D observations of several tracks in several cameras.
///
/// `data` has one row per frame and `2 * camera_count` columns per track,
/// laid out as `u, v` pairs per camera. Missing observations are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTable {
    track_names: Vec<String>,
    camera_count: usize,
    data: na::DMatrix<f64>,
}

impl TrackTable {
    pub fn new(
        track_names: Vec<String>,
        camera_count: usize,
        data: na::DMatrix<f64>,
    ) -> Result<TrackTable, DltError> {
        let expected = track_names.len() * 2 * camera_count;
        if data.ncols() != expected {
            let found = if track_names.is_empty() {
                0
            } else {
                data.ncols() / (2 * track_names.len())
            };
            return Err(DltError::CameraCountMismatch {
                expected: camera_count,
                found,
            });
        }
        Ok(TrackTable {
            track_names,
            camera_count,
            data,
        })
    }

    pub fn track_names(&self) -> &[String] {
        &self.track_names
    }

    pub fn camera_count(&self) -> usize {
        self.camera_count
    }

    pub fn frame_count(&self) -> usize {
        self.data.nrows()
    }

    pub fn data(&self) -> &na::DMatrix<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut na::DMatrix<f64> {
        &mut self.data
    }

    /// Columns of a single track: `frames x (2 * camera_count)`.
    pub fn track(&self, track: usize) -> na::DMatrixView<'_, f64> {
        let width = 2 * self.camera_count;
        self.data.columns(track * width, width)
    }

    /// Observation of `track` in `camera` at `frame`, if both coordinates are finite.
    pub fn observation(
        &self,
        track: usize,
        frame: usize,
        camera: usize,
    ) -> Option<na::Point2<f64>> {
        let col = track * 2 * self.camera_count + 2 * camera;
        finite_pair(self.data[(frame, col)], self.data[(frame, col + 1)])
    }
}

pub(crate) fn finite_pair(u: f64, v: f64) -> Option<na::Point2<f64>> {
    if u.is_finite() && v.is_finite() {
        Some(na::Point2::new(u, v))
    } else {
        None
    }
}
