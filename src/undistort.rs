//! Lens undistortion of pixel observations.
//!
//! Undistorted points stay in pixel space: they are where the observation would
//! land in an ideal pinhole camera with the same focal length and principal
//! point.

use camera_intrinsic_model::GenericModel;
use nalgebra as na;

use crate::error::DltError;

/// Number of values in a pinhole profile: `f, cx, cy, k1, k2, p1, p2, k3`.
pub const PINHOLE_PROFILE_LEN: usize = 8;

/// Full profile row: `camera, f, width, height, cx, cy, aspect, k1, k2, p1, p2, k3`.
pub const FULL_PROFILE_LEN: usize = 12;

/// Columns of a full row that the distortion model does not use.
const UNUSED_PROFILE_COLUMNS: [usize; 4] = [0, 2, 3, 6];

/// Fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 5;

/// Anything that can map distorted pixels to ideal pinhole pixels.
pub trait UndistortPoints: Send + Sync {
    fn undistort_points(&self, points: &[na::Point2<f64>]) -> Vec<na::Point2<f64>>;
}

/// Pinhole camera with radial (`k1, k2, k3`) and tangential (`p1, p2`) distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeDistortion {
    pub focal: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl PinholeDistortion {
    /// Reads `[f, cx, cy, k1, k2, p1, p2, k3]`.
    pub fn from_slice(values: &[f64]) -> Result<PinholeDistortion, DltError> {
        match values {
            &[focal, cx, cy, k1, k2, p1, p2, k3] => Ok(PinholeDistortion {
                focal,
                cx,
                cy,
                k1,
                k2,
                p1,
                p2,
                k3,
            }),
            _ => Err(DltError::ProfileLength(values.len())),
        }
    }

    /// Reads a profile row of either 8 or 12 values. The camera number, image
    /// size and aspect ratio of a 12 value row are dropped.
    pub fn from_profile_row(row: &[f64]) -> Result<PinholeDistortion, DltError> {
        match row.len() {
            PINHOLE_PROFILE_LEN => PinholeDistortion::from_slice(row),
            FULL_PROFILE_LEN => {
                let used: Vec<f64> = row
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !UNUSED_PROFILE_COLUMNS.contains(i))
                    .map(|(_, v)| *v)
                    .collect();
                PinholeDistortion::from_slice(&used)
            }
            n => Err(DltError::ProfileLength(n)),
        }
    }

    pub fn intrinsic_matrix(&self) -> na::Matrix3<f64> {
        na::Matrix3::new(
            self.focal, 0.0, self.cx, //
            0.0, self.focal, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Distortion coefficients in `k1, k2, p1, p2, k3` order.
    pub fn distortion(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Inverse of the OpenCV radial/tangential model by the same fixed-point
    /// iteration as `cv::undistortPoints`.
    pub fn undistort_point(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        let x0 = (p.x - self.cx) / self.focal;
        let y0 = (p.y - self.cy) / self.focal;
        let (mut x, mut y) = (x0, y0);

        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let icdist = 1.0 / (1.0 + ((self.k3 * r2 + self.k2) * r2 + self.k1) * r2);
            if icdist < 0.0 {
                // diverging, fall back to the distorted point
                x = x0;
                y = y0;
                break;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (x0 - dx) * icdist;
            y = (y0 - dy) * icdist;
        }

        na::Point2::new(x * self.focal + self.cx, y * self.focal + self.cy)
    }
}

#[cfg(test)]
impl PinholeDistortion {
    /// Forward model through `camera-intrinsic-model`, for distorted fixtures.
    pub(crate) fn distort_point(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        use camera_intrinsic_model::OpenCVModel5;
        let params = na::dvector![
            self.focal, self.focal, self.cx, self.cy, self.k1, self.k2, self.p1, self.p2, self.k3
        ];
        let model = GenericModel::OpenCVModel5(OpenCVModel5::new(&params, 0, 0));
        let ray = na::Vector3::new((p.x - self.cx) / self.focal, (p.y - self.cy) / self.focal, 1.0);
        let d = model.project_one(&ray);
        na::Point2::new(d.x, d.y)
    }
}

impl UndistortPoints for PinholeDistortion {
    fn undistort_points(&self, points: &[na::Point2<f64>]) -> Vec<na::Point2<f64>> {
        points.iter().map(|p| self.undistort_point(p)).collect()
    }
}

/// Wide-angle camera described by a `camera-intrinsic-model` model. Rays are
/// re-projected through an ideal pinhole with the given focal length and
/// principal point.
pub struct OmnidirectionalModel {
    model: GenericModel<f64>,
    focal: f64,
    cx: f64,
    cy: f64,
}

impl OmnidirectionalModel {
    pub fn new(model: GenericModel<f64>, focal: f64, cx: f64, cy: f64) -> OmnidirectionalModel {
        OmnidirectionalModel {
            model,
            focal,
            cx,
            cy,
        }
    }
}

impl UndistortPoints for OmnidirectionalModel {
    fn undistort_points(&self, points: &[na::Point2<f64>]) -> Vec<na::Point2<f64>> {
        points
            .iter()
            .map(|p| {
                let ray = self.model.unproject_one(&na::Vector2::new(p.x, p.y));
                na::Point2::new(
                    self.focal * ray[0] / ray[2] + self.cx,
                    self.focal * ray[1] / ray[2] + self.cy,
                )
            })
            .collect()
    }
}

/// Per-camera lens model.
pub enum CameraProfile {
    Pinhole(PinholeDistortion),
    Omnidirectional(Box<dyn UndistortPoints>),
}

impl CameraProfile {
    pub fn undistort_points(&self, points: &[na::Point2<f64>]) -> Vec<na::Point2<f64>> {
        match self {
            CameraProfile::Pinhole(pinhole) => pinhole.undistort_points(points),
            CameraProfile::Omnidirectional(model) => model.undistort_points(points),
        }
    }

    pub fn undistort_point(&self, point: &na::Point2<f64>) -> na::Point2<f64> {
        match self {
            CameraProfile::Pinhole(pinhole) => pinhole.undistort_point(point),
            CameraProfile::Omnidirectional(model) => model
                .undistort_points(std::slice::from_ref(point))
                .first()
                .copied()
                .unwrap_or_else(|| na::Point2::new(f64::NAN, f64::NAN)),
        }
    }
}

impl std::fmt::Debug for CameraProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraProfile::Pinhole(pinhole) => f.debug_tuple("Pinhole").field(pinhole).finish(),
            CameraProfile::Omnidirectional(_) => f.write_str("Omnidirectional(..)"),
        }
    }
}

/// Undistort `uv` with the profile of `camera`, or pass it through when no
/// profiles were supplied.
pub(crate) fn undistort_with(
    profiles: Option<&[CameraProfile]>,
    camera: usize,
    uv: na::Point2<f64>,
) -> na::Point2<f64> {
    match profiles.and_then(|p| p.get(camera)) {
        Some(profile) => profile.undistort_point(&uv),
        None => uv,
    }
}
