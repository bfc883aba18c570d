//! Reprojection error of reconstructed points.
//!
//! The error of a point seen by `n` cameras is
//! `sqrt(sum_of_squared_pixel_residuals / (2 n - 3))`: two measurements per
//! camera minus the three unknowns of the triangulation.

use log::warn;
use nalgebra as na;

use crate::error::DltError;
use crate::triangulate::{check_camera_count, frame_views, View};
use crate::types::{DltCoefficients, TrackTable};
use crate::undistort::CameraProfile;

/// Inconsistencies between a reconstruction and the observations it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// A reconstructed point without any finite observation.
    NoContributingCameras,
    /// A reconstructed point with a single finite observation.
    TooFewCameras,
    /// A reprojection error of exactly zero.
    ExactZeroError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anomaly {
    pub track: usize,
    pub frame: usize,
    pub kind: AnomalyKind,
}

/// Squared pixel residuals of one point, summed over cameras.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Residuals {
    pub sum_squares: f64,
    pub cameras: usize,
}

impl Residuals {
    pub fn degrees_of_freedom(&self) -> f64 {
        (2 * self.cameras) as f64 - 3.0
    }

    pub fn rms(&self) -> f64 {
        (self.sum_squares / self.degrees_of_freedom()).sqrt()
    }
}

pub fn point_residuals(
    xyz: &na::Point3<f64>,
    views: &[View],
    dlt: &[DltCoefficients],
) -> Residuals {
    views
        .iter()
        .filter_map(|(cam, observed)| {
            let reprojected = dlt.get(*cam)?.project(xyz)?;
            Some((observed - reprojected).norm_squared())
        })
        .fold(
            Residuals {
                sum_squares: 0.0,
                cameras: 0,
            },
            |acc, sq| Residuals {
                sum_squares: acc.sum_squares + sq,
                cameras: acc.cameras + 1,
            },
        )
}

/// Reprojection error of a single point, or the reason it is undefined.
pub fn point_error(
    xyz: &na::Point3<f64>,
    views: &[View],
    dlt: &[DltCoefficients],
) -> Result<f64, AnomalyKind> {
    let residuals = point_residuals(xyz, views, dlt);
    match residuals.cameras {
        0 => Err(AnomalyKind::NoContributingCameras),
        1 => Err(AnomalyKind::TooFewCameras),
        _ => {
            let error = residuals.rms();
            if error == 0.0 {
                Err(AnomalyKind::ExactZeroError)
            } else {
                Ok(error)
            }
        }
    }
}

/// Per-frame errors of one track. `points` and `observations` are frame-aligned.
///
/// Anomalies are returned with `track` set to `track`, not logged.
pub fn track_errors(
    track: usize,
    points: &[Option<na::Point3<f64>>],
    observations: &na::DMatrixView<'_, f64>,
    dlt: &[DltCoefficients],
    profiles: Option<&[CameraProfile]>,
) -> Result<(Vec<Option<f64>>, Vec<Anomaly>), DltError> {
    check_camera_count(observations.ncols(), dlt.len(), profiles)?;
    let mut anomalies = Vec::new();
    let errors = points
        .iter()
        .enumerate()
        .map(|(frame, xyz)| {
            let xyz = xyz.as_ref()?;
            let views = frame_views(observations, frame, profiles);
            point_error(xyz, &views, dlt)
                .map_err(|kind| anomalies.push(Anomaly { track, frame, kind }))
                .ok()
        })
        .collect();
    Ok((errors, anomalies))
}

/// Errors of every track of a table, indexed `[track][frame]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectionErrors {
    pub errors: Vec<Vec<Option<f64>>>,
    pub anomalies: Vec<Anomaly>,
}

/// Reprojection errors for all tracks. `points` is indexed `[track][frame]`.
pub fn reprojection_errors(
    points: &[Vec<Option<na::Point3<f64>>>],
    observations: &TrackTable,
    dlt: &[DltCoefficients],
    profiles: Option<&[CameraProfile]>,
) -> Result<ReprojectionErrors, DltError> {
    if points.len() != observations.track_names().len() {
        return Err(DltError::TrackCountMismatch {
            expected: observations.track_names().len(),
            found: points.len(),
        });
    }
    let mut errors = Vec::with_capacity(points.len());
    let mut anomalies = Vec::new();
    for (track, track_points) in points.iter().enumerate() {
        let (e, a) = track_errors(
            track,
            track_points,
            &observations.track(track),
            dlt,
            profiles,
        )?;
        errors.push(e);
        anomalies.extend(a);
    }
    log_anomalies(&anomalies, observations.track_names());
    Ok(ReprojectionErrors { errors, anomalies })
}

pub fn log_anomalies(anomalies: &[Anomaly], track_names: &[String]) {
    for anomaly in anomalies {
        let name = track_names
            .get(anomaly.track)
            .map(String::as_str)
            .unwrap_or("?");
        warn!(
            "inconsistent reconstruction of {} at frame {}: {:?}",
            name, anomaly.frame, anomaly.kind
        );
    }
}
