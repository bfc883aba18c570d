use log::{info, warn};
use nalgebra as na;
use rayon::prelude::*;

use crate::camera_model::{decompose, flip_vertical};
use crate::error::DltError;
use crate::reprojection::{log_anomalies, track_errors, Anomaly};
use crate::triangulate::{check_camera_count, triangulate};
use crate::types::{CameraPose, DltCoefficients, TrackTable};
use crate::undistort::CameraProfile;

#[derive(Debug, Clone, Default)]
pub struct ReconstructOptions {
    /// Image height of every camera. When set, coefficients and observations
    /// are switched between lower-left and upper-left image origins.
    pub flip_heights: Option<Vec<f64>>,
    /// Process tracks on the rayon thread pool.
    pub parallel: bool,
}

/// 3D points and reprojection errors of every track, indexed `[track][frame]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub track_names: Vec<String>,
    pub points: Vec<Vec<Option<na::Point3<f64>>>>,
    pub errors: Vec<Vec<Option<f64>>>,
    pub anomalies: Vec<Anomaly>,
}

impl Reconstruction {
    pub fn frame_count(&self) -> usize {
        self.points.first().map_or(0, Vec::len)
    }

    /// `{track}_X, {track}_Y, {track}_Z` for every track, in input order.
    pub fn xyz_columns(&self) -> Vec<String> {
        self.track_names
            .iter()
            .flat_map(|name| ["X", "Y", "Z"].map(|axis| format!("{}_{}", name, axis)))
            .collect()
    }

    /// `frames x (3 * tracks)`, NaN where a point is undefined.
    pub fn xyz_matrix(&self) -> na::DMatrix<f64> {
        let mut m = na::DMatrix::from_element(self.frame_count(), 3 * self.points.len(), f64::NAN);
        for (track, points) in self.points.iter().enumerate() {
            for (frame, p) in points.iter().enumerate() {
                if let Some(p) = p {
                    m.fixed_view_mut::<1, 3>(frame, 3 * track)
                        .copy_from(&p.coords.transpose());
                }
            }
        }
        m
    }

    /// `frames x tracks`, NaN where an error is undefined.
    pub fn error_matrix(&self) -> na::DMatrix<f64> {
        na::DMatrix::from_fn(self.frame_count(), self.errors.len(), |frame, track| {
            self.errors[track][frame].unwrap_or(f64::NAN)
        })
    }

    pub fn reconstructed_frames(&self, track: usize) -> usize {
        self.points[track].iter().flatten().count()
    }

    pub fn mean_error(&self, track: usize) -> Option<f64> {
        let defined: Vec<f64> = self.errors[track].iter().flatten().copied().collect();
        if defined.is_empty() {
            None
        } else {
            Some(defined.iter().sum::<f64>() / defined.len() as f64)
        }
    }
}

type TrackResult = (Vec<Option<na::Point3<f64>>>, Vec<Option<f64>>, Vec<Anomaly>);

/// Replace every camera's v-coordinate with `height - v`.
pub fn flip_observations(table: &mut TrackTable, heights: &[f64]) -> Result<(), DltError> {
    let cameras = table.camera_count();
    if heights.len() != cameras {
        return Err(DltError::HeightCountMismatch {
            expected: cameras,
            found: heights.len(),
        });
    }
    let tracks = table.track_names().len();
    let data = table.data_mut();
    for track in 0..tracks {
        for (cam, height) in heights.iter().enumerate() {
            let col = track * 2 * cameras + 2 * cam + 1;
            data.column_mut(col).apply(|v| *v = height - *v);
        }
    }
    Ok(())
}

/// Triangulates whole track tables against one calibration.
pub struct Reconstructor {
    dlt: Vec<DltCoefficients>,
    poses: Vec<Option<CameraPose>>,
    disabled: Vec<usize>,
    profiles: Option<Vec<CameraProfile>>,
    options: ReconstructOptions,
}

impl Reconstructor {
    pub fn new(
        dlt: Vec<DltCoefficients>,
        profiles: Option<Vec<CameraProfile>>,
        options: ReconstructOptions,
    ) -> Result<Reconstructor, DltError> {
        if let Some(profiles) = &profiles {
            if profiles.len() != dlt.len() {
                return Err(DltError::CameraCountMismatch {
                    expected: dlt.len(),
                    found: profiles.len(),
                });
            }
        }

        let mut disabled = Vec::new();
        let dlt = match &options.flip_heights {
            None => dlt,
            Some(heights) => {
                if heights.len() != dlt.len() {
                    return Err(DltError::HeightCountMismatch {
                        expected: dlt.len(),
                        found: heights.len(),
                    });
                }
                dlt.iter()
                    .zip(heights)
                    .enumerate()
                    .map(|(cam, (coefs, &height))| match flip_vertical(coefs, height) {
                        Ok(flipped) => flipped,
                        Err(e) => {
                            warn!("{}, its observations are ignored", e.for_camera(cam));
                            disabled.push(cam);
                            *coefs
                        }
                    })
                    .collect()
            }
        };

        let poses = dlt
            .iter()
            .enumerate()
            .map(|(cam, coefs)| match decompose(coefs) {
                Ok(pose) => {
                    info!(
                        "camera {} at ({:.3}, {:.3}, {:.3}), principal point ({:.1}, {:.1})",
                        cam,
                        pose.position.x,
                        pose.position.y,
                        pose.position.z,
                        pose.principal_point.x,
                        pose.principal_point.y
                    );
                    Some(pose)
                }
                Err(e) => {
                    warn!("{}", e.for_camera(cam));
                    None
                }
            })
            .collect();

        Ok(Reconstructor {
            dlt,
            poses,
            disabled,
            profiles,
            options,
        })
    }

    /// Coefficients in the convention of the observations, flipped if requested.
    pub fn coefficients(&self) -> &[DltCoefficients] {
        &self.dlt
    }

    /// Decomposed cameras, `None` where the calibration is degenerate.
    pub fn poses(&self) -> &[Option<CameraPose>] {
        &self.poses
    }

    /// Cameras whose coefficients could not be flipped.
    pub fn disabled_cameras(&self) -> &[usize] {
        &self.disabled
    }

    pub fn process(&self, observations: &TrackTable) -> Result<Reconstruction, DltError> {
        let profiles = self.profiles.as_deref();
        check_camera_count(2 * observations.camera_count(), self.dlt.len(), profiles)?;

        let mut table = observations.clone();
        if let Some(heights) = &self.options.flip_heights {
            flip_observations(&mut table, heights)?;
        }
        self.mask_disabled(&mut table);

        let track_count = table.track_names().len();
        info!(
            "reconstructing {} tracks over {} frames from {} cameras",
            track_count,
            table.frame_count(),
            self.dlt.len()
        );

        let run = |track: usize| self.process_track(&table, track, profiles);
        let per_track: Result<Vec<_>, DltError> = if self.options.parallel {
            (0..track_count).into_par_iter().map(run).collect()
        } else {
            (0..track_count).map(run).collect()
        };

        let mut points = Vec::with_capacity(track_count);
        let mut errors = Vec::with_capacity(track_count);
        let mut anomalies = Vec::new();
        for (p, e, a) in per_track? {
            points.push(p);
            errors.push(e);
            anomalies.extend(a);
        }
        log_anomalies(&anomalies, table.track_names());

        Ok(Reconstruction {
            track_names: table.track_names().to_vec(),
            points,
            errors,
            anomalies,
        })
    }

    fn process_track(
        &self,
        table: &TrackTable,
        track: usize,
        profiles: Option<&[CameraProfile]>,
    ) -> Result<TrackResult, DltError> {
        let observations = table.track(track);
        let points = triangulate(&observations, &self.dlt, profiles)?;
        let (errors, anomalies) = track_errors(track, &points, &observations, &self.dlt, profiles)?;
        Ok((points, errors, anomalies))
    }

    fn mask_disabled(&self, table: &mut TrackTable) {
        let cameras = table.camera_count();
        let tracks = table.track_names().len();
        let data = table.data_mut();
        for track in 0..tracks {
            for &cam in &self.disabled {
                let col = track * 2 * cameras + 2 * cam;
                data.columns_mut(col, 2).fill(f64::NAN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_model::flip_coefficient_table;
    use approx::assert_relative_eq;

    fn rig() -> Vec<DltCoefficients> {
        [
            na::Point3::new(3.0, 0.5, 1.0),
            na::Point3::new(-0.5, 3.0, 1.2),
            na::Point3::new(-2.5, -2.0, 0.8),
        ]
        .iter()
        .map(|center| {
            let rotation = na::Rotation3::look_at_lh(&(-center.coords), &na::Vector3::z());
            let k = na::Matrix3::new(-1000.0, 0.0, 640.0, 0.0, -1000.0, 360.0, 0.0, 0.0, 1.0);
            DltCoefficients::from_camera(&k, rotation.matrix(), center).unwrap()
        })
        .collect()
    }

    fn table(dlt: &[DltCoefficients], tracks: &[Vec<na::Point3<f64>>]) -> TrackTable {
        let frames = tracks[0].len();
        let cams = dlt.len();
        let mut data = na::DMatrix::zeros(frames, tracks.len() * 2 * cams);
        for (t, points) in tracks.iter().enumerate() {
            for (f, p) in points.iter().enumerate() {
                for (c, l) in dlt.iter().enumerate() {
                    let uv = l.project(p).unwrap();
                    data[(f, t * 2 * cams + 2 * c)] = uv.x;
                    data[(f, t * 2 * cams + 2 * c + 1)] = uv.y;
                }
            }
        }
        let names = (0..tracks.len()).map(|t| format!("pt{}", t + 1)).collect();
        TrackTable::new(names, cams, data).unwrap()
    }

    fn tracks() -> Vec<Vec<na::Point3<f64>>> {
        vec![
            vec![na::Point3::new(0.1, 0.2, 0.3), na::Point3::new(0.15, 0.2, 0.25)],
            vec![na::Point3::new(-0.2, 0.1, 0.05), na::Point3::new(-0.25, 0.05, 0.1)],
        ]
    }

    #[test]
    fn batch_reconstruction_keeps_track_order() {
        let dlt = rig();
        let truth = tracks();
        let mut obs = table(&dlt, &truth);
        // second track, second frame: only camera 2 left
        for c in 0..4 {
            obs.data_mut()[(1, 6 + c)] = f64::NAN;
        }

        for parallel in [false, true] {
            let options = ReconstructOptions {
                flip_heights: None,
                parallel,
            };
            let rec = Reconstructor::new(dlt.clone(), None, options)
                .unwrap()
                .process(&obs)
                .unwrap();

            assert_eq!(rec.track_names, vec!["pt1", "pt2"]);
            assert_eq!(rec.xyz_columns()[3], "pt2_X");
            assert_relative_eq!(rec.points[0][1].unwrap(), truth[0][1], epsilon = 1e-8);
            assert_relative_eq!(rec.points[1][0].unwrap(), truth[1][0], epsilon = 1e-8);
            assert!(rec.points[1][1].is_none());
            assert_eq!(rec.reconstructed_frames(1), 1);

            let xyz = rec.xyz_matrix();
            assert_eq!(xyz.shape(), (2, 6));
            assert!(xyz[(1, 3)].is_nan());
            let err = rec.error_matrix();
            assert_eq!(err.shape(), (2, 2));
            assert!(err[(1, 1)].is_nan());
            assert!(rec.mean_error(0).map_or(true, |e| e < 1e-6));
        }
    }

    #[test]
    fn flipped_convention_reconstructs_same_points() {
        let heights = vec![720.0, 720.0, 1080.0];
        let truth = tracks();
        let dlt = rig();
        // calibration and digitized points both in the other image origin
        let flipped_dlt = flip_coefficient_table(&dlt, &heights).unwrap();
        let mut obs = table(&dlt, &truth);
        flip_observations(&mut obs, &heights).unwrap();

        let options = ReconstructOptions {
            flip_heights: Some(heights),
            parallel: false,
        };
        let reconstructor = Reconstructor::new(flipped_dlt, None, options).unwrap();
        assert!(reconstructor.disabled_cameras().is_empty());
        for (a, b) in reconstructor.coefficients().iter().zip(&dlt) {
            for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
                assert_relative_eq!(*x, *y, epsilon = 1e-9, max_relative = 1e-9);
            }
        }

        let rec = reconstructor.process(&obs).unwrap();
        assert_relative_eq!(rec.points[1][1].unwrap(), truth[1][1], epsilon = 1e-7);
    }

    #[test]
    fn degenerate_camera_is_skipped_not_fatal() {
        let mut dlt = rig();
        let truth = tracks();
        let obs = table(&dlt, &truth);
        dlt[2] = DltCoefficients::new(na::SVector::zeros());

        let options = ReconstructOptions {
            flip_heights: Some(vec![0.0, 0.0, 0.0]),
            parallel: false,
        };
        let mut flipped = obs.clone();
        flip_observations(&mut flipped, &[0.0, 0.0, 0.0]).unwrap();
        let mut coefs = flip_coefficient_table(&dlt[..2], &[0.0, 0.0]).unwrap();
        coefs.push(dlt[2]);

        let reconstructor = Reconstructor::new(coefs, None, options).unwrap();
        assert_eq!(reconstructor.disabled_cameras(), &[2]);
        assert!(reconstructor.poses()[2].is_none());

        let rec = reconstructor.process(&flipped).unwrap();
        assert_relative_eq!(rec.points[0][0].unwrap(), truth[0][0], epsilon = 1e-7);
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let dlt = rig();
        let options = ReconstructOptions {
            flip_heights: Some(vec![480.0]),
            parallel: false,
        };
        assert!(matches!(
            Reconstructor::new(dlt.clone(), None, options),
            Err(DltError::HeightCountMismatch { .. })
        ));

        let reconstructor = Reconstructor::new(dlt[..2].to_vec(), None, Default::default()).unwrap();
        let obs = table(&dlt, &tracks());
        assert_eq!(
            reconstructor.process(&obs),
            Err(DltError::CameraCountMismatch {
                expected: 2,
                found: 3
            })
        );
    }
}
