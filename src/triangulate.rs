use log::debug;
use nalgebra as na;

use crate::error::DltError;
use crate::types::{finite_pair, DltCoefficients};
use crate::undistort::{undistort_with, CameraProfile};

/// Observation of one point by one camera: `(camera index, pixel)`.
pub type View = (usize, na::Point2<f64>);

/// Cameras with a finite observation in `frame`, undistorted when profiles
/// are supplied. `observations` has `2 * camera_count` columns.
pub fn frame_views(
    observations: &na::DMatrixView<'_, f64>,
    frame: usize,
    profiles: Option<&[CameraProfile]>,
) -> Vec<View> {
    (0..observations.ncols() / 2)
        .filter_map(|cam| {
            let uv = finite_pair(
                observations[(frame, 2 * cam)],
                observations[(frame, 2 * cam + 1)],
            )?;
            let uv = undistort_with(profiles, cam, uv);
            finite_pair(uv.x, uv.y).map(|uv| (cam, uv))
        })
        .collect()
}

/// Linear least-squares intersection of the rays of two or more views.
///
/// Each view contributes the rows
/// `(u L8 - L0, u L9 - L1, u L10 - L2) . xyz = L3 - u` and
/// `(v L8 - L4, v L9 - L5, v L10 - L6) . xyz = L7 - v`.
/// Returns `None` for fewer than two views, and for solutions with a
/// coordinate of exactly zero, which only come out of failed solves.
pub fn triangulate_views(dlt: &[DltCoefficients], views: &[View]) -> Option<na::Point3<f64>> {
    if views.len() < 2 {
        return None;
    }
    let mut a = na::DMatrix::<f64>::zeros(2 * views.len(), 3);
    let mut b = na::DVector::<f64>::zeros(2 * views.len());
    for (i, (cam, uv)) in views.iter().enumerate() {
        let l = dlt.get(*cam)?;
        let w = l.w_row();
        a.row_mut(2 * i).copy_from(&(uv.x * w - l.u_row()).transpose());
        a.row_mut(2 * i + 1)
            .copy_from(&(uv.y * w - l.v_row()).transpose());
        b[2 * i] = l[3] - uv.x;
        b[2 * i + 1] = l[7] - uv.y;
    }
    // the SVD does not terminate on non-finite input
    if !a.iter().chain(b.iter()).all(|v| v.is_finite()) {
        debug!("discarding system with non-finite coefficients");
        return None;
    }

    let svd = a.svd(true, true);
    let eps = f64::EPSILON * svd.singular_values.max();
    let xyz = svd.solve(&b, eps).ok()?;
    if xyz.iter().any(|&v| v == 0.0 || !v.is_finite()) {
        debug!("discarding degenerate solution {:?}", xyz.as_slice());
        return None;
    }
    Some(na::Point3::new(xyz[0], xyz[1], xyz[2]))
}

/// Triangulate one track in every frame.
///
/// `observations` is `frames x (2 * camera_count)`, `dlt` holds one vector per
/// camera. Frames seen by fewer than two cameras come back as `None`.
pub fn triangulate(
    observations: &na::DMatrixView<'_, f64>,
    dlt: &[DltCoefficients],
    profiles: Option<&[CameraProfile]>,
) -> Result<Vec<Option<na::Point3<f64>>>, DltError> {
    check_camera_count(observations.ncols(), dlt.len(), profiles)?;
    Ok((0..observations.nrows())
        .map(|frame| {
            let views = frame_views(observations, frame, profiles);
            triangulate_views(dlt, &views)
        })
        .collect())
}

pub(crate) fn check_camera_count(
    columns: usize,
    cameras: usize,
    profiles: Option<&[CameraProfile]>,
) -> Result<(), DltError> {
    if columns != 2 * cameras {
        return Err(DltError::CameraCountMismatch {
            expected: cameras,
            found: columns / 2,
        });
    }
    if let Some(profiles) = profiles {
        if profiles.len() != cameras {
            return Err(DltError::CameraCountMismatch {
                expected: cameras,
                found: profiles.len(),
            });
        }
    }
    Ok(())
}
