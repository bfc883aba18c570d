//! Conversion between DLT coefficient vectors and explicit pinhole cameras.
//!
//! The axes recovered from a DLT vector are rarely orthogonal, so the Euler
//! angles reported here are only an approximation of the transform. Every
//! decomposition records how far off that approximation is.

use log::warn;
use nalgebra as na;

use crate::error::DltError;
use crate::types::{CameraPose, DltCoefficients, EulerAngles, PoseWarning};

/// Back-residual above which yaw/pitch/roll no longer reproduce the transform.
pub const ORTHOGONALITY_TOLERANCE: f64 = 1e-8;

/// Decompose a DLT vector into camera position, orientation and intrinsics.
pub fn decompose(coefs: &DltCoefficients) -> Result<CameraPose, DltError> {
    let degenerate = DltError::DegenerateCalibration { camera: None };
    let l = coefs;

    let m1 = na::Matrix3::new(
        l[0], l[1], l[2], //
        l[4], l[5], l[6], //
        l[8], l[9], l[10],
    );
    let m2 = na::Vector3::new(-l[3], -l[7], -1.0);
    let xyz = m1.try_inverse().ok_or(degenerate.clone())? * m2;
    if !xyz.iter().all(|v| v.is_finite()) {
        return Err(degenerate);
    }

    let w = coefs.w_row();
    let d = 1.0 / w.norm();
    let d2 = d * d;

    let uo = d2 * coefs.u_row().dot(&w);
    let vo = d2 * coefs.v_row().dot(&w);

    let u_axis = uo * w - coefs.u_row();
    let v_axis = vo * w - coefs.v_row();
    let du = (u_axis.norm_squared() * d2).sqrt();
    let dv = (v_axis.norm_squared() * d2).sqrt();
    if !(du > 0.0 && dv > 0.0) {
        return Err(degenerate);
    }

    let z = -0.5 * (du + dv);

    let mut t3 = na::Matrix3::from_rows(&[
        (u_axis / du).transpose(),
        (v_axis / dv).transpose(),
        w.transpose(),
    ]) * d;

    // the sign of the recovered frame is ambiguous, keep it right-handed
    if t3.determinant() < 0.0 {
        t3 = -t3;
    }
    let rotation_vector = rotation_vector(&t3);

    let t3_inv = t3.try_inverse().ok_or(degenerate)?;
    let mut transform = na::Matrix4::identity();
    transform.fixed_view_mut::<3, 3>(0, 0).copy_from(&t3_inv);
    transform
        .fixed_view_mut::<1, 3>(3, 0)
        .copy_from(&xyz.transpose());

    let yaw = transform[(1, 0)].atan2(transform[(0, 0)]);
    let pitch = (-transform[(2, 0)]).atan2(transform[(2, 1)].hypot(transform[(2, 2)]));
    let roll = transform[(2, 1)].atan2(transform[(2, 2)]);

    let mut warnings = Vec::new();
    let residual = (yaw.cos() * pitch.cos() - transform[(0, 0)]).abs();
    if residual > ORTHOGONALITY_TOLERANCE {
        warn!(
            "camera axes are not orthogonal (residual {:e}), yaw/pitch/roll are approximate",
            residual
        );
        warnings.push(PoseWarning::NonOrthogonalAxes { residual });
    }

    Ok(CameraPose {
        position: na::Point3::from(xyz),
        transform,
        rotation: t3,
        rotation_vector,
        euler: EulerAngles {
            yaw: yaw.to_degrees(),
            pitch: pitch.to_degrees(),
            roll: roll.to_degrees(),
        },
        principal_point: na::Point2::new(uo, vo),
        scale: z,
        warnings,
    })
}

/// Rebuild a DLT vector from a decomposed camera, with the principal point's
/// v-coordinate moved by `v_shift`.
///
/// The product `K [I|0] [R | tv]` is normalized by its last entry, and the
/// `0..3` and `7..11` blocks are negated to land back in the DLT convention.
pub fn recompose(pose: &CameraPose, v_shift: f64) -> Result<DltCoefficients, DltError> {
    let z = pose.scale;
    let k = na::Matrix3::new(
        z,
        0.0,
        pose.principal_point.x,
        0.0,
        z,
        pose.principal_point.y - v_shift,
        0.0,
        0.0,
        1.0,
    );
    let r = pose.transform.fixed_view::<3, 3>(0, 0).transpose();
    let tv = r * pose.position.coords;

    let mut extrinsics = na::Matrix3x4::zeros();
    extrinsics.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    extrinsics.set_column(3, &tv);

    let mut out = DltCoefficients::from_projection(&(k * extrinsics))?
        .vector()
        .to_owned();
    for i in (0..3).chain(7..11) {
        out[i] = -out[i];
    }
    Ok(DltCoefficients::new(out))
}

/// DLT vector of the same camera seen with the image's vertical axis flipped,
/// `v' = height - v`. Applying it twice with the same height is the identity.
pub fn flip_vertical(coefs: &DltCoefficients, height: f64) -> Result<DltCoefficients, DltError> {
    recompose(&decompose(coefs)?, height)
}

/// [`flip_vertical`] for every camera of a calibration.
pub fn flip_coefficient_table(
    dlt: &[DltCoefficients],
    heights: &[f64],
) -> Result<Vec<DltCoefficients>, DltError> {
    if heights.len() != dlt.len() {
        return Err(DltError::HeightCountMismatch {
            expected: dlt.len(),
            found: heights.len(),
        });
    }
    dlt.iter()
        .zip(heights)
        .enumerate()
        .map(|(cam, (coefs, &height))| {
            flip_vertical(coefs, height).map_err(|e| e.for_camera(cam))
        })
        .collect()
}

/// Rodrigues vector of the rotation closest to `m`.
fn rotation_vector(m: &na::Matrix3<f64>) -> na::Vector3<f64> {
    let svd = m.svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => na::Rotation3::from_matrix_unchecked(u * v_t).scaled_axis(),
        _ => na::Vector3::zeros(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // DLT image axes run opposite to the camera frame's x and y.
    fn dlt_camera(
        rotation: &na::Rotation3<f64>,
        center: &na::Point3<f64>,
        focal: f64,
        principal: (f64, f64),
    ) -> DltCoefficients {
        let k = na::Matrix3::new(
            -focal,
            0.0,
            principal.0,
            0.0,
            -focal,
            principal.1,
            0.0,
            0.0,
            1.0,
        );
        DltCoefficients::from_camera(&k, rotation.matrix(), center).unwrap()
    }

    fn looking_at_origin(center: &na::Point3<f64>) -> na::Rotation3<f64> {
        na::Rotation3::look_at_lh(&(-center.coords), &na::Vector3::z())
    }

    #[test]
    fn decompose_recovers_synthetic_camera() {
        let center = na::Point3::new(1.5, -2.0, 0.8);
        let rotation = looking_at_origin(&center);
        let coefs = dlt_camera(&rotation, &center, 1200.0, (640.0, 360.0));

        let pose = decompose(&coefs).unwrap();

        assert_relative_eq!(pose.position, center, epsilon = 1e-9);
        assert_relative_eq!(pose.rotation, *rotation.matrix(), epsilon = 1e-8);
        assert_relative_eq!(pose.principal_point.x, 640.0, epsilon = 1e-7);
        assert_relative_eq!(pose.principal_point.y, 360.0, epsilon = 1e-7);
        assert_relative_eq!(pose.scale, -1200.0, epsilon = 1e-7);
        assert!(pose.warnings.is_empty());
        assert_relative_eq!(
            pose.rotation_vector,
            rotation.scaled_axis(),
            epsilon = 1e-8
        );
        // bottom row carries the position, last column is homogeneous
        assert_relative_eq!(pose.transform[(3, 0)], center.x, epsilon = 1e-9);
        assert_eq!(pose.transform[(0, 3)], 0.0);
        assert_eq!(pose.transform[(3, 3)], 1.0);
    }

    #[test]
    fn euler_angles_reproduce_transform() {
        let center = na::Point3::new(-3.0, 1.0, 2.0);
        let rotation = looking_at_origin(&center);
        let pose = decompose(&dlt_camera(&rotation, &center, 900.0, (320.0, 240.0))).unwrap();

        let (yaw, pitch, roll) = (
            pose.euler.yaw.to_radians(),
            pose.euler.pitch.to_radians(),
            pose.euler.roll.to_radians(),
        );
        let rebuilt = na::Rotation3::from_euler_angles(roll, pitch, yaw);
        let expected = pose.transform.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!(*rebuilt.matrix(), expected, epsilon = 1e-9);
    }

    #[test]
    fn non_orthogonal_axes_warn_but_succeed() {
        let center = na::Point3::new(2.0, 2.0, 1.0);
        let rotation = looking_at_origin(&center);
        let k = na::Matrix3::new(-1000.0, 35.0, 500.0, 0.0, -950.0, 400.0, 0.0, 0.0, 1.0);
        let coefs = DltCoefficients::from_camera(&k, rotation.matrix(), &center).unwrap();

        let pose = decompose(&coefs).unwrap();
        assert_relative_eq!(pose.position, center, epsilon = 1e-9);
        assert!(matches!(
            pose.warnings.as_slice(),
            [PoseWarning::NonOrthogonalAxes { residual }] if *residual > ORTHOGONALITY_TOLERANCE
        ));
    }

    #[test]
    fn singular_block_is_degenerate() {
        let zeros = DltCoefficients::new(na::SVector::zeros());
        assert_eq!(
            decompose(&zeros),
            Err(DltError::DegenerateCalibration { camera: None })
        );
        // third row parallel to the first
        let mut v = na::SVector::<f64, 11>::zeros();
        v[0] = 1.0;
        v[5] = 1.0;
        v[8] = 2.0;
        assert!(decompose(&DltCoefficients::new(v)).is_err());
    }

    #[test]
    fn flip_moves_principal_point_and_mirrors_v() {
        let center = na::Point3::new(0.5, -3.0, 1.2);
        let coefs = dlt_camera(&looking_at_origin(&center), &center, 800.0, (320.0, 200.0));
        let flipped = flip_vertical(&coefs, 480.0).unwrap();

        let pose = decompose(&flipped).unwrap();
        assert_relative_eq!(pose.principal_point.y, 280.0, epsilon = 1e-7);
        assert_relative_eq!(pose.position, center, epsilon = 1e-9);

        let p = na::Point3::new(0.1, 0.2, -0.3);
        let uv = coefs.project(&p).unwrap();
        let uv_flipped = flipped.project(&p).unwrap();
        assert_relative_eq!(uv_flipped.x, uv.x, epsilon = 1e-8);
        assert_relative_eq!(uv_flipped.y, 480.0 - uv.y, epsilon = 1e-8);
    }

    #[test]
    fn flip_is_an_involution() {
        let center = na::Point3::new(-1.0, -2.5, 1.5);
        let coefs = dlt_camera(&looking_at_origin(&center), &center, 1500.0, (960.0, 540.0));
        let twice = flip_vertical(&flip_vertical(&coefs, 1080.0).unwrap(), 1080.0).unwrap();
        for (a, b) in coefs.as_slice().iter().zip(twice.as_slice()) {
            assert_relative_eq!(a, b, epsilon = 1e-9, max_relative = 1e-9);
        }
    }

    #[test]
    fn flip_table_checks_heights_and_reports_camera() {
        let center = na::Point3::new(2.0, 1.0, 1.0);
        let good = dlt_camera(&looking_at_origin(&center), &center, 800.0, (320.0, 240.0));
        let bad = DltCoefficients::new(na::SVector::zeros());

        assert_eq!(
            flip_coefficient_table(&[good, good], &[480.0]),
            Err(DltError::HeightCountMismatch {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            flip_coefficient_table(&[good, bad], &[480.0, 480.0]),
            Err(DltError::DegenerateCalibration { camera: Some(1) })
        );
        assert_eq!(flip_coefficient_table(&[good], &[480.0]).unwrap().len(), 1);
    }
}
