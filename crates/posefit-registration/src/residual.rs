//! Per-correspondence transfer errors of a candidate transform.

use posefit_geometry::{CameraIntrinsics, RigidTransform};

use crate::error::{check_lengths, RegistrationError};

/// Euclidean distance between `tf(src)` and `dst`.
#[inline]
pub fn point_transfer_error(tf: &RigidTransform, src: &[f64; 3], dst: &[f64; 3]) -> f64 {
    let p = tf.apply(src);
    let dx = p[0] - dst[0];
    let dy = p[1] - dst[1];
    let dz = p[2] - dst[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Pixel distance between the projection of `tf(object)` and the observed `pixel`.
///
/// Returns `f64::INFINITY` when the transformed point is not in front of the camera.
#[inline]
pub fn point_reprojection_error(
    tf: &RigidTransform,
    intrinsics: &CameraIntrinsics,
    object: &[f64; 3],
    pixel: &[f64; 2],
) -> f64 {
    match intrinsics.project(&tf.apply(object)) {
        Some(uv) => {
            let du = uv[0] - pixel[0];
            let dv = uv[1] - pixel[1];
            (du * du + dv * dv).sqrt()
        }
        None => f64::INFINITY,
    }
}

/// Euclidean transfer error of every 3D-3D correspondence.
///
/// # Arguments
///
/// * `tf` - Candidate transform mapping `src` into the frame of `dst`.
/// * `src` - Source points.
/// * `dst` - Destination points, index-aligned with `src`.
///
/// # Returns
///
/// One residual per correspondence, `‖R·src_i + t − dst_i‖`.
pub fn transfer_error_3d(
    tf: &RigidTransform,
    src: &[[f64; 3]],
    dst: &[[f64; 3]],
) -> Result<Vec<f64>, RegistrationError> {
    check_lengths("source points", src, "destination points", dst)?;
    Ok(src
        .iter()
        .zip(dst.iter())
        .map(|(s, d)| point_transfer_error(tf, s, d))
        .collect())
}

/// Reprojection error of every 2D-3D correspondence, in pixels.
///
/// Points behind the camera get an infinite residual.
pub fn reprojection_error(
    tf: &RigidTransform,
    intrinsics: &CameraIntrinsics,
    object_points: &[[f64; 3]],
    image_points: &[[f64; 2]],
) -> Result<Vec<f64>, RegistrationError> {
    check_lengths("object points", object_points, "image points", image_points)?;
    intrinsics.validate()?;
    Ok(object_points
        .iter()
        .zip(image_points.iter())
        .map(|(p, uv)| point_reprojection_error(tf, intrinsics, p, uv))
        .collect())
}

/// Root mean square of `residuals` over `indices`.
///
/// Indices past the end of `residuals` are skipped. Returns 0 when no index is in range.
pub fn rmse(residuals: &[f64], indices: &[usize]) -> f64 {
    let (count, sum_sq) = indices
        .iter()
        .filter_map(|&i| residuals.get(i))
        .fold((0usize, 0.0), |(count, sum), r| (count + 1, sum + r * r));
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}
