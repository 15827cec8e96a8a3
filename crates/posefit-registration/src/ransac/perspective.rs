use posefit_geometry::{CameraIntrinsics, RigidTransform};
use rand::Rng;

use super::{ransac, ConsensusEstimator, RansacParams, RansacResult};
use crate::error::{check_lengths, RegistrationError};
use crate::ops::gather;
use crate::pnp::epnp::{solve_epnp_normalized, EPnPParams, MIN_CORRESPONDENCES};
use crate::residual::point_reprojection_error;

/// 2D-3D correspondences scored by reprojection error in pixels.
#[derive(Debug, Clone)]
pub struct PerspectiveEstimator<'a> {
    object_points: &'a [[f64; 3]],
    image_points: &'a [[f64; 2]],
    normalized: Vec<[f64; 2]>,
    intrinsics: &'a CameraIntrinsics,
    epnp: EPnPParams,
}

impl<'a> PerspectiveEstimator<'a> {
    /// Pair `object_points` with `image_points` index by index.
    ///
    /// Pixels are undistorted once up front.
    pub fn new(
        object_points: &'a [[f64; 3]],
        image_points: &'a [[f64; 2]],
        intrinsics: &'a CameraIntrinsics,
        epnp: EPnPParams,
    ) -> Result<Self, RegistrationError> {
        check_lengths("object points", object_points, "image points", image_points)?;
        intrinsics.validate()?;
        let normalized = image_points
            .iter()
            .map(|uv| intrinsics.undistort_pixel(uv))
            .collect();
        Ok(Self {
            object_points,
            image_points,
            normalized,
            intrinsics,
            epnp,
        })
    }
}

impl ConsensusEstimator for PerspectiveEstimator<'_> {
    fn min_sample_size(&self) -> usize {
        MIN_CORRESPONDENCES
    }

    fn len(&self) -> usize {
        self.object_points.len()
    }

    fn fit(&self, indices: &[usize]) -> Result<RigidTransform, RegistrationError> {
        let pose = solve_epnp_normalized(
            &gather(self.object_points, indices),
            &gather(&self.normalized, indices),
            &gather(self.image_points, indices),
            self.intrinsics,
            &self.epnp,
        )?;
        Ok(pose.transform)
    }

    fn residual(&self, model: &RigidTransform, index: usize) -> f64 {
        point_reprojection_error(
            model,
            self.intrinsics,
            &self.object_points[index],
            &self.image_points[index],
        )
    }
}

/// Robustly estimate the pose mapping `object_points` into the camera frame from their
/// observed pixels.
///
/// Minimal samples and the final consensus set are both solved with EPnP (at least 4
/// correspondences); residuals are reprojection errors in pixels, infinite for points that
/// land behind the camera.
///
/// # Arguments
///
/// * `object_points` - 3-D model points.
/// * `image_points` - Observed pixels, index-aligned with `object_points`.
/// * `intrinsics` - Camera matrix and optional distortion.
/// * `params` - Iteration budget, sample size (at least 4), pixel threshold and minimum inliers.
/// * `epnp` - Solver parameters, including the optional LM refinement.
/// * `rng` - Random source driving the sampling.
pub fn estimate_perspective_transform_ransac<R: Rng + ?Sized>(
    object_points: &[[f64; 3]],
    image_points: &[[f64; 2]],
    intrinsics: &CameraIntrinsics,
    params: &RansacParams,
    epnp: &EPnPParams,
    rng: &mut R,
) -> Result<RansacResult, RegistrationError> {
    let estimator = PerspectiveEstimator::new(object_points, image_points, intrinsics, *epnp)?;
    ransac(&estimator, params, rng)
}
