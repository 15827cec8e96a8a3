use posefit_geometry::RigidTransform;
use rand::Rng;

use super::{ransac, ConsensusEstimator, RansacParams, RansacResult};
use crate::error::{check_lengths, RegistrationError};
use crate::ops::gather;
use crate::residual::point_transfer_error;
use crate::rigid::{estimate_rigid_transform, MIN_POINTS};

/// 3D-3D correspondences scored by Euclidean transfer error.
#[derive(Debug, Clone, Copy)]
pub struct PointToPointEstimator<'a> {
    src: &'a [[f64; 3]],
    dst: &'a [[f64; 3]],
}

impl<'a> PointToPointEstimator<'a> {
    /// Pair `src` with `dst` index by index.
    pub fn new(src: &'a [[f64; 3]], dst: &'a [[f64; 3]]) -> Result<Self, RegistrationError> {
        check_lengths("source points", src, "destination points", dst)?;
        Ok(Self { src, dst })
    }
}

impl ConsensusEstimator for PointToPointEstimator<'_> {
    fn min_sample_size(&self) -> usize {
        MIN_POINTS
    }

    fn len(&self) -> usize {
        self.src.len()
    }

    fn fit(&self, indices: &[usize]) -> Result<RigidTransform, RegistrationError> {
        estimate_rigid_transform(&gather(self.src, indices), &gather(self.dst, indices))
    }

    fn residual(&self, model: &RigidTransform, index: usize) -> f64 {
        point_transfer_error(model, &self.src[index], &self.dst[index])
    }
}

/// Robustly estimate the rigid transform mapping `src` onto `dst`.
///
/// Minimal samples and the final consensus set are both solved in closed form; residuals are
/// Euclidean distances in the units of the points.
///
/// # Arguments
///
/// * `src` - Source points.
/// * `dst` - Destination points, index-aligned with `src`.
/// * `params` - Iteration budget, sample size (at least 3), threshold and minimum inliers.
/// * `rng` - Random source driving the sampling.
pub fn estimate_rigid_transform_ransac<R: Rng + ?Sized>(
    src: &[[f64; 3]],
    dst: &[[f64; 3]],
    params: &RansacParams,
    rng: &mut R,
) -> Result<RansacResult, RegistrationError> {
    let estimator = PointToPointEstimator::new(src, dst)?;
    ransac(&estimator, params, rng)
}
