//! Generic sample-consensus estimation of rigid transforms.

use posefit_geometry::RigidTransform;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Degeneracy, ParameterError, RegistrationError};

mod perspective;
mod point_to_point;

pub use perspective::{estimate_perspective_transform_ransac, PerspectiveEstimator};
pub use point_to_point::{estimate_rigid_transform_ransac, PointToPointEstimator};

/// Parameters of the sample-consensus loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Number of iterations, always run to completion.
    pub iterations: usize,
    /// Number of correspondences drawn per iteration.
    pub sample_size: usize,
    /// Residual below which a correspondence is an inlier (meters or pixels).
    pub threshold: f64,
    /// Minimum consensus size to accept a model.
    pub min_inliers: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            iterations: 1000,
            sample_size: 3,
            threshold: 0.01,
            min_inliers: 3,
        }
    }
}

impl RansacParams {
    /// Check the parameters against a fitter that needs `min_sample_size` correspondences.
    pub fn validate(&self, min_sample_size: usize) -> Result<(), ParameterError> {
        if self.iterations == 0 {
            return Err(ParameterError::ZeroIterations);
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(ParameterError::InvalidThreshold(self.threshold));
        }
        if self.sample_size < min_sample_size {
            return Err(ParameterError::SampleSizeTooSmall {
                minimum: min_sample_size,
                actual: self.sample_size,
            });
        }
        Ok(())
    }
}

/// Outcome of a successful RANSAC run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RansacResult {
    /// Transform refitted over the whole consensus set.
    pub transform: RigidTransform,
    /// Indices of the consensus set, ascending.
    pub inliers: Vec<usize>,
    /// Root mean square residual of `transform` over `inliers`.
    pub rmse: f64,
    /// Number of iterations whose minimal fit succeeded.
    pub num_models: usize,
}

/// A model fitter and residual evaluator over an indexed correspondence list.
pub trait ConsensusEstimator {
    /// Smallest number of correspondences [`ConsensusEstimator::fit`] accepts.
    fn min_sample_size(&self) -> usize;

    /// Number of correspondences.
    fn len(&self) -> usize;

    /// Whether there are no correspondences.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fit a transform to the correspondences at `indices`.
    fn fit(&self, indices: &[usize]) -> Result<RigidTransform, RegistrationError>;

    /// Residual of correspondence `index` under `model`.
    fn residual(&self, model: &RigidTransform, index: usize) -> f64;
}

/// Run the sample-consensus loop for `params.iterations` iterations.
///
/// Each iteration draws `params.sample_size` distinct indices uniformly from `rng`, fits a
/// candidate and counts the correspondences with a residual strictly below
/// `params.threshold`. A candidate replaces the best one only with strictly more inliers, so
/// the first model found wins ties. Samples the fitter rejects are skipped.
///
/// The winning consensus set is refitted with the same fitter.
///
/// # Errors
///
/// * `InvalidParameter` for a zero iteration budget, a bad threshold or a sample size below
///   the fitter minimum.
/// * `DegenerateInput` when there are fewer correspondences than the sample size.
/// * `InsufficientInliers` when the best consensus set is smaller than
///   `max(params.min_inliers, estimator.min_sample_size())`.
pub fn ransac<E, R>(
    estimator: &E,
    params: &RansacParams,
    rng: &mut R,
) -> Result<RansacResult, RegistrationError>
where
    E: ConsensusEstimator + ?Sized,
    R: Rng + ?Sized,
{
    params.validate(estimator.min_sample_size())?;

    let n = estimator.len();
    if n < params.sample_size {
        return Err(Degeneracy::TooFewPoints {
            required: params.sample_size,
            actual: n,
        }
        .into());
    }

    let mut best_model: Option<RigidTransform> = None;
    let mut best_inliers: Vec<usize> = Vec::new();
    let mut num_models = 0;
    let mut inliers = Vec::with_capacity(n);

    for iter in 0..params.iterations {
        let sample = rand::seq::index::sample(rng, n, params.sample_size).into_vec();

        let model = match estimator.fit(&sample) {
            Ok(model) => model,
            Err(e) => {
                log::trace!("ransac iter {iter}: skipping sample {sample:?}: {e}");
                continue;
            }
        };
        num_models += 1;

        inliers.clear();
        inliers.extend((0..n).filter(|&i| estimator.residual(&model, i) < params.threshold));

        if inliers.len() > best_inliers.len() {
            log::trace!("ransac iter {iter}: new best with {} inliers", inliers.len());
            std::mem::swap(&mut best_inliers, &mut inliers);
            best_model = Some(model);
        }
    }

    let required = params.min_inliers.max(estimator.min_sample_size());
    let best_model = match best_model {
        Some(model) if best_inliers.len() >= required => model,
        _ => {
            log::debug!(
                "ransac: best consensus {} of {} is below the required {}",
                best_inliers.len(),
                n,
                required
            );
            return Err(RegistrationError::InsufficientInliers {
                required,
                found: best_inliers.len(),
            });
        }
    };

    let transform = match estimator.fit(&best_inliers) {
        Ok(refined) => refined,
        Err(e) => {
            log::debug!("ransac: refit over {} inliers failed: {e}", best_inliers.len());
            best_model
        }
    };

    let sum_sq: f64 = best_inliers
        .iter()
        .map(|&i| {
            let r = estimator.residual(&transform, i);
            r * r
        })
        .sum();
    let rmse = (sum_sq / best_inliers.len() as f64).sqrt();

    log::debug!(
        "ransac: {} inliers of {}, {} models in {} iterations, rmse {:.6}",
        best_inliers.len(),
        n,
        num_models,
        params.iterations,
        rmse
    );

    Ok(RansacResult {
        transform,
        inliers: best_inliers,
        rmse,
        num_models,
    })
}
