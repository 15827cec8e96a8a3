//! Levenberg-Marquardt pose refinement for PnP solutions.
//!
//! The pose is perturbed on the left, `R' = exp(ω)·R` and `t' = t + δt`, and the Jacobian of
//! the pixel residuals is taken by central differences.

use nalgebra::{DMatrix, DVector};
use posefit_geometry::transform::{mat_mul, rotation_vector_to_matrix};
use posefit_geometry::{CameraIntrinsics, RigidTransform};
use serde::{Deserialize, Serialize};

use super::PnPResult;
use crate::error::{check_lengths, Degeneracy, RegistrationError};

const PARAM_DIM: usize = 6;
const JACOBIAN_STEP: f64 = 1e-7;
const MAX_LAMBDA: f64 = 1e10;

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LMRefineParams {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative cost decrease.
    pub cost_tolerance: f64,
    /// Convergence threshold on gradient norm.
    pub gradient_tolerance: f64,
    /// Initial damping factor (lambda).
    pub initial_lambda: f64,
}

impl Default for LMRefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            cost_tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

impl LMRefineParams {
    /// Create default refinement parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iters: usize) -> Self {
        self.max_iterations = max_iters;
        self
    }

    /// Set cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Set gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Set initial lambda.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }
}

/// Apply the update `[ω, δt]` to a pose.
fn perturb(tf: &RigidTransform, delta: &[f64]) -> RigidTransform {
    let dr = rotation_vector_to_matrix(&[delta[0], delta[1], delta[2]]);
    RigidTransform::new(
        mat_mul(&dr, &tf.rotation),
        [
            tf.translation[0] + delta[3],
            tf.translation[1] + delta[4],
            tf.translation[2] + delta[5],
        ],
    )
}

/// Stacked pixel residuals `[u_hat - u, v_hat - v]`, `None` if a point falls behind the camera.
fn residuals(
    points_object: &[[f64; 3]],
    points_image: &[[f64; 2]],
    intrinsics: &CameraIntrinsics,
    tf: &RigidTransform,
) -> Option<DVector<f64>> {
    let mut r = DVector::<f64>::zeros(2 * points_object.len());
    for (i, (p, uv)) in points_object.iter().zip(points_image.iter()).enumerate() {
        let proj = intrinsics.project(&tf.apply(p))?;
        r[2 * i] = proj[0] - uv[0];
        r[2 * i + 1] = proj[1] - uv[1];
    }
    Some(r)
}

/// Compute numerical Jacobian using central differences.
fn numerical_jacobian(
    points_object: &[[f64; 3]],
    points_image: &[[f64; 2]],
    intrinsics: &CameraIntrinsics,
    tf: &RigidTransform,
) -> Option<DMatrix<f64>> {
    let mut jacobian = DMatrix::<f64>::zeros(2 * points_object.len(), PARAM_DIM);
    let mut delta = [0.0; PARAM_DIM];
    for k in 0..PARAM_DIM {
        delta[k] = JACOBIAN_STEP;
        let plus = residuals(points_object, points_image, intrinsics, &perturb(tf, &delta))?;
        delta[k] = -JACOBIAN_STEP;
        let minus = residuals(points_object, points_image, intrinsics, &perturb(tf, &delta))?;
        delta[k] = 0.0;
        jacobian.set_column(k, &((plus - minus) / (2.0 * JACOBIAN_STEP)));
    }
    Some(jacobian)
}

/// Refine a pose by minimizing the reprojection error with Levenberg-Marquardt.
///
/// # Arguments
///
/// * `points_object` - 3-D coordinates in the object frame.
/// * `points_image` - Observed pixel coordinates.
/// * `intrinsics` - Camera matrix and optional distortion.
/// * `initial` - Starting pose mapping object into camera coordinates.
/// * `params` - LM refinement parameters.
///
/// # Errors
///
/// * `InvalidParameter` if the slices differ in length or the focal lengths are not positive.
/// * `DegenerateInput` for an empty correspondence set.
pub fn refine_pose_lm(
    points_object: &[[f64; 3]],
    points_image: &[[f64; 2]],
    intrinsics: &CameraIntrinsics,
    initial: &RigidTransform,
    params: &LMRefineParams,
) -> Result<PnPResult, RegistrationError> {
    check_lengths("object points", points_object, "image points", points_image)?;
    intrinsics.validate()?;
    let n = points_object.len();
    if n == 0 {
        return Err(Degeneracy::TooFewPoints {
            required: 1,
            actual: 0,
        }
        .into());
    }

    let rmse = |cost: f64| (cost / n as f64).sqrt();

    let mut tf = *initial;
    let Some(mut r) = residuals(points_object, points_image, intrinsics, &tf) else {
        log::debug!("lm refine: initial pose puts points behind the camera, skipping");
        let mut result = PnPResult::new(tf, f64::INFINITY);
        result.num_iterations = Some(0);
        result.converged = Some(false);
        return Ok(result);
    };
    let mut cost = r.norm_squared();
    let mut lambda = params.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < params.max_iterations {
        iterations += 1;

        let Some(j) = numerical_jacobian(points_object, points_image, intrinsics, &tf) else {
            break;
        };
        let jt = j.transpose();
        let jtj = &jt * &j;
        let gradient = &jt * &r;

        if gradient.amax() < params.gradient_tolerance {
            converged = true;
            break;
        }

        let mut accepted = false;
        while lambda <= MAX_LAMBDA {
            let mut a = jtj.clone();
            for k in 0..PARAM_DIM {
                a[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }

            let Some(step) = a.lu().solve(&(-&gradient)) else {
                lambda *= 10.0;
                continue;
            };

            let candidate = perturb(&tf, step.as_slice());
            match residuals(points_object, points_image, intrinsics, &candidate) {
                Some(r_new) if r_new.norm_squared() < cost => {
                    let new_cost = r_new.norm_squared();
                    let decrease = (cost - new_cost) / cost.max(f64::MIN_POSITIVE);
                    tf = candidate;
                    r = r_new;
                    cost = new_cost;
                    lambda = (lambda * 0.1).max(1e-12);
                    accepted = true;
                    if decrease < params.cost_tolerance {
                        converged = true;
                    }
                    break;
                }
                _ => lambda *= 10.0,
            }
        }

        if !accepted {
            // no step reduces the cost any further
            converged = true;
            break;
        }
        if converged {
            break;
        }
    }

    log::debug!(
        "lm refine: {} iterations, rmse {:.6} px, converged {}",
        iterations,
        rmse(cost),
        converged
    );

    let mut result = PnPResult::new(tf, rmse(cost));
    result.num_iterations = Some(iterations);
    result.converged = Some(converged);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_refine_recovers_perturbed_pose() -> Result<(), Box<dyn std::error::Error>> {
        let cam = CameraIntrinsics::from_pinhole(700.0, 700.0, 320.0, 240.0)?
            .with_distortion_coefficients(&[-0.1, 0.01, 0.0, 0.0])?;
        let expected = RigidTransform::from_axis_angle(&[0.1, 1.0, 0.2], 0.3, [0.1, -0.1, 2.0])?;
        let points_object = [
            [0.0, 0.0, 0.0],
            [0.3, 0.0, 0.1],
            [0.0, 0.3, -0.1],
            [0.3, 0.3, 0.0],
            [-0.2, 0.1, 0.2],
            [0.1, -0.25, 0.05],
        ];
        let points_image: Vec<[f64; 2]> = points_object
            .iter()
            .map(|p| cam.project(&expected.apply(p)).expect("point is in front of the camera"))
            .collect();

        let initial = perturb(&expected, &[0.02, -0.01, 0.015, 0.03, -0.02, 0.05]);
        let result = refine_pose_lm(
            &points_object,
            &points_image,
            &cam,
            &initial,
            &LMRefineParams::default().with_max_iterations(50),
        )?;

        assert!(result.reproj_rmse < 1e-6);
        for i in 0..3 {
            assert_relative_eq!(
                result.transform.translation[i],
                expected.translation[i],
                epsilon = 1e-6
            );
        }
        assert_eq!(result.converged, Some(true));
        Ok(())
    }

    #[test]
    fn test_refine_mismatched_lengths() -> Result<(), Box<dyn std::error::Error>> {
        let cam = CameraIntrinsics::from_pinhole(700.0, 700.0, 320.0, 240.0)?;
        let res = refine_pose_lm(
            &[[0.0, 0.0, 1.0]; 3],
            &[[0.0, 0.0]; 2],
            &cam,
            &RigidTransform::identity(),
            &LMRefineParams::default(),
        );
        assert!(matches!(res, Err(RegistrationError::InvalidParameter(_))));
        Ok(())
    }
}
