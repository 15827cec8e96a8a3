//! Perspective-n-Point solvers used by the 2D-3D estimator.

/// EPnP solver implementation.
pub mod epnp;

/// LM-based pose refinement.
pub mod refine;

pub use epnp::{solve_epnp, EPnPParams};
pub use refine::{refine_pose_lm, LMRefineParams};

use posefit_geometry::RigidTransform;

/// Result returned by the PnP solvers.
///
/// The transform maps coordinates from the **object** frame to the **camera** frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PnPResult {
    /// Estimated pose.
    pub transform: RigidTransform,
    /// Rodrigues axis-angle representation of the rotation.
    pub rvec: [f64; 3],
    /// Root-mean-square reprojection error in pixels.
    pub reproj_rmse: f64,
    /// Number of iterations taken (if applicable).
    pub num_iterations: Option<usize>,
    /// Whether the solver converged (if applicable).
    pub converged: Option<bool>,
}

impl PnPResult {
    pub(crate) fn new(transform: RigidTransform, reproj_rmse: f64) -> Self {
        Self {
            rvec: transform.rotation_vector(),
            transform,
            reproj_rmse,
            num_iterations: None,
            converged: None,
        }
    }
}
