#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Descriptor matching and correspondence retrieval.
pub mod correspondence;

/// Error types for the registration routines.
pub mod error;

/// Feature-driven model registration.
pub mod features;

/// Perspective-n-Point solvers.
pub mod pnp;

/// Alignment of pose trajectories.
pub mod pose_set;

/// Sample-consensus estimation.
pub mod ransac;

/// Transfer errors of a candidate transform.
pub mod residual;

/// Closed-form rigid alignment.
pub mod rigid;

mod ops;

pub use correspondence::{
    retrieve_correspondences, BruteForceMatcher, Correspondences, DescriptorMatch,
    DescriptorMatcher, DescriptorSet, DuplicatePolicy,
};
pub use error::{Degeneracy, ParameterError, RegistrationError};
pub use features::{register_features_2d, register_features_3d, FeatureRegistration};
pub use pnp::{refine_pose_lm, solve_epnp, EPnPParams, LMRefineParams, PnPResult};
pub use pose_set::align_pose_sets;
pub use ransac::{
    estimate_perspective_transform_ransac, estimate_rigid_transform_ransac, ransac,
    ConsensusEstimator, RansacParams, RansacResult,
};
pub use residual::{reprojection_error, rmse, transfer_error_3d};
pub use rigid::{correct_reflection, estimate_rigid_transform};
