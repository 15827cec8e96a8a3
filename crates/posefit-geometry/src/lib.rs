#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pinhole camera intrinsics and lens distortion.
pub mod camera;

/// Error types for the geometry primitives.
pub mod error;

/// Rigid transforms in 3D.
pub mod transform;

pub use camera::{CameraIntrinsics, PolynomialDistortion};
pub use error::GeometryError;
pub use transform::RigidTransform;
