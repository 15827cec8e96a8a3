use thiserror::Error;

/// Errors raised when building geometry primitives from raw buffers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    /// The distortion coefficients do not follow the `(k1, k2, p1, p2[, k3[, k4, k5, k6]])`
    /// layout.
    #[error("distortion coefficients must have 4, 5 or 8 entries, got {0}")]
    InvalidDistortionLength(usize),

    /// A rotation axis with zero length was supplied.
    #[error("cannot compute rotation matrix from a zero vector")]
    ZeroAxis,

    /// The camera matrix has a zero focal length.
    #[error("camera matrix has a non-positive focal length (fx = {fx}, fy = {fy})")]
    InvalidFocalLength {
        /// Focal length along x.
        fx: f64,
        /// Focal length along y.
        fy: f64,
    },
}
