use posefit_geometry::GeometryError;
use thiserror::Error;

/// Error types for the registration routines.
///
/// Every estimation entry point returns this error through a `Result`; no failure is
/// silently absorbed and callers may retry with adjusted parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistrationError {
    /// The input points do not determine a unique rigid transform.
    #[error("degenerate input: {0}")]
    DegenerateInput(#[from] Degeneracy),

    /// RANSAC could not reach the minimum inlier count.
    #[error("RANSAC found {found} inliers, at least {required} are required")]
    InsufficientInliers {
        /// Minimum number of inliers needed to accept a model.
        required: usize,
        /// Size of the best consensus set found.
        found: usize,
    },

    /// A parameter or input shape is invalid.
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ParameterError),
}

/// Reasons for a degenerate input configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum Degeneracy {
    /// Not enough points or correspondences.
    #[error("at least {required} points are required, got {actual}")]
    TooFewPoints {
        /// Minimum number of points required.
        required: usize,
        /// Actual number of points provided.
        actual: usize,
    },

    /// The points are (nearly) collinear, the rotation about their line is undetermined.
    #[error("points are collinear")]
    Collinear,

    /// The points (nearly) coincide.
    #[error("points are coincident")]
    Coincident,
}

/// Invalid parameters and mismatched inputs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    /// Two index-aligned inputs differ in length.
    #[error("mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedLengths {
        /// Label for the left-hand slice.
        left_name: &'static str,
        /// Length of the left-hand slice.
        left_len: usize,
        /// Label for the right-hand slice.
        right_name: &'static str,
        /// Length of the right-hand slice.
        right_len: usize,
    },

    /// The RANSAC sample size is below what the fitter needs.
    #[error("sample size {actual} is smaller than the solver minimum {minimum}")]
    SampleSizeTooSmall {
        /// Minimum sample size of the fitter.
        minimum: usize,
        /// Requested sample size.
        actual: usize,
    },

    /// The inlier threshold must be positive and finite.
    #[error("inlier threshold must be positive and finite, got {0}")]
    InvalidThreshold(f64),

    /// A coordinate is NaN or infinite.
    #[error("input contains non-finite coordinates")]
    NonFiniteInput,

    /// The RANSAC iteration budget is zero.
    #[error("iteration budget must be at least one")]
    ZeroIterations,

    /// Descriptor buffer does not hold a whole number of vectors of the expected length.
    #[error("descriptor buffer of length {len} is not a multiple of dimension {dim}")]
    DescriptorDimension {
        /// Descriptor length.
        dim: usize,
        /// Length of the flat buffer.
        len: usize,
    },

    /// Two descriptor sets with different vector lengths were compared.
    #[error("descriptor dimensions differ: {query} != {reference}")]
    DescriptorMismatch {
        /// Dimension of the query descriptors.
        query: usize,
        /// Dimension of the reference descriptors.
        reference: usize,
    },

    /// Invalid camera or geometry input.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl From<GeometryError> for RegistrationError {
    fn from(e: GeometryError) -> Self {
        RegistrationError::InvalidParameter(ParameterError::Geometry(e))
    }
}

/// Check that two index-aligned slices have the same length.
pub(crate) fn check_lengths<A, B>(
    left_name: &'static str,
    left: &[A],
    right_name: &'static str,
    right: &[B],
) -> Result<(), RegistrationError> {
    if left.len() != right.len() {
        return Err(ParameterError::MismatchedLengths {
            left_name,
            left_len: left.len(),
            right_name,
            right_len: right.len(),
        }
        .into());
    }
    Ok(())
}
