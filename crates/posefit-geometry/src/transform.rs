use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// A proper rigid transform `p' = R * p + t`.
///
/// The rotation is stored row-major, i.e. `rotation[row][col]`. A value produced by the
/// estimators in this workspace always satisfies `RᵀR = I` and `det(R) = +1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    /// Rotation matrix, row-major.
    pub rotation: [[f64; 3]; 3],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// Create a transform from a rotation matrix and a translation vector.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Build a transform from a rotation about `axis` by `angle` radians followed by a translation.
    ///
    /// Example:
    ///
    /// ```
    /// use posefit_geometry::RigidTransform;
    ///
    /// let angle = std::f64::consts::FRAC_PI_2;
    /// let tf = RigidTransform::from_axis_angle(&[0.0, 0.0, 1.0], angle, [1.0, 2.0, 3.0])?;
    /// let p = tf.apply(&[1.0, 0.0, 0.0]);
    /// assert!((p[0] - 1.0).abs() < 1e-12 && (p[1] - 3.0).abs() < 1e-12);
    /// # Ok::<(), posefit_geometry::GeometryError>(())
    /// ```
    pub fn from_axis_angle(
        axis: &[f64; 3],
        angle: f64,
        translation: [f64; 3],
    ) -> Result<Self, GeometryError> {
        Ok(Self {
            rotation: axis_angle_to_rotation_matrix(axis, angle)?,
            translation,
        })
    }

    /// Build a transform from a Rodrigues rotation vector and a translation.
    pub fn from_rotation_vector(rvec: &[f64; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation: rotation_vector_to_matrix(rvec),
            translation,
        }
    }

    /// Build a transform from a homogeneous 4x4 matrix, row-major.
    ///
    /// The last row is ignored and assumed to be `[0, 0, 0, 1]`.
    pub fn from_matrix4(m: &[[f64; 4]; 4]) -> Self {
        let mut rotation = [[0.0; 3]; 3];
        let mut translation = [0.0; 3];
        for r in 0..3 {
            rotation[r].copy_from_slice(&m[r][..3]);
            translation[r] = m[r][3];
        }
        Self {
            rotation,
            translation,
        }
    }

    /// The homogeneous 4x4 matrix `[[R, t], [0, 1]]`, row-major.
    pub fn to_matrix4(&self) -> [[f64; 4]; 4] {
        let mut m = [[0.0; 4]; 4];
        for r in 0..3 {
            m[r][..3].copy_from_slice(&self.rotation[r]);
            m[r][3] = self.translation[r];
        }
        m[3][3] = 1.0;
        m
    }

    /// Rodrigues rotation vector of the rotation part.
    pub fn rotation_vector(&self) -> [f64; 3] {
        rotation_matrix_to_vector(&self.rotation)
    }

    /// Transform a single point.
    #[inline]
    pub fn apply(&self, p: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// Transform a set of points into a pre-allocated buffer.
    ///
    /// PRECONDITION: `dst_points` has the same length as `src_points`.
    pub fn transform_points(&self, src_points: &[[f64; 3]], dst_points: &mut [[f64; 3]]) {
        assert_eq!(src_points.len(), dst_points.len());
        for (dst, src) in dst_points.iter_mut().zip(src_points.iter()) {
            *dst = self.apply(src);
        }
    }

    /// The inverse transform `(Rᵀ, -Rᵀ t)`.
    pub fn inverse(&self) -> Self {
        let rt = transpose(&self.rotation);
        let t = mat_vec(&rt, &self.translation);
        Self {
            rotation: rt,
            translation: [-t[0], -t[1], -t[2]],
        }
    }

    /// Composition `self ∘ other`, i.e. `other` is applied first.
    pub fn compose(&self, other: &RigidTransform) -> Self {
        let rotation = mat_mul(&self.rotation, &other.rotation);
        let rt = mat_vec(&self.rotation, &other.translation);
        Self {
            rotation,
            translation: [
                rt[0] + self.translation[0],
                rt[1] + self.translation[1],
                rt[2] + self.translation[2],
            ],
        }
    }

    /// Whether the rotation part is orthonormal with determinant +1 within `tol`.
    pub fn is_rotation(&self, tol: f64) -> bool {
        let rtr = mat_mul(&transpose(&self.rotation), &self.rotation);
        for (i, row) in rtr.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                if (v - expected).abs() > tol {
                    return false;
                }
            }
        }
        (determinant(&self.rotation) - 1.0).abs() <= tol
    }
}

/// Compute the rotation matrix from an axis and angle.
///
/// The axis does not need to be normalized but must not be zero.
pub fn axis_angle_to_rotation_matrix(
    axis: &[f64; 3],
    angle: f64,
) -> Result<[[f64; 3]; 3], GeometryError> {
    let magnitude = norm(axis);
    if magnitude < 1e-10 {
        return Err(GeometryError::ZeroAxis);
    }
    Ok(unit_axis_angle(
        [
            axis[0] / magnitude,
            axis[1] / magnitude,
            axis[2] / magnitude,
        ],
        angle,
    ))
}

/// Exponential map from a Rodrigues vector to a rotation matrix.
pub fn rotation_vector_to_matrix(rvec: &[f64; 3]) -> [[f64; 3]; 3] {
    let theta = norm(rvec);
    if theta < 1e-12 {
        // first order: I + [w]x
        return [
            [1.0, -rvec[2], rvec[1]],
            [rvec[2], 1.0, -rvec[0]],
            [-rvec[1], rvec[0], 1.0],
        ];
    }
    unit_axis_angle([rvec[0] / theta, rvec[1] / theta, rvec[2] / theta], theta)
}

// Rodrigues formula, `axis` must be unit length.
fn unit_axis_angle(axis: [f64; 3], angle: f64) -> [[f64; 3]; 3] {
    let [x, y, z] = axis;
    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;

    [
        [c + x * x * t, x * y * t - z * s, x * z * t + y * s],
        [x * y * t + z * s, c + y * y * t, y * z * t - x * s],
        [x * z * t - y * s, y * z * t + x * s, c + z * z * t],
    ]
}

/// Logarithm map from a rotation matrix to a Rodrigues vector.
pub fn rotation_matrix_to_vector(r: &[[f64; 3]; 3]) -> [f64; 3] {
    let trace = r[0][0] + r[1][1] + r[2][2];
    let cos_theta = ((trace - 1.0) * 0.5).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();
    let w = [r[2][1] - r[1][2], r[0][2] - r[2][0], r[1][0] - r[0][1]];

    if theta < 1e-9 {
        return [0.5 * w[0], 0.5 * w[1], 0.5 * w[2]];
    }

    if std::f64::consts::PI - theta < 1e-6 {
        // near pi the skew part vanishes; read the axis from the diagonal of (R + I) / 2
        let diag = [
            ((r[0][0] + 1.0) * 0.5).max(0.0).sqrt(),
            ((r[1][1] + 1.0) * 0.5).max(0.0).sqrt(),
            ((r[2][2] + 1.0) * 0.5).max(0.0).sqrt(),
        ];
        let k = (0..3)
            .max_by(|&a, &b| diag[a].total_cmp(&diag[b]))
            .unwrap_or(0);
        let mut axis = [0.0; 3];
        axis[k] = diag[k];
        for j in 0..3 {
            if j != k {
                axis[j] = (r[k][j] + r[j][k]) / (4.0 * diag[k]);
            }
        }
        let n = norm(&axis);
        return [
            axis[0] / n * theta,
            axis[1] / n * theta,
            axis[2] / n * theta,
        ];
    }

    let scale = theta / (2.0 * theta.sin());
    [w[0] * scale, w[1] * scale, w[2] * scale]
}

#[inline]
fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[inline]
fn transpose(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in m.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            out[j][i] = v;
        }
    }
    out
}

#[inline]
fn mat_vec(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Multiply two 3x3 matrices, `a * b`.
pub fn mat_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    out
}

/// Determinant of a 3x3 matrix.
pub fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}
