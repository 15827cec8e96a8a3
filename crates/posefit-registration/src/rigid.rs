//! Closed-form rigid alignment (Kabsch / Procrustes)

use nalgebra::{Matrix3, Vector3};
use posefit_geometry::RigidTransform;

use crate::error::{check_lengths, Degeneracy, ParameterError, RegistrationError};
use crate::ops::{compute_centroids, matrix3_to_array33};

/// Minimum number of point pairs that determine a rigid transform.
pub const MIN_POINTS: usize = 3;

/// Spread of a point set, relative to its coordinate magnitude, below which it counts as a
/// single point.
const COINCIDENT_TOL: f64 = 1e-10;

/// Ratio between the second and the first singular value below which the points count as collinear.
const COLLINEAR_TOL: f64 = 1e-9;

/// Estimate the rigid transform mapping `src` onto `dst` in the least-squares sense.
///
/// Returns `(R, t)` minimizing `Σ ‖R·src_i + t − dst_i‖²`.
///
/// # Arguments
///
/// * `src` - Source points, index-aligned with `dst`.
/// * `dst` - Destination points.
///
/// # Errors
///
/// * `InvalidParameter` if the slices differ in length.
/// * `DegenerateInput` for fewer than 3 pairs, coincident or collinear points.
///
/// Example:
///
/// ```
/// use posefit_registration::estimate_rigid_transform;
///
/// let src = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let dst = [[1.0, 2.0, 3.0], [2.0, 2.0, 3.0], [1.0, 3.0, 3.0], [1.0, 2.0, 4.0]];
/// let tf = estimate_rigid_transform(&src, &dst)?;
/// assert!((tf.translation[0] - 1.0).abs() < 1e-9);
/// # Ok::<(), posefit_registration::RegistrationError>(())
/// ```
pub fn estimate_rigid_transform(
    src: &[[f64; 3]],
    dst: &[[f64; 3]],
) -> Result<RigidTransform, RegistrationError> {
    check_lengths("source points", src, "destination points", dst)?;
    if src.len() < MIN_POINTS {
        return Err(Degeneracy::TooFewPoints {
            required: MIN_POINTS,
            actual: src.len(),
        }
        .into());
    }

    let (src_centroid, dst_centroid) = compute_centroids(src, dst);

    // H = Σ (src_i - src_mean) * (dst_i - dst_mean)^T
    let mut h = Matrix3::<f64>::zeros();
    let mut src_spread = 0.0;
    let mut dst_spread = 0.0;
    let mut magnitude = 1.0f64;
    for (p_src, p_dst) in src.iter().zip(dst.iter()) {
        let s = Vector3::from(*p_src) - src_centroid;
        let d = Vector3::from(*p_dst) - dst_centroid;
        h += s * d.transpose();
        src_spread += s.norm_squared();
        dst_spread += d.norm_squared();
        magnitude = p_src
            .iter()
            .chain(p_dst.iter())
            .fold(magnitude, |m, v| m.max(v.abs()));
    }

    if !(h.iter().all(|v| v.is_finite()) && magnitude.is_finite()) {
        return Err(ParameterError::NonFiniteInput.into());
    }

    let n = src.len() as f64;
    let coincident_limit = COINCIDENT_TOL * magnitude;
    if (src_spread / n).sqrt() <= coincident_limit || (dst_spread / n).sqrt() <= coincident_limit {
        return Err(Degeneracy::Coincident.into());
    }

    let svd = h.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(Degeneracy::Coincident.into()),
    };
    let singular_values = svd.singular_values;

    let mut sorted = [singular_values[0], singular_values[1], singular_values[2]];
    sorted.sort_by(|a, b| b.total_cmp(a));
    if sorted[1] <= COLLINEAR_TOL * sorted[0] {
        return Err(Degeneracy::Collinear.into());
    }

    let (rotation, reflected) = correct_reflection(&u, &v_t.transpose(), &singular_values);
    if reflected {
        log::trace!("kabsch: corrected reflection, singular values {:?}", sorted);
    }

    let translation = dst_centroid - rotation * src_centroid;

    Ok(RigidTransform::new(
        matrix3_to_array33(&rotation),
        [translation.x, translation.y, translation.z],
    ))
}

/// Build the rotation `R = V Uᵀ` from the factors of `H = U S Vᵀ`, forcing `det(R) = +1`.
///
/// When `V Uᵀ` is a reflection the column of `V` paired with the smallest singular value is
/// negated and the product recomputed. The second return value tells whether that happened.
pub fn correct_reflection(
    u: &Matrix3<f64>,
    v: &Matrix3<f64>,
    singular_values: &Vector3<f64>,
) -> (Matrix3<f64>, bool) {
    let r = v * u.transpose();
    if r.determinant() >= 0.0 {
        return (r, false);
    }

    let mut k = 0;
    for i in 1..3 {
        if singular_values[i] < singular_values[k] {
            k = i;
        }
    }

    let mut v_corrected = *v;
    v_corrected.column_mut(k).neg_mut();
    (v_corrected * u.transpose(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use posefit_geometry::transform::determinant;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn create_random_points(rng: &mut StdRng, num_points: usize) -> Vec<[f64; 3]> {
        (0..num_points)
            .map(|_| [rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>()])
            .collect()
    }

    fn assert_transform_eq(res: &RigidTransform, exp: &RigidTransform, epsilon: f64) {
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(res.rotation[i][j], exp.rotation[i][j], epsilon = epsilon);
            }
            assert_relative_eq!(res.translation[i], exp.translation[i], epsilon = epsilon);
        }
    }

    #[test]
    fn test_identity() -> Result<(), RegistrationError> {
        let mut rng = StdRng::seed_from_u64(0);
        let points = create_random_points(&mut rng, 30);
        let tf = estimate_rigid_transform(&points, &points)?;
        assert_transform_eq(&tf, &RigidTransform::identity(), 1e-9);
        Ok(())
    }

    #[test]
    fn test_recovers_random_transforms() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(7);
        let points_src = create_random_points(&mut rng, 30);

        for _ in 0..10 {
            let axis = [
                rng.random::<f64>() - 0.5,
                rng.random::<f64>() - 0.5,
                rng.random::<f64>() - 0.5,
            ];
            let angle = rng.random::<f64>() * std::f64::consts::PI;
            let translation = [
                rng.random::<f64>() * 10.0,
                rng.random::<f64>() * 10.0,
                rng.random::<f64>() * 10.0,
            ];
            let expected = RigidTransform::from_axis_angle(&axis, angle, translation)?;

            let mut points_dst = vec![[0.0; 3]; points_src.len()];
            expected.transform_points(&points_src, &mut points_dst);

            let tf = estimate_rigid_transform(&points_src, &points_dst)?;
            assert_transform_eq(&tf, &expected, 1e-9);
            assert!(tf.is_rotation(1e-9));
        }
        Ok(())
    }

    #[test]
    fn test_minimal_triangle() -> Result<(), Box<dyn std::error::Error>> {
        let src = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let expected =
            RigidTransform::from_axis_angle(&[0.2, 1.0, -0.4], 1.1, [0.5, -1.0, 2.0])?;
        let mut dst = [[0.0; 3]; 3];
        expected.transform_points(&src, &mut dst);

        let tf = estimate_rigid_transform(&src, &dst)?;
        assert_transform_eq(&tf, &expected, 1e-9);
        Ok(())
    }

    #[test]
    fn test_reflected_destination_yields_proper_rotation() -> Result<(), RegistrationError> {
        // mirror z: the unconstrained least-squares orthogonal map is a reflection
        let src = [
            [1.0, 0.0, 0.0],
            [0.0, 2.0, 0.0],
            [0.0, 0.0, 3.0],
            [1.0, 1.0, 1.0],
            [-1.0, 0.5, 2.0],
        ];
        let dst: Vec<[f64; 3]> = src.iter().map(|p| [p[0], p[1], -p[2]]).collect();

        let tf = estimate_rigid_transform(&src, &dst)?;
        assert_relative_eq!(determinant(&tf.rotation), 1.0, epsilon = 1e-9);
        assert!(tf.is_rotation(1e-9));
        Ok(())
    }

    #[test]
    fn test_correct_reflection_flips_weakest_axis() {
        let u = Matrix3::identity();
        let v = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));

        let (r, reflected) = correct_reflection(&u, &v, &Vector3::new(3.0, 2.0, 1.0));
        assert!(reflected);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-12);

        // unordered singular values: the smallest one sits in the first slot
        let v = Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, 1.0));
        let (r, reflected) = correct_reflection(&u, &v, &Vector3::new(0.5, 2.0, 3.0));
        assert!(reflected);
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-12);

        let (r, reflected) = correct_reflection(&u, &u, &Vector3::new(3.0, 2.0, 1.0));
        assert!(!reflected);
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_too_few_points() {
        let src = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let res = estimate_rigid_transform(&src, &src);
        assert_eq!(
            res,
            Err(RegistrationError::DegenerateInput(Degeneracy::TooFewPoints {
                required: 3,
                actual: 2
            }))
        );
    }

    #[test]
    fn test_collinear_points() {
        let src = [[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]];
        let dst = [[1.0, 0.0, 0.0], [2.0, 1.0, 1.0], [3.0, 2.0, 2.0]];
        let res = estimate_rigid_transform(&src, &dst);
        assert_eq!(
            res,
            Err(RegistrationError::DegenerateInput(Degeneracy::Collinear))
        );
    }

    #[test]
    fn test_coincident_points() {
        let src = [[1.0, 2.0, 3.0]; 4];
        let dst = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let res = estimate_rigid_transform(&src, &dst);
        assert_eq!(
            res,
            Err(RegistrationError::DegenerateInput(Degeneracy::Coincident))
        );
    }

    #[test]
    fn test_non_finite_input() {
        let src = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, f64::NAN, 0.0]];
        let res = estimate_rigid_transform(&src, &src);
        assert_eq!(
            res,
            Err(RegistrationError::InvalidParameter(
                ParameterError::NonFiniteInput
            ))
        );
    }

    #[test]
    fn test_mismatched_lengths() {
        let src = [[0.0, 0.0, 0.0]; 4];
        let dst = [[0.0, 0.0, 0.0]; 3];
        let res = estimate_rigid_transform(&src, &dst);
        assert!(matches!(res, Err(RegistrationError::InvalidParameter(_))));
    }
}
