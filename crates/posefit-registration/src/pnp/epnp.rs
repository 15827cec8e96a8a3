//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: [Lepetit et al., IJCV 2009](https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf)
//! Reference: [OpenCV EPnP implementation](https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp)

use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector4};
use posefit_geometry::{CameraIntrinsics, RigidTransform};
use serde::{Deserialize, Serialize};

use super::refine::{refine_pose_lm, LMRefineParams};
use super::PnPResult;
use crate::error::{check_lengths, Degeneracy, ParameterError, RegistrationError};
use crate::residual::point_reprojection_error;
use crate::rigid::estimate_rigid_transform;

/// Minimum number of correspondences EPnP needs.
pub const MIN_CORRESPONDENCES: usize = 4;

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EPnPParams {
    /// Tolerance for the least-squares beta solves.
    pub svd_tol: f64,
    /// Determinant threshold below which the control-point basis is pseudo-inverted.
    pub pinv_eps: f64,
    /// Optional LM refinement parameters. If `Some`, the pose will be refined
    /// after the initial EPnP solution.
    pub refine_lm: Option<LMRefineParams>,
}

impl Default for EPnPParams {
    fn default() -> Self {
        Self {
            svd_tol: 1e-12,
            pinv_eps: 1e-12,
            refine_lm: None,
        }
    }
}

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `points_object` – 3-D coordinates in the object frame, shape *(N,3)* with `N≥4`.
/// * `points_image` – Corresponding pixel coordinates, shape *(N,2)*.
/// * `intrinsics` – Camera matrix and optional distortion; pixels are undistorted first.
///
/// # Returns
/// The pose mapping object coordinates into the camera frame, with its reprojection RMSE.
pub fn solve_epnp(
    points_object: &[[f64; 3]],
    points_image: &[[f64; 2]],
    intrinsics: &CameraIntrinsics,
    params: &EPnPParams,
) -> Result<PnPResult, RegistrationError> {
    check_lengths("object points", points_object, "image points", points_image)?;
    intrinsics.validate()?;
    let normalized: Vec<[f64; 2]> = points_image
        .iter()
        .map(|uv| intrinsics.undistort_pixel(uv))
        .collect();
    solve_epnp_normalized(points_object, &normalized, points_image, intrinsics, params)
}

/// EPnP on correspondences whose pixels were already mapped to undistorted normalized
/// coordinates. `points_image` is only used to score the candidate poses.
pub(crate) fn solve_epnp_normalized(
    points_object: &[[f64; 3]],
    points_normalized: &[[f64; 2]],
    points_image: &[[f64; 2]],
    intrinsics: &CameraIntrinsics,
    params: &EPnPParams,
) -> Result<PnPResult, RegistrationError> {
    let n = points_object.len();
    check_lengths(
        "object points",
        points_object,
        "normalized points",
        points_normalized,
    )?;
    if n < MIN_CORRESPONDENCES {
        return Err(Degeneracy::TooFewPoints {
            required: MIN_CORRESPONDENCES,
            actual: n,
        }
        .into());
    }
    if points_object
        .iter()
        .flatten()
        .chain(points_normalized.iter().flatten())
        .any(|v| !v.is_finite())
    {
        return Err(ParameterError::NonFiniteInput.into());
    }

    let cw = select_control_points(points_object);
    let alphas = compute_barycentric(points_object, &cw, params.pinv_eps)?;

    // Build the 2N×12 design matrix M
    let m_mat = build_m(&alphas, points_normalized);

    // Null-space of M via eigen decomposition of MtM (12×12)
    let mtm = m_mat.transpose() * &m_mat;
    let eig = mtm.symmetric_eigen();

    let mut value_index_pairs: Vec<(f64, usize)> = eig
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(index, value)| (value.abs(), index))
        .collect();
    value_index_pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    // column k pairs with beta k, ordered by ascending eigenvalue
    let null4 = DMatrix::from_columns(&[
        eig.eigenvectors.column(value_index_pairs[0].1),
        eig.eigenvectors.column(value_index_pairs[1].1),
        eig.eigenvectors.column(value_index_pairs[2].1),
        eig.eigenvectors.column(value_index_pairs[3].1),
    ]);

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::<f64>::from_column_slice(&rho);

    let betas = [
        estimate_beta(&[0, 1, 3, 6], &l, &rho_vec, params.svd_tol),
        estimate_beta(&[0, 1, 2], &l, &rho_vec, params.svd_tol),
        estimate_beta(&[0, 1, 2, 3, 4], &l, &rho_vec, params.svd_tol),
    ];

    let mut best: Option<PnPResult> = None;
    for beta in betas.into_iter().flatten() {
        let beta = gauss_newton(beta, &null4, &rho);
        if beta.iter().any(|b| !b.is_finite()) {
            continue;
        }
        let transform = match pose_from_betas(&beta, &null4, points_object, &alphas) {
            Ok(tf) => tf,
            Err(e) => {
                log::trace!("epnp: discarding beta candidate: {e}");
                continue;
            }
        };
        let err = rmse_px(points_object, points_image, &transform, intrinsics);
        let improves = match &best {
            Some(b) => err < b.reproj_rmse,
            None => true,
        };
        if improves {
            best = Some(PnPResult::new(transform, err));
        }
    }

    let best = best.ok_or(RegistrationError::DegenerateInput(Degeneracy::Coincident))?;

    // Optionally refine pose using LM optimization
    if let Some(ref lm_params) = params.refine_lm {
        return refine_pose_lm(
            points_object,
            points_image,
            intrinsics,
            &best.transform,
            lm_params,
        );
    }

    Ok(best)
}

/// Compute the pose from a set of betas using the null-space vectors.
///
/// The camera-frame points are rebuilt from the camera control points and aligned with the
/// object points in closed form.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>,
    points_object: &[[f64; 3]],
    alphas: &[[f64; 4]],
) -> Result<RigidTransform, RegistrationError> {
    let beta_vec = Vector4::from_column_slice(betas);
    let cc_flat = null4 * beta_vec;

    let mut cc = [Vector3::<f64>::zeros(); 4];
    for (i, c) in cc.iter_mut().enumerate() {
        *c = Vector3::new(cc_flat[3 * i], cc_flat[3 * i + 1], cc_flat[3 * i + 2]);
    }

    let camera_point = |a: &[f64; 4]| -> Vector3<f64> {
        cc[0] * a[0] + cc[1] * a[1] + cc[2] * a[2] + cc[3] * a[3]
    };

    // the null space is defined up to sign, keep the solution in front of the camera
    let sign = if camera_point(&alphas[0]).z < 0.0 {
        -1.0
    } else {
        1.0
    };

    let points_camera: Vec<[f64; 3]> = alphas
        .iter()
        .map(|a| {
            let pc = camera_point(a) * sign;
            [pc.x, pc.y, pc.z]
        })
        .collect();

    estimate_rigid_transform(points_object, &points_camera)
}

/// Root-mean-square reprojection error in pixels.
fn rmse_px(
    points_object: &[[f64; 3]],
    points_image: &[[f64; 2]],
    transform: &RigidTransform,
    intrinsics: &CameraIntrinsics,
) -> f64 {
    let sum_sq: f64 = points_object
        .iter()
        .zip(points_image.iter())
        .map(|(p, uv)| {
            let e = point_reprojection_error(transform, intrinsics, p, uv);
            e * e
        })
        .sum();
    (sum_sq / points_object.len() as f64).sqrt()
}

/// Pick the centroid and the three principal directions, scaled by their standard deviation.
fn select_control_points(points_object: &[[f64; 3]]) -> [Vector3<f64>; 4] {
    let n = points_object.len() as f64;
    let c = points_object
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + Vector3::from(*p))
        / n;

    let mut cov = Matrix3::<f64>::zeros();
    for p in points_object {
        let diff = Vector3::from(*p) - c;
        cov += diff * diff.transpose();
    }
    cov /= n;

    let eig = cov.symmetric_eigen();
    let mut axes_sig: Vec<(f64, Vector3<f64>)> = (0..3)
        .map(|i| {
            (
                eig.eigenvalues[i].max(0.0).sqrt(),
                eig.eigenvectors.column(i).into_owned(),
            )
        })
        .collect();
    axes_sig.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut cw = [c; 4];
    for (i, (sigma, axis)) in axes_sig.iter().enumerate() {
        cw[i + 1] = c + axis * *sigma;
    }
    cw
}

/// Compute barycentric coordinates of object points with respect to the 4 control points.
///
/// For each point the weights `[a0, a1, a2, a3]` satisfy `a0 + a1 + a2 + a3 = 1` and
/// `pw_i = sum_j(a_j * Cw_j)`. Below `eps` the control-point basis is pseudo-inverted.
fn compute_barycentric(
    points_object: &[[f64; 3]],
    cw: &[Vector3<f64>; 4],
    eps: f64,
) -> Result<Vec<[f64; 4]>, RegistrationError> {
    let b = Matrix3::from_columns(&[cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]]);

    let inverse = if b.determinant().abs() > eps {
        b.try_inverse()
    } else {
        None
    };
    let b_inv = match inverse {
        Some(inv) => inv,
        None => b
            .pseudo_inverse(eps)
            .map_err(|_| RegistrationError::DegenerateInput(Degeneracy::Coincident))?,
    };

    Ok(points_object
        .iter()
        .map(|p| {
            let lamb = b_inv * (Vector3::from(*p) - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect())
}

/// Construct the 2N x 12 design matrix `M` from normalized image coordinates.
fn build_m(alphas: &[[f64; 4]], points_normalized: &[[f64; 2]]) -> DMatrix<f64> {
    let n = alphas.len();
    let mut m = DMatrix::<f64>::zeros(2 * n, 12);

    for (i, (a, xy)) in alphas.iter().zip(points_normalized.iter()).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;

        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha;
            m[(row_x, base + 2)] = -alpha * xy[0];
            m[(row_y, base + 1)] = alpha;
            m[(row_y, base + 2)] = -alpha * xy[1];
        }
    }

    m
}

/// Build the 6×10 matrix **L** from the 4-dimensional null-space matrix `V` (shape 12×4).
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let mut l = [[0.0f64; 10]; 6];

    let cols = [null4.column(0), null4.column(1), null4.column(2), null4.column(3)];

    for (j, &(a, b)) in CP_PAIRS.iter().enumerate() {
        let d: Vec<Vector3<f64>> = cols
            .iter()
            .map(|col| {
                Vector3::new(
                    col[3 * a] - col[3 * b],
                    col[3 * a + 1] - col[3 * b + 1],
                    col[3 * a + 2] - col[3 * b + 2],
                )
            })
            .collect();

        l[j] = [
            d[0].dot(&d[0]),
            2.0 * d[0].dot(&d[1]),
            d[1].dot(&d[1]),
            2.0 * d[0].dot(&d[2]),
            2.0 * d[1].dot(&d[2]),
            d[2].dot(&d[2]),
            2.0 * d[0].dot(&d[3]),
            2.0 * d[1].dot(&d[3]),
            2.0 * d[2].dot(&d[3]),
            d[3].dot(&d[3]),
        ];
    }
    l
}

/// Solve for a beta vector given a column subset of the 6×10 L matrix.
/// Returns `None` if the least-squares solve fails.
fn estimate_beta(
    cols: &[usize],
    l: &[[f64; 10]; 6],
    rho: &DVector<f64>,
    tol_svd: f64,
) -> Option<[f64; 4]> {
    let data: Vec<f64> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    let l_sub = DMatrix::<f64>::from_column_slice(6, cols.len(), &data);
    let x = l_sub.svd(true, true).solve(rho, tol_svd).ok()?;

    let mut beta = [0.0; 4];
    match cols.len() {
        4 => {
            if x[0] == 0.0 {
                return None;
            }
            let s = x[0].abs().sqrt();
            let sign = x[0].signum();
            beta = [s, sign * x[1] / s, sign * x[2] / s, sign * x[3] / s];
        }
        3 => {
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
        }
        5 => {
            if x[0] == 0.0 {
                return None;
            }
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
                beta[2] = x[3] / (-x[0]).sqrt();
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
                beta[2] = x[3] / x[0].sqrt();
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
        }
        _ => return None,
    }
    Some(beta)
}

/// Refine the betas so the camera control points keep the object-frame distances.
fn gauss_newton(beta_init: [f64; 4], null4: &DMatrix<f64>, rho: &[f64; 6]) -> [f64; 4] {
    let mut bet = Vector4::from_column_slice(&beta_init);

    for _ in 0..6 {
        let mut f_vec = DVector::<f64>::zeros(6);
        let mut j_mat = DMatrix::<f64>::zeros(6, 4);

        for (r, &(i, j)) in CP_PAIRS.iter().enumerate() {
            let block_i = null4.view((i * 3, 0), (3, 4));
            let block_j = null4.view((j * 3, 0), (3, 4));

            let diff = block_i * bet - block_j * bet;
            f_vec[r] = diff.dot(&diff) - rho[r];

            for k in 0..4 {
                let col_diff = block_i.column(k) - block_j.column(k);
                j_mat[(r, k)] = 2.0 * col_diff.dot(&diff);
            }
        }

        let jt = j_mat.transpose();
        let a = &jt * &j_mat + DMatrix::<f64>::identity(4, 4) * 1e-12;
        let b = &jt * f_vec;

        match a.lu().solve(&b) {
            Some(delta) => {
                let norm_val = delta.norm();
                bet -= Vector4::new(delta[0], delta[1], delta[2], delta[3]);
                if norm_val < 1e-12 {
                    break;
                }
            }
            None => break,
        }
    }

    [bet[0], bet[1], bet[2], bet[3]]
}

/// Compute the six squared distances (ρ vector) between the 4 control points.
fn rho_ctrlpts(cw: &[Vector3<f64>; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| (cw[i] - cw[j]).norm_squared())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project_all(
        tf: &RigidTransform,
        cam: &CameraIntrinsics,
        points: &[[f64; 3]],
    ) -> Vec<[f64; 2]> {
        points
            .iter()
            .map(|p| cam.project(&tf.apply(p)).expect("point is in front of the camera"))
            .collect()
    }

    fn object_points() -> Vec<[f64; 3]> {
        vec![
            [0.0315, 0.03333, -0.10409],
            [-0.0315, 0.03333, -0.10409],
            [0.0, -0.00102, -0.12977],
            [0.02646, -0.03167, -0.1053],
            [-0.02646, -0.031667, -0.1053],
            [0.0, 0.04515, -0.11033],
        ]
    }

    #[test]
    fn test_barycentric_reconstructs_points() -> Result<(), RegistrationError> {
        let points = object_points();
        let cw = select_control_points(&points);
        let alphas = compute_barycentric(&points, &cw, EPnPParams::default().pinv_eps)?;

        for (p, alpha) in points.iter().zip(alphas.iter()) {
            let recon = cw[0] * alpha[0] + cw[1] * alpha[1] + cw[2] * alpha[2] + cw[3] * alpha[3];
            for k in 0..3 {
                assert_relative_eq!(recon[k], p[k], epsilon = 1e-9);
            }
            assert_relative_eq!(alpha.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_build_m_rows() {
        let alphas = [[0.1, 0.2, 0.3, 0.4]];
        let m = build_m(&alphas, &[[0.5, -0.25]]);
        assert_eq!(m.shape(), (2, 12));
        assert_relative_eq!(m[(0, 3)], 0.2);
        assert_relative_eq!(m[(0, 5)], -0.1);
        assert_relative_eq!(m[(1, 10)], 0.4);
        assert_relative_eq!(m[(1, 11)], 0.1);
        assert_eq!(m[(0, 4)], 0.0);
    }

    #[test]
    fn test_solve_epnp() -> Result<(), Box<dyn std::error::Error>> {
        let points_object = object_points();
        let cam = CameraIntrinsics::from_pinhole(800.0, 800.0, 640.0, 480.0)?;
        let expected =
            RigidTransform::from_axis_angle(&[-0.6, 0.89, 0.14], 1.09, [0.15, 0.057, 0.96])?;
        let points_image = project_all(&expected, &cam, &points_object);

        let result = solve_epnp(&points_object, &points_image, &cam, &EPnPParams::default())?;
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(
                    result.transform.rotation[i][j],
                    expected.rotation[i][j],
                    epsilon = 1e-5
                );
            }
            assert_relative_eq!(
                result.transform.translation[i],
                expected.translation[i],
                epsilon = 1e-5
            );
        }
        assert!(result.reproj_rmse < 1e-6);
        Ok(())
    }

    #[test]
    fn test_solve_epnp_with_distortion() -> Result<(), Box<dyn std::error::Error>> {
        let points_object = vec![
            [0.0, 0.0, 0.0],
            [0.2, 0.0, 0.05],
            [0.0, 0.2, -0.05],
            [0.2, 0.2, 0.0],
            [-0.1, 0.15, 0.1],
            [0.15, -0.1, -0.1],
            [-0.15, -0.15, 0.02],
        ];
        let cam = CameraIntrinsics::from_pinhole(600.0, 600.0, 320.0, 240.0)?
            .with_distortion_coefficients(&[-0.2, 0.05, 1e-3, -5e-4, 0.0])?;
        let expected = RigidTransform::from_axis_angle(&[0.3, -0.5, 1.0], 0.4, [0.05, -0.02, 1.5])?;
        let points_image = project_all(&expected, &cam, &points_object);

        let result = solve_epnp(&points_object, &points_image, &cam, &EPnPParams::default())?;
        for i in 0..3 {
            assert_relative_eq!(
                result.transform.translation[i],
                expected.translation[i],
                epsilon = 1e-5
            );
        }
        assert!(result.reproj_rmse < 1e-4);
        Ok(())
    }

    #[test]
    fn test_solve_epnp_too_few_points() -> Result<(), Box<dyn std::error::Error>> {
        let cam = CameraIntrinsics::from_pinhole(800.0, 800.0, 640.0, 480.0)?;
        let res = solve_epnp(
            &[[0.0, 0.0, 1.0]; 3],
            &[[0.0, 0.0]; 3],
            &cam,
            &EPnPParams::default(),
        );
        assert_eq!(
            res,
            Err(RegistrationError::DegenerateInput(Degeneracy::TooFewPoints {
                required: 4,
                actual: 3
            }))
        );
        Ok(())
    }

    #[test]
    fn test_solve_epnp_rejects_zero_focal_length() {
        let cam = CameraIntrinsics {
            camera_matrix: [[800.0, 0.0, 640.0], [0.0, 0.0, 480.0], [0.0, 0.0, 1.0]],
            distortion: None,
        };
        let image = vec![[640.0, 480.0]; 6];
        let res = solve_epnp(&object_points(), &image, &cam, &EPnPParams::default());
        assert!(matches!(res, Err(RegistrationError::InvalidParameter(_))));
    }
}
