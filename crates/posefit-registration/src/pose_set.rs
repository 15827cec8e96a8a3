use posefit_geometry::RigidTransform;

use crate::error::{check_lengths, RegistrationError};
use crate::rigid::estimate_rigid_transform;

/// Rigidly align two pose sequences through their positions.
///
/// Returns the transform `T` minimizing `Σ ‖T(src_i.t) − dst_i.t‖²`. Rotations are ignored.
///
/// # Errors
///
/// * `InvalidParameter` if the sequences differ in length.
/// * `DegenerateInput` for fewer than 3 poses or collinear positions.
pub fn align_pose_sets(
    src: &[RigidTransform],
    dst: &[RigidTransform],
) -> Result<RigidTransform, RegistrationError> {
    check_lengths("source poses", src, "destination poses", dst)?;
    let src_positions: Vec<[f64; 3]> = src.iter().map(|p| p.translation).collect();
    let dst_positions: Vec<[f64; 3]> = dst.iter().map(|p| p.translation).collect();
    estimate_rigid_transform(&src_positions, &dst_positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Degeneracy;
    use approx::assert_relative_eq;

    #[test]
    fn test_align_pose_sets() -> Result<(), Box<dyn std::error::Error>> {
        let offset = RigidTransform::from_axis_angle(&[1.0, 1.0, 0.0], 0.7, [2.0, -1.0, 0.5])?;
        let src: Vec<RigidTransform> = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, 1.0, 1.0],
        ]
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            RigidTransform::from_rotation_vector(&[0.1 * i as f64, 0.0, 0.0], t)
        })
        .collect();
        let dst: Vec<RigidTransform> = src.iter().map(|p| offset.compose(p)).collect();

        let tf = align_pose_sets(&src, &dst)?;
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(tf.rotation[i][j], offset.rotation[i][j], epsilon = 1e-9);
            }
            assert_relative_eq!(tf.translation[i], offset.translation[i], epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_align_pose_sets_errors() {
        let poses = vec![RigidTransform::identity(); 3];
        let res = align_pose_sets(&poses, &poses[..2]);
        assert!(matches!(res, Err(RegistrationError::InvalidParameter(_))));

        let res = align_pose_sets(&poses[..2], &poses[..2]);
        assert!(matches!(
            res,
            Err(RegistrationError::DegenerateInput(Degeneracy::TooFewPoints { .. }))
        ));

        let line: Vec<RigidTransform> = (0..4)
            .map(|i| RigidTransform::new(RigidTransform::identity().rotation, [i as f64, 0.0, 0.0]))
            .collect();
        let res = align_pose_sets(&line, &line);
        assert_eq!(
            res,
            Err(RegistrationError::DegenerateInput(Degeneracy::Collinear))
        );
    }
}
