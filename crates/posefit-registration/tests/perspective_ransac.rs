use approx::assert_relative_eq;
use posefit_geometry::{CameraIntrinsics, RigidTransform};
use posefit_registration::{
    estimate_perspective_transform_ransac, reprojection_error, EPnPParams, LMRefineParams,
    RansacParams,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Scene {
    object: Vec<[f64; 3]>,
    image: Vec<[f64; 2]>,
    outliers: Vec<usize>,
}

fn make_scene(
    tf: &RigidTransform,
    cam: &CameraIntrinsics,
    rng: &mut StdRng,
    num_points: usize,
) -> Scene {
    let mut scene = Scene {
        object: Vec::new(),
        image: Vec::new(),
        outliers: Vec::new(),
    };
    for i in 0..num_points {
        let p = [
            rng.random_range(-0.5..0.5),
            rng.random_range(-0.4..0.4),
            rng.random_range(-0.3..0.3),
        ];
        let mut uv = cam
            .project(&tf.apply(&p))
            .expect("scene points lie in front of the camera");
        if i % 5 == 2 {
            uv[0] += rng.random_range(30.0..80.0);
            uv[1] -= rng.random_range(30.0..80.0);
            scene.outliers.push(i);
        }
        scene.object.push(p);
        scene.image.push(uv);
    }
    scene
}

#[test]
fn perspective_ransac_rejects_pixel_outliers() -> Result<(), Box<dyn std::error::Error>> {
    let cam = CameraIntrinsics::from_pinhole(640.0, 640.0, 320.0, 240.0)?
        .with_distortion_coefficients(&[-0.15, 0.03, 5e-4, -3e-4, 0.0])?;
    let expected = RigidTransform::from_axis_angle(&[0.2, 1.0, -0.1], 0.5, [0.1, -0.05, 3.0])?;
    let mut rng = StdRng::seed_from_u64(21);
    let scene = make_scene(&expected, &cam, &mut rng, 40);

    let params = RansacParams {
        iterations: 200,
        sample_size: 6,
        threshold: 1.0,
        min_inliers: 10,
    };
    let result = estimate_perspective_transform_ransac(
        &scene.object,
        &scene.image,
        &cam,
        &params,
        &EPnPParams::default(),
        &mut rng,
    )?;

    let expected_inliers: Vec<usize> = (0..40).filter(|i| !scene.outliers.contains(i)).collect();
    assert_eq!(result.inliers, expected_inliers);
    for i in 0..3 {
        assert_relative_eq!(
            result.transform.translation[i],
            expected.translation[i],
            epsilon = 1e-5
        );
    }
    assert!(result.rmse < 1e-3);

    let errors = reprojection_error(&result.transform, &cam, &scene.object, &scene.image)?;
    for &i in &scene.outliers {
        assert!(errors[i] > 10.0);
    }
    Ok(())
}

#[test]
fn perspective_ransac_with_lm_refinement() -> Result<(), Box<dyn std::error::Error>> {
    let cam = CameraIntrinsics::from_pinhole(500.0, 520.0, 320.0, 240.0)?;
    let expected = RigidTransform::from_axis_angle(&[1.0, 0.0, 0.3], -0.4, [-0.2, 0.1, 2.5])?;
    let mut rng = StdRng::seed_from_u64(4);
    let mut scene = make_scene(&expected, &cam, &mut rng, 30);

    // small pixel noise on the inliers
    for (i, uv) in scene.image.iter_mut().enumerate() {
        if !scene.outliers.contains(&i) {
            uv[0] += rng.random_range(-0.3..0.3);
            uv[1] += rng.random_range(-0.3..0.3);
        }
    }

    let params = RansacParams {
        iterations: 300,
        sample_size: 6,
        threshold: 2.0,
        min_inliers: 12,
    };
    let epnp = EPnPParams {
        refine_lm: Some(LMRefineParams::default()),
        ..EPnPParams::default()
    };
    let result = estimate_perspective_transform_ransac(
        &scene.object,
        &scene.image,
        &cam,
        &params,
        &epnp,
        &mut rng,
    )?;

    for i in &scene.outliers {
        assert!(!result.inliers.contains(i));
    }
    assert!(result.inliers.len() >= 20);
    assert!(result.rmse < 0.5);
    for i in 0..3 {
        assert_relative_eq!(
            result.transform.translation[i],
            expected.translation[i],
            epsilon = 0.05
        );
    }
    Ok(())
}
