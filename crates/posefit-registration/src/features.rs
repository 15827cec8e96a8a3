//! Model-to-frame registration driven by feature descriptors.

use posefit_geometry::{CameraIntrinsics, RigidTransform};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::correspondence::{
    retrieve_correspondences, DescriptorMatcher, DescriptorSet, DuplicatePolicy,
};
use crate::error::RegistrationError;
use crate::pnp::EPnPParams;
use crate::ransac::{
    estimate_perspective_transform_ransac, estimate_rigid_transform_ransac, RansacParams,
    RansacResult,
};

/// Pose of a stored model in an observed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRegistration {
    /// Transform mapping model coordinates into the frame.
    pub transform: RigidTransform,
    /// Inlier correspondences as `(frame_idx, model_idx)`, ascending in the frame index.
    pub inliers: Vec<(usize, usize)>,
    /// Root mean square residual over the inliers.
    pub rmse: f64,
    /// Number of putative correspondences fed to RANSAC.
    pub num_correspondences: usize,
}

impl FeatureRegistration {
    fn from_ransac(result: RansacResult, pairs: &[(usize, usize)]) -> Self {
        Self {
            transform: result.transform,
            inliers: result.inliers.iter().map(|&i| pairs[i]).collect(),
            rmse: result.rmse,
            num_correspondences: pairs.len(),
        }
    }
}

/// Locate a 3-D model in a 3-D frame from feature matches.
///
/// Frame features are the matching queries, model features the reference.
///
/// # Arguments
///
/// * `frame_points` - 3-D feature locations observed in the frame.
/// * `frame_desc` - Frame descriptors, index-aligned with `frame_points`.
/// * `model_points` - 3-D feature locations of the model.
/// * `model_desc` - Model descriptors, index-aligned with `model_points`.
/// * `matcher` - Descriptor matcher.
/// * `policy` - Treatment of frame features matched to the same model feature.
/// * `params` - RANSAC parameters, distances in the units of the points.
/// * `rng` - Random source driving the sampling.
#[allow(clippy::too_many_arguments)]
pub fn register_features_3d<M, R>(
    frame_points: &[[f64; 3]],
    frame_desc: &DescriptorSet,
    model_points: &[[f64; 3]],
    model_desc: &DescriptorSet,
    matcher: &M,
    policy: DuplicatePolicy,
    params: &RansacParams,
    rng: &mut R,
) -> Result<FeatureRegistration, RegistrationError>
where
    M: DescriptorMatcher + ?Sized,
    R: Rng + ?Sized,
{
    let corr = retrieve_correspondences(
        frame_points,
        frame_desc,
        model_points,
        model_desc,
        matcher,
        policy,
    )?;
    log::debug!("register 3d-3d: {} correspondences", corr.len());

    let result =
        estimate_rigid_transform_ransac(&corr.reference_points, &corr.query_points, params, rng)?;
    Ok(FeatureRegistration::from_ransac(result, &corr.pairs))
}

/// Locate a 3-D model in an image from feature matches.
///
/// # Arguments
///
/// * `frame_pixels` - Pixel locations of the image features.
/// * `frame_desc` - Image descriptors, index-aligned with `frame_pixels`.
/// * `model_points` - 3-D feature locations of the model.
/// * `model_desc` - Model descriptors, index-aligned with `model_points`.
/// * `intrinsics` - Camera matrix and optional distortion of the image.
/// * `matcher` - Descriptor matcher.
/// * `policy` - Treatment of image features matched to the same model feature.
/// * `params` - RANSAC parameters, threshold in pixels.
/// * `epnp` - Perspective solver parameters.
/// * `rng` - Random source driving the sampling.
#[allow(clippy::too_many_arguments)]
pub fn register_features_2d<M, R>(
    frame_pixels: &[[f64; 2]],
    frame_desc: &DescriptorSet,
    model_points: &[[f64; 3]],
    model_desc: &DescriptorSet,
    intrinsics: &CameraIntrinsics,
    matcher: &M,
    policy: DuplicatePolicy,
    params: &RansacParams,
    epnp: &EPnPParams,
    rng: &mut R,
) -> Result<FeatureRegistration, RegistrationError>
where
    M: DescriptorMatcher + ?Sized,
    R: Rng + ?Sized,
{
    let corr = retrieve_correspondences(
        frame_pixels,
        frame_desc,
        model_points,
        model_desc,
        matcher,
        policy,
    )?;
    log::debug!("register 2d-3d: {} correspondences", corr.len());

    let result = estimate_perspective_transform_ransac(
        &corr.reference_points,
        &corr.query_points,
        intrinsics,
        params,
        epnp,
        rng,
    )?;
    Ok(FeatureRegistration::from_ransac(result, &corr.pairs))
}
