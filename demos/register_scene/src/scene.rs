use std::path::Path;

use posefit::geometry::{CameraIntrinsics, RigidTransform};
use posefit::registration::{
    estimate_perspective_transform_ransac, estimate_rigid_transform_ransac, EPnPParams,
    RansacParams, RansacResult, RegistrationError,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Correspondences stored in a scene file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SceneData {
    /// 3D-3D correspondences.
    Points {
        source: Vec<[f64; 3]>,
        target: Vec<[f64; 3]>,
    },
    /// 2D-3D correspondences observed by a camera.
    Pixels {
        object: Vec<[f64; 3]>,
        image: Vec<[f64; 2]>,
        intrinsics: CameraIntrinsics,
        #[serde(default)]
        epnp: EPnPParams,
    },
}

/// A registration problem loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub data: SceneData,
    #[serde(default)]
    pub ransac: RansacParams,
    #[serde(default)]
    pub seed: u64,
}

/// Summary written after a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub transform: RigidTransform,
    pub matrix: [[f64; 4]; 4],
    pub inliers: Vec<usize>,
    pub rmse: f64,
    pub num_models: usize,
}

impl From<RansacResult> for Report {
    fn from(result: RansacResult) -> Self {
        Self {
            matrix: result.transform.to_matrix4(),
            transform: result.transform,
            inliers: result.inliers,
            rmse: result.rmse,
            num_models: result.num_models,
        }
    }
}

impl Scene {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn num_correspondences(&self) -> usize {
        match &self.data {
            SceneData::Points { source, .. } => source.len(),
            SceneData::Pixels { object, .. } => object.len(),
        }
    }

    pub fn run(&self) -> Result<Report, RegistrationError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let result = match &self.data {
            SceneData::Points { source, target } => {
                estimate_rigid_transform_ransac(source, target, &self.ransac, &mut rng)?
            }
            SceneData::Pixels {
                object,
                image,
                intrinsics,
                epnp,
            } => estimate_perspective_transform_ransac(
                object,
                image,
                intrinsics,
                &self.ransac,
                epnp,
                &mut rng,
            )?,
        };
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_points_scene_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "data": {{
                    "kind": "points",
                    "source": [[0, 0, 0], [1, 0, 0], [0, 1, 0], [0, 0, 1], [5, 5, 5]],
                    "target": [[1, 2, 3], [2, 2, 3], [1, 3, 3], [1, 2, 4], [0, 0, 0]]
                }},
                "ransac": {{ "iterations": 50, "min_inliers": 4 }},
                "seed": 3
            }}"#
        )?;

        let scene = Scene::from_file(file.path())?;
        assert_eq!(scene.num_correspondences(), 5);
        assert_eq!(scene.ransac.sample_size, RansacParams::default().sample_size);

        let report = scene.run()?;
        assert_eq!(report.inliers, vec![0, 1, 2, 3]);
        assert!((report.matrix[0][3] - 1.0).abs() < 1e-9);
        assert_eq!(report.matrix[3], [0.0, 0.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_pixels_scene_requires_intrinsics() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{ "data": {{ "kind": "pixels", "object": [], "image": [] }} }}"#
        )?;
        assert!(Scene::from_file(file.path()).is_err());
        Ok(())
    }
}
