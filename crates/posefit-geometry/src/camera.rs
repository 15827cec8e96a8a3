use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Represents the polynomial distortion parameters of a camera
///
/// The model is the rational Brown-Conrady model applied to normalized image coordinates:
///
/// ```text
/// r2 = x² + y²
/// kr = (1 + k1 r2 + k2 r2² + k3 r2³) / (1 + k4 r2 + k5 r2² + k6 r2³)
/// xd = x kr + 2 p1 x y + p2 (r2 + 2 x²)
/// yd = y kr + p1 (r2 + 2 y²) + 2 p2 x y
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolynomialDistortion {
    /// The first radial distortion coefficient
    pub k1: f64,
    /// The second radial distortion coefficient
    pub k2: f64,
    /// The third radial distortion coefficient
    pub k3: f64,
    /// The fourth radial distortion coefficient
    pub k4: f64,
    /// The fifth radial distortion coefficient
    pub k5: f64,
    /// The sixth radial distortion coefficient
    pub k6: f64,
    /// The first tangential distortion coefficient
    pub p1: f64,
    /// The second tangential distortion coefficient
    pub p2: f64,
}

/// Maximum number of fixed-point iterations used to invert the distortion model.
const UNDISTORT_MAX_ITERS: usize = 20;

impl PolynomialDistortion {
    /// Build the model from coefficients in `(k1, k2, p1, p2[, k3[, k4, k5, k6]])` order.
    ///
    /// Accepted lengths are 4, 5 and 8.
    pub fn from_coefficients(coeffs: &[f64]) -> Result<Self, GeometryError> {
        let get = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        match coeffs.len() {
            4 | 5 | 8 => Ok(Self {
                k1: get(0),
                k2: get(1),
                p1: get(2),
                p2: get(3),
                k3: get(4),
                k4: get(5),
                k5: get(6),
                k6: get(7),
            }),
            n => Err(GeometryError::InvalidDistortionLength(n)),
        }
    }

    /// The coefficients in `(k1, k2, p1, p2, k3, k4, k5, k6)` order.
    pub fn coefficients(&self) -> [f64; 8] {
        [
            self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6,
        ]
    }

    /// Distort a point given in normalized image coordinates.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        // radial distortion
        let kr = (1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6)
            / (1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6);

        // tangential distortion
        let xd = x * kr + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * kr + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        (xd, yd)
    }

    /// Invert [`PolynomialDistortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, xd: f64, yd: f64) -> (f64, f64) {
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_MAX_ITERS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let icdist = (1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6)
                / (1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6);
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let nx = (xd - dx) * icdist;
            let ny = (yd - dy) * icdist;
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < 1e-14 {
                break;
            }
        }
        (x, y)
    }
}

/// Intrinsic parameters of a pinhole camera with optional lens distortion.
///
/// The camera matrix is row-major: `[[fx, s, cx], [0, fy, cy], [0, 0, 1]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCameraIntrinsics")]
pub struct CameraIntrinsics {
    /// 3x3 projection matrix, row-major.
    pub camera_matrix: [[f64; 3]; 3],
    /// Optional lens distortion, applied in normalized coordinates.
    pub distortion: Option<PolynomialDistortion>,
}

#[derive(Deserialize)]
struct RawCameraIntrinsics {
    camera_matrix: [[f64; 3]; 3],
    #[serde(default)]
    distortion: Option<PolynomialDistortion>,
}

impl TryFrom<RawCameraIntrinsics> for CameraIntrinsics {
    type Error = GeometryError;

    fn try_from(raw: RawCameraIntrinsics) -> Result<Self, Self::Error> {
        Self::new(raw.camera_matrix, raw.distortion)
    }
}

impl CameraIntrinsics {
    /// Create the intrinsics from a camera matrix and an optional distortion model.
    ///
    /// # Errors
    ///
    /// `InvalidFocalLength` unless both focal lengths are positive.
    pub fn new(
        camera_matrix: [[f64; 3]; 3],
        distortion: Option<PolynomialDistortion>,
    ) -> Result<Self, GeometryError> {
        let intrinsics = Self {
            camera_matrix,
            distortion,
        };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Check that both focal lengths are positive.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let (fx, fy) = (self.fx(), self.fy());
        if !(fx > 0.0 && fy > 0.0) {
            return Err(GeometryError::InvalidFocalLength { fx, fy });
        }
        Ok(())
    }

    /// Create distortion-free intrinsics from focal lengths and principal point.
    pub fn from_pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, GeometryError> {
        Self::new([[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]], None)
    }

    /// Attach distortion coefficients given in `(k1, k2, p1, p2[, k3[, k4, k5, k6]])` order.
    pub fn with_distortion_coefficients(self, coeffs: &[f64]) -> Result<Self, GeometryError> {
        Ok(Self {
            distortion: Some(PolynomialDistortion::from_coefficients(coeffs)?),
            ..self
        })
    }

    /// Focal length along x, in pixels.
    #[inline]
    pub fn fx(&self) -> f64 {
        self.camera_matrix[0][0]
    }

    /// Focal length along y, in pixels.
    #[inline]
    pub fn fy(&self) -> f64 {
        self.camera_matrix[1][1]
    }

    /// Principal point x coordinate, in pixels.
    #[inline]
    pub fn cx(&self) -> f64 {
        self.camera_matrix[0][2]
    }

    /// Principal point y coordinate, in pixels.
    #[inline]
    pub fn cy(&self) -> f64 {
        self.camera_matrix[1][2]
    }

    /// Axis skew.
    #[inline]
    pub fn skew(&self) -> f64 {
        self.camera_matrix[0][1]
    }

    /// Map normalized (and already distorted) coordinates to pixels.
    #[inline]
    pub fn normalized_to_pixel(&self, x: f64, y: f64) -> [f64; 2] {
        [
            self.fx() * x + self.skew() * y + self.cx(),
            self.fy() * y + self.cy(),
        ]
    }

    /// Map pixels to normalized coordinates without removing distortion.
    #[inline]
    pub fn pixel_to_normalized(&self, uv: &[f64; 2]) -> [f64; 2] {
        let y = (uv[1] - self.cy()) / self.fy();
        let x = (uv[0] - self.cx() - self.skew() * y) / self.fx();
        [x, y]
    }

    /// Project a point given in the camera frame to pixels.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, p_cam: &[f64; 3]) -> Option<[f64; 2]> {
        if p_cam[2] <= 0.0 {
            return None;
        }
        let inv_z = 1.0 / p_cam[2];
        let (x, y) = (p_cam[0] * inv_z, p_cam[1] * inv_z);
        let (xd, yd) = match &self.distortion {
            Some(d) => d.distort(x, y),
            None => (x, y),
        };
        Some(self.normalized_to_pixel(xd, yd))
    }

    /// Convert an observed pixel to undistorted normalized coordinates.
    pub fn undistort_pixel(&self, uv: &[f64; 2]) -> [f64; 2] {
        let [xd, yd] = self.pixel_to_normalized(uv);
        match &self.distortion {
            Some(d) => {
                let (x, y) = d.undistort(xd, yd);
                [x, y]
            }
            None => [xd, yd],
        }
    }

    /// Project a camera-frame point to `(u, v, depth)` with the pinhole part only.
    ///
    /// Skew is applied, distortion is not.
    pub fn project_with_depth(&self, p_cam: &[f64; 3]) -> [f64; 3] {
        let [x, y, z] = *p_cam;
        let [u, v] = self.normalized_to_pixel(x / z, y / z);
        [u, v, z]
    }

    /// Back-project `(u, v, depth)` to a camera-frame point with the pinhole part only.
    pub fn unproject_with_depth(&self, uvd: &[f64; 3]) -> [f64; 3] {
        let [u, v, d] = *uvd;
        let [x, y] = self.pixel_to_normalized(&[u, v]);
        [x * d, y * d, d]
    }
}
