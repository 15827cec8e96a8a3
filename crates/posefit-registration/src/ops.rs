use nalgebra::{Matrix3, Vector3};

/// Compute the centroids of two sets of points.
pub(crate) fn compute_centroids(
    points1: &[[f64; 3]],
    points2: &[[f64; 3]],
) -> (Vector3<f64>, Vector3<f64>) {
    let mut centroid1 = Vector3::zeros();
    let mut centroid2 = Vector3::zeros();

    for (p1, p2) in points1.iter().zip(points2.iter()) {
        centroid1 += Vector3::from(*p1);
        centroid2 += Vector3::from(*p2);
    }

    centroid1 /= points1.len() as f64;
    centroid2 /= points2.len() as f64;

    (centroid1, centroid2)
}

/// Convert a nalgebra matrix to a row-major array.
#[inline]
pub(crate) fn matrix3_to_array33(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = m[(i, j)];
        }
    }
    out
}

/// Gather the elements of `values` at `indices`, preserving the index order.
pub(crate) fn gather<T: Copy>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_compute_centroids() {
        let points1 = vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let points2 = vec![[7.0, 8.0, 9.0], [10.0, 11.0, 12.0]];
        let (centroid1, centroid2) = compute_centroids(&points1, &points2);
        assert_relative_eq!(centroid1.x, 2.5, epsilon = 1e-12);
        assert_relative_eq!(centroid1.y, 3.5, epsilon = 1e-12);
        assert_relative_eq!(centroid1.z, 4.5, epsilon = 1e-12);
        assert_relative_eq!(centroid2.x, 8.5, epsilon = 1e-12);
        assert_relative_eq!(centroid2.y, 9.5, epsilon = 1e-12);
        assert_relative_eq!(centroid2.z, 10.5, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_layout() {
        let mat = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        assert_eq!(
            matrix3_to_array33(&mat),
            [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]
        );
    }

    #[test]
    fn test_gather() {
        let values = [10, 11, 12, 13];
        assert_eq!(gather(&values, &[3, 0, 3]), vec![13, 10, 13]);
    }
}
