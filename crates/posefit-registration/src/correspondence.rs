//! Descriptor matching and correspondence retrieval.

use serde::{Deserialize, Serialize};

use crate::error::{ParameterError, RegistrationError};

/// A set of fixed-length descriptors stored contiguously, one row per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptorSet")]
pub struct DescriptorSet {
    dim: usize,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct RawDescriptorSet {
    dim: usize,
    data: Vec<f32>,
}

impl TryFrom<RawDescriptorSet> for DescriptorSet {
    type Error = RegistrationError;

    fn try_from(raw: RawDescriptorSet) -> Result<Self, Self::Error> {
        Self::new(raw.dim, raw.data)
    }
}

impl DescriptorSet {
    /// Wrap a flat row-major buffer of `data.len() / dim` descriptors.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `dim` is zero or does not divide the buffer length.
    pub fn new(dim: usize, data: Vec<f32>) -> Result<Self, RegistrationError> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(ParameterError::DescriptorDimension {
                dim,
                len: data.len(),
            }
            .into());
        }
        Ok(Self { dim, data })
    }

    /// Build a set from individual descriptors of equal length.
    pub fn from_rows<const D: usize>(rows: &[[f32; D]]) -> Result<Self, RegistrationError> {
        Self::new(D, rows.iter().flatten().copied().collect())
    }

    /// Descriptor length.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    /// Whether the set holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The flat row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Descriptor `i`, or `None` if out of range.
    pub fn get(&self, i: usize) -> Option<&[f32]> {
        self.data.get(i * self.dim..(i + 1) * self.dim)
    }

    /// Iterate over the descriptors in index order.
    pub fn iter(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.dim)
    }

    /// The descriptors at `indices`, in that order.
    ///
    /// PRECONDITION: every index is below `self.len()`.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.dim);
        for &i in indices {
            data.extend_from_slice(&self.data[i * self.dim..(i + 1) * self.dim]);
        }
        Self {
            dim: self.dim,
            data,
        }
    }
}

/// A single putative match between a query and a reference descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptorMatch {
    /// Index into the query set.
    pub query_idx: usize,
    /// Index into the reference set.
    pub reference_idx: usize,
    /// Descriptor distance, smaller is better.
    pub distance: f32,
}

/// Anything that turns two descriptor sets into putative matches.
pub trait DescriptorMatcher {
    /// Match every query descriptor against the reference set.
    fn match_descriptors(
        &self,
        query: &DescriptorSet,
        reference: &DescriptorSet,
    ) -> Result<Vec<DescriptorMatch>, RegistrationError>;
}

/// Exhaustive nearest-neighbour matcher on the Euclidean distance.
///
/// Optionally filters matches by maximum distance, cross-check, and Lowe's ratio test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BruteForceMatcher {
    /// If set, discard matches with a distance above this threshold.
    pub max_distance: Option<f32>,
    /// If true, keep only mutual nearest neighbors.
    pub cross_check: bool,
    /// If set, apply Lowe's ratio test (best / second-best < ratio).
    pub max_ratio: Option<f32>,
}

#[inline]
fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

impl DescriptorMatcher for BruteForceMatcher {
    fn match_descriptors(
        &self,
        query: &DescriptorSet,
        reference: &DescriptorSet,
    ) -> Result<Vec<DescriptorMatch>, RegistrationError> {
        if query.dim() != reference.dim() {
            return Err(ParameterError::DescriptorMismatch {
                query: query.dim(),
                reference: reference.dim(),
            }
            .into());
        }

        let m = query.len();
        let n = reference.len();
        if m == 0 || n == 0 {
            return Ok(vec![]);
        }

        // Forward pass: for each query, find best and second-best reference.
        let mut fwd_best_j = vec![0usize; m];
        let mut fwd_best_dist = vec![f32::INFINITY; m];
        let mut fwd_second_dist = vec![f32::INFINITY; m];
        // Reverse pass bookkeeping, filled in the same sweep.
        let mut rev_best_i = vec![0usize; n];
        let mut rev_best_dist = vec![f32::INFINITY; n];

        for (i, d1) in query.iter().enumerate() {
            for (j, d2) in reference.iter().enumerate() {
                let dist = l2_distance(d1, d2);
                if dist < fwd_best_dist[i] {
                    fwd_second_dist[i] = fwd_best_dist[i];
                    fwd_best_dist[i] = dist;
                    fwd_best_j[i] = j;
                } else if dist < fwd_second_dist[i] {
                    fwd_second_dist[i] = dist;
                }
                if dist < rev_best_dist[j] {
                    rev_best_dist[j] = dist;
                    rev_best_i[j] = i;
                }
            }
        }

        // Build matches applying all filters in one pass.
        let mut matches = Vec::new();
        for i in 0..m {
            let j = fwd_best_j[i];
            let best_dist = fwd_best_dist[i];

            if let Some(max_dist) = self.max_distance {
                if best_dist > max_dist {
                    continue;
                }
            }

            if self.cross_check && rev_best_i[j] != i {
                continue;
            }

            if let Some(ratio) = self.max_ratio {
                if ratio < 1.0 {
                    let second = fwd_second_dist[i];
                    let denom = if second == 0.0 { f32::EPSILON } else { second };
                    if best_dist / denom >= ratio {
                        continue;
                    }
                }
            }

            matches.push(DescriptorMatch {
                query_idx: i,
                reference_idx: j,
                distance: best_dist,
            });
        }

        log::trace!("brute force matcher: {} of {} queries matched", matches.len(), m);
        Ok(matches)
    }
}

/// How to treat several queries matched to the same reference feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Keep every match.
    KeepAll,
    /// Keep the smallest-distance match per reference index, ties to the lower query index.
    #[default]
    UniqueReference,
}

/// Index correspondences with the matching coordinate subsets.
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondences<Q, R> {
    /// `(query_idx, reference_idx)` pairs, ascending in the query index.
    pub pairs: Vec<(usize, usize)>,
    /// Descriptor distance of each pair.
    pub distances: Vec<f32>,
    /// Query coordinates, index-aligned with `pairs`.
    pub query_points: Vec<Q>,
    /// Reference coordinates, index-aligned with `pairs`.
    pub reference_points: Vec<R>,
}

impl<Q, R> Correspondences<Q, R> {
    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether no correspondence was found.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Match descriptors and gather the coordinates of the matched features.
///
/// # Arguments
///
/// * `query_points` - Coordinates of the query features.
/// * `query_desc` - Query descriptors, index-aligned with `query_points`.
/// * `reference_points` - Coordinates of the reference features.
/// * `reference_desc` - Reference descriptors, index-aligned with `reference_points`.
/// * `matcher` - Descriptor matcher.
/// * `policy` - Treatment of matches sharing a reference feature.
///
/// # Errors
///
/// `InvalidParameter` if a descriptor set and its point set differ in length, or the matcher
/// rejects the descriptor sets.
pub fn retrieve_correspondences<Q, R, M>(
    query_points: &[Q],
    query_desc: &DescriptorSet,
    reference_points: &[R],
    reference_desc: &DescriptorSet,
    matcher: &M,
    policy: DuplicatePolicy,
) -> Result<Correspondences<Q, R>, RegistrationError>
where
    Q: Copy,
    R: Copy,
    M: DescriptorMatcher + ?Sized,
{
    if query_points.len() != query_desc.len() {
        return Err(ParameterError::MismatchedLengths {
            left_name: "query points",
            left_len: query_points.len(),
            right_name: "query descriptors",
            right_len: query_desc.len(),
        }
        .into());
    }
    if reference_points.len() != reference_desc.len() {
        return Err(ParameterError::MismatchedLengths {
            left_name: "reference points",
            left_len: reference_points.len(),
            right_name: "reference descriptors",
            right_len: reference_desc.len(),
        }
        .into());
    }

    let raw = matcher.match_descriptors(query_desc, reference_desc)?;
    let num_raw = raw.len();

    let mut matches: Vec<DescriptorMatch> = raw
        .into_iter()
        .filter(|m| {
            let in_range =
                m.query_idx < query_points.len() && m.reference_idx < reference_points.len();
            if !in_range {
                log::debug!("dropping out of range match {m:?}");
            }
            in_range
        })
        .collect();

    if policy == DuplicatePolicy::UniqueReference {
        matches = unique_by_reference(matches);
    }
    matches.sort_by_key(|m| (m.query_idx, m.reference_idx));

    log::debug!(
        "retrieved {} correspondences from {} matches ({:?})",
        matches.len(),
        num_raw,
        policy
    );

    let mut out = Correspondences {
        pairs: Vec::with_capacity(matches.len()),
        distances: Vec::with_capacity(matches.len()),
        query_points: Vec::with_capacity(matches.len()),
        reference_points: Vec::with_capacity(matches.len()),
    };
    for m in &matches {
        out.pairs.push((m.query_idx, m.reference_idx));
        out.distances.push(m.distance);
        out.query_points.push(query_points[m.query_idx]);
        out.reference_points.push(reference_points[m.reference_idx]);
    }

    Ok(out)
}

fn unique_by_reference(mut matches: Vec<DescriptorMatch>) -> Vec<DescriptorMatch> {
    matches.sort_by(|a, b| {
        a.reference_idx
            .cmp(&b.reference_idx)
            .then(a.distance.total_cmp(&b.distance))
            .then(a.query_idx.cmp(&b.query_idx))
    });
    matches.dedup_by_key(|m| m.reference_idx);
    matches
}
