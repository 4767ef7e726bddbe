//! Static distance-based classifiers
//!
//! Each metric reduces a (reading, reference fingerprint) pair to a scalar
//! distance; the candidate with the smallest distance wins. Sorting is
//! stable, so ties resolve to the candidate that appears first in the
//! table's iteration order.

use crate::common::types::MagneticVector;
use crate::error::CoreError;
use crate::fingerprint::CandidateSet;

const KNN_K: usize = 3;

// Fixed weights for the weighted metric: the horizontal components carry
// more location information indoors than the vertical one.
const WEIGHT_XY: f64 = 1.5;
const WEIGHT_Z: f64 = 0.7;

/// The family of static distance metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Euclidean,
    Manhattan,
    Weighted,
    Knn3,
}

impl DistanceMetric {
    /// Scalar distance between a reading and one reference fingerprint.
    /// KNN scores individual candidates with the Euclidean metric.
    pub fn distance(self, reading: &MagneticVector, reference: &MagneticVector) -> f64 {
        let d = reading - reference;
        match self {
            DistanceMetric::Euclidean | DistanceMetric::Knn3 => d.norm(),
            DistanceMetric::Manhattan => d.x.abs() + d.y.abs() + d.z.abs(),
            DistanceMetric::Weighted => {
                (WEIGHT_XY * d.x * d.x + WEIGHT_XY * d.y * d.y + WEIGHT_Z * d.z * d.z).sqrt()
            }
        }
    }
}

/// Classify a reading against a candidate set, returning the matched
/// location id.
///
/// The candidate set must be non-empty; the window layer guarantees that,
/// so an empty slice here is a contract violation and comes back as
/// [`CoreError::EmptyCandidates`].
pub fn classify(
    reading: &MagneticVector,
    candidates: &CandidateSet<'_>,
    metric: DistanceMetric,
) -> Result<String, CoreError> {
    if candidates.is_empty() {
        return Err(CoreError::EmptyCandidates);
    }

    let mut distances: Vec<(&str, f64)> = candidates
        .iter()
        .map(|r| {
            (
                r.location_id.as_str(),
                metric.distance(reading, &r.fingerprint),
            )
        })
        .collect();
    // stable sort: equal distances keep table order
    distances.sort_by(|a, b| a.1.total_cmp(&b.1));

    if metric == DistanceMetric::Knn3 && distances.len() >= KNN_K {
        return Ok(plurality_vote(&distances[..KNN_K]).to_string());
    }
    Ok(distances[0].0.to_string())
}

/// Most frequent location among the nearest neighbors. Count ties break
/// toward the location that entered the neighbor list first.
fn plurality_vote<'a>(neighbors: &[(&'a str, f64)]) -> &'a str {
    let mut counts: Vec<(&str, usize)> = Vec::with_capacity(neighbors.len());
    for &(id, _) in neighbors {
        match counts.iter_mut().find(|(seen, _)| *seen == id) {
            Some((_, n)) => *n += 1,
            None => counts.push((id, 1)),
        }
    }
    let mut best = counts[0];
    for &entry in &counts[1..] {
        if entry.1 > best.1 {
            best = entry;
        }
    }
    best.0
}
