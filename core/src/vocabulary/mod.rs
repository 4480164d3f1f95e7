//! Visual vocabulary: the cluster centers every feature is quantized against.

mod init;
mod kmeans;

pub use init::InitStrategy;
pub use kmeans::{ClusteringReport, KMeans};

use crate::config::VocabularyConfig;
use crate::distance::Distance;
use crate::error::{Error, Result};
use crate::Sample;
use serde::{Deserialize, Serialize};

/// An ordered set of `K` centers ("visual words") of dimension `D`.
///
/// Built once per corpus and read-only afterwards; share it behind an `Arc`.
/// Serializes as its list of centers; deserializing runs the same checks as [`Vocabulary::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Sample>", into = "Vec<Sample>")]
pub struct Vocabulary {
    centers: Vec<Sample>,
    dimension: usize,
}

impl Vocabulary {
    /// Wraps a set of centers, checking that it is non-empty and rectangular.
    pub fn new(centers: Vec<Sample>) -> Result<Self> {
        let dimension = validate_samples(&centers)?;
        Ok(Self { centers, dimension })
    }

    /// Number of visual words.
    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn centers(&self) -> &[Sample] {
        &self.centers
    }

    pub fn word(&self, index: usize) -> Option<&[f32]> {
        self.centers.get(index).map(Vec::as_slice)
    }

    /// Index and distance of the entry nearest to `sample`.
    pub fn nearest<D: Distance + ?Sized>(&self, sample: &[f32], distance: &D) -> Result<(usize, f32)> {
        Error::check_dimension(self.dimension, sample.len())?;
        Ok(nearest_center(sample, &self.centers, distance))
    }

    pub fn into_centers(self) -> Vec<Sample> {
        self.centers
    }
}

impl TryFrom<Vec<Sample>> for Vocabulary {
    type Error = Error;

    fn try_from(centers: Vec<Sample>) -> Result<Self> {
        Self::new(centers)
    }
}

impl From<Vocabulary> for Vec<Sample> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.centers
    }
}

/// Clusters `samples` into `config.num_clusters` groups and returns the centers.
pub fn build_vocabulary<D: Distance + ?Sized>(
    samples: &[Sample],
    config: &VocabularyConfig,
    distance: &D,
) -> Result<Vocabulary> {
    let mut kmeans = KMeans::new(samples, config.num_clusters, config.init, config.seed, distance)?;
    if let Some(threads) = config.threads {
        kmeans = kmeans.with_threads(threads);
    }
    let report = kmeans.run(config.max_iterations, config.min_change_fraction)?;
    tracing::info!(
        num_clusters = config.num_clusters,
        iterations = report.iterations,
        degenerate = report.degenerate_clusters,
        "vocabulary built"
    );
    kmeans.into_vocabulary()
}

/// Strictly nearest center; the lowest index wins ties.
pub(crate) fn nearest_center<D: Distance + ?Sized>(
    sample: &[f32],
    centers: &[Sample],
    distance: &D,
) -> (usize, f32) {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, center) in centers.iter().enumerate() {
        let d = distance.distance(sample, center);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    (best, best_dist)
}

/// Returns the common dimension of a non-empty, rectangular sample set.
pub(crate) fn validate_samples(samples: &[Sample]) -> Result<usize> {
    let first = samples
        .first()
        .ok_or_else(|| Error::invalid("sample collection is empty"))?;
    let dimension = first.len();
    if dimension == 0 {
        return Err(Error::invalid("samples have zero dimension"));
    }
    for sample in samples {
        Error::check_dimension(dimension, sample.len())?;
    }
    Ok(dimension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{Manhattan, SquaredEuclidean};

    #[test]
    fn json_goes_through_validation() {
        let vocab = Vocabulary::new(vec![vec![0.0, 1.0], vec![2.0, 3.0]]).unwrap();
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, "[[0.0,1.0],[2.0,3.0]]");
        assert_eq!(serde_json::from_str::<Vocabulary>(&json).unwrap(), vocab);

        assert!(serde_json::from_str::<Vocabulary>("[]").is_err());
        assert!(serde_json::from_str::<Vocabulary>("[[]]").is_err());
        let ragged = serde_json::from_str::<Vocabulary>("[[0.0, 1.0], [2.0]]").unwrap_err();
        assert!(ragged.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn rejects_empty_and_ragged_centers() {
        assert!(matches!(Vocabulary::new(vec![]), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(Vocabulary::new(vec![vec![]]), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(
            Vocabulary::new(vec![vec![0.0, 1.0], vec![2.0]]),
            Err(Error::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn nearest_prefers_lowest_index_on_ties() {
        let vocab = Vocabulary::new(vec![vec![1.0], vec![-1.0], vec![5.0]]).unwrap();
        let (idx, d) = vocab.nearest(&[0.0], &SquaredEuclidean).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(d, 1.0);
        assert_eq!(vocab.nearest(&[4.0], &Manhattan).unwrap().0, 2);
    }

    #[test]
    fn nearest_checks_dimension() {
        let vocab = Vocabulary::new(vec![vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            vocab.nearest(&[1.0], &SquaredEuclidean),
            Err(Error::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn build_vocabulary_separates_two_blobs() {
        let mut samples = Vec::new();
        for i in 0..20 {
            let jitter = i as f32 * 0.01;
            samples.push(vec![jitter, jitter]);
            samples.push(vec![10.0 + jitter, 10.0 - jitter]);
        }
        let config = VocabularyConfig { num_clusters: 2, seed: Some(7), ..VocabularyConfig::default() };
        let vocab = build_vocabulary(&samples, &config, &SquaredEuclidean).unwrap();
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.dimension(), 2);
        let mut firsts: Vec<f32> = vocab.centers().iter().map(|c| c[0]).collect();
        firsts.sort_by(f32::total_cmp);
        assert!(firsts[0] < 1.0);
        assert!(firsts[1] > 9.0);
    }
}
