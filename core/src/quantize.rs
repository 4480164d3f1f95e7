//! Mapping feature vectors onto the vocabulary.
//!
//! A quantizer turns one sample into a vector of length `vocabulary.len()`.
//! [`HardQuantizer`] produces a one-hot vector at the nearest visual word;
//! [`FuzzyQuantizer`] spreads unit mass over all words with a Gaussian
//! kernel. Both share the [`Quantizer`] trait so histogram building and the
//! retrieval driver do not care which one is in use.

use crate::distance::{Distance, SquaredEuclidean};
use crate::error::{Error, Result};
use crate::vocabulary::Vocabulary;
use crate::Sample;
use rayon::prelude::*;

pub trait Quantizer: Send + Sync {
    fn quantize(&self, sample: &[f32], vocabulary: &Vocabulary) -> Result<Vec<f32>>;

    /// Whether a document histogram built from this quantizer's output should be
    /// divided by the number of keypoints.
    ///
    /// Soft assignments are normalized so that dense keypoint sets do not
    /// dominate; hard counts are left as-is.
    fn normalizes_histogram(&self) -> bool {
        false
    }
}

impl<Q: Quantizer + ?Sized> Quantizer for Box<Q> {
    fn quantize(&self, sample: &[f32], vocabulary: &Vocabulary) -> Result<Vec<f32>> {
        (**self).quantize(sample, vocabulary)
    }

    fn normalizes_histogram(&self) -> bool {
        (**self).normalizes_histogram()
    }
}

/// One-hot assignment to the nearest visual word; ties go to the lowest index.
#[derive(Debug, Clone, Default)]
pub struct HardQuantizer<D = SquaredEuclidean> {
    distance: D,
}

impl<D: Distance> HardQuantizer<D> {
    pub fn new(distance: D) -> Self {
        Self { distance }
    }

    /// Index of the nearest visual word.
    pub fn nearest_word(&self, sample: &[f32], vocabulary: &Vocabulary) -> Result<usize> {
        vocabulary.nearest(sample, &self.distance).map(|(i, _)| i)
    }
}

impl<D: Distance> Quantizer for HardQuantizer<D> {
    fn quantize(&self, sample: &[f32], vocabulary: &Vocabulary) -> Result<Vec<f32>> {
        let word = self.nearest_word(sample, vocabulary)?;
        let mut out = vec![0.0; vocabulary.len()];
        out[word] = 1.0;
        Ok(out)
    }
}

/// Soft assignment: word `i` receives `exp(-d_i^2 / 2 sigma^2)`, normalized so
/// the weights sum to one.
#[derive(Debug, Clone)]
pub struct FuzzyQuantizer<D = SquaredEuclidean> {
    sigma: f32,
    distance: D,
}

impl<D: Distance> FuzzyQuantizer<D> {
    pub fn new(sigma: f32, distance: D) -> Result<Self> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(Error::invalid(format!("fuzzy quantizer sigma must be positive, got {sigma}")));
        }
        Ok(Self { sigma, distance })
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }
}

impl<D: Distance> Quantizer for FuzzyQuantizer<D> {
    fn quantize(&self, sample: &[f32], vocabulary: &Vocabulary) -> Result<Vec<f32>> {
        Error::check_dimension(vocabulary.dimension(), sample.len())?;
        let two_sigma_sq = 2.0 * self.sigma * self.sigma;

        let mut out: Vec<f32> = vocabulary
            .centers()
            .iter()
            .map(|center| {
                let d = self.distance.distance(sample, center);
                (-d * d / two_sigma_sq).exp()
            })
            .collect();

        let sum: f32 = out.iter().sum();
        if sum > 0.0 && sum.is_finite() {
            for v in &mut out {
                *v /= sum;
            }
        } else {
            // every weight underflowed; fall back to the nearest word
            let (word, _) = vocabulary.nearest(sample, &self.distance)?;
            out.iter_mut().for_each(|v| *v = 0.0);
            out[word] = 1.0;
        }
        Ok(out)
    }

    fn normalizes_histogram(&self) -> bool {
        true
    }
}

/// Hard-quantizes one sample under squared Euclidean distance.
pub fn quantize(sample: &[f32], vocabulary: &Vocabulary) -> Result<Vec<f32>> {
    HardQuantizer::<SquaredEuclidean>::default().quantize(sample, vocabulary)
}

/// Quantizes every sample independently, in parallel. Output order matches input order.
pub fn quantize_samples<Q: Quantizer + ?Sized>(
    samples: &[Sample],
    vocabulary: &Vocabulary,
    quantizer: &Q,
) -> Result<Vec<Vec<f32>>> {
    samples
        .par_iter()
        .map(|sample| quantizer.quantize(sample, vocabulary))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Manhattan;

    fn vocab() -> Vocabulary {
        Vocabulary::new(vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap()
    }

    #[test]
    fn hard_quantizer_is_one_hot_at_nearest() {
        let v = vocab();
        assert_eq!(quantize(&[0.9, 0.1], &v).unwrap(), vec![0.0, 1.0, 0.0]);
        assert_eq!(quantize(&[0.1, 0.8], &v).unwrap(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn hard_quantizer_breaks_ties_toward_lowest_index() {
        let v = vocab();
        // equidistant from all three words
        assert_eq!(quantize(&[0.5, 0.5], &v).unwrap(), vec![1.0, 0.0, 0.0]);
        assert_eq!(HardQuantizer::new(Manhattan).nearest_word(&[1.0, 1.0], &v).unwrap(), 1);
    }

    #[test]
    fn hard_quantizer_rejects_wrong_dimension() {
        assert!(matches!(
            quantize(&[0.0, 0.0, 0.0], &vocab()),
            Err(Error::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn fuzzy_quantizer_sums_to_one_and_peaks_at_nearest() {
        let q = FuzzyQuantizer::new(0.5, SquaredEuclidean).unwrap();
        let out = q.quantize(&[0.9, 0.0], &vocab()).unwrap();
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(out[1] > out[0] && out[1] > out[2]);
        assert!(q.normalizes_histogram());
        assert!(!HardQuantizer::<SquaredEuclidean>::default().normalizes_histogram());
    }

    #[test]
    fn fuzzy_quantizer_falls_back_to_hard_on_underflow() {
        let q = FuzzyQuantizer::new(1e-3, SquaredEuclidean).unwrap();
        let out = q.quantize(&[50.0, 0.0], &vocab()).unwrap();
        assert_eq!(out, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn fuzzy_quantizer_requires_positive_sigma() {
        assert!(FuzzyQuantizer::new(0.0, SquaredEuclidean).is_err());
        assert!(FuzzyQuantizer::new(f32::NAN, SquaredEuclidean).is_err());
    }

    #[test]
    fn batch_quantization_preserves_order() {
        let v = vocab();
        let samples = vec![vec![0.0, 0.9], vec![0.0, 0.0], vec![1.2, 0.1]];
        let out = quantize_samples(&samples, &v, &HardQuantizer::<SquaredEuclidean>::default()).unwrap();
        let words: Vec<usize> = out
            .iter()
            .map(|h| h.iter().position(|&x| x == 1.0).unwrap())
            .collect();
        assert_eq!(words, vec![2, 0, 1]);
    }
}
