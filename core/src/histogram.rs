//! Folding per-keypoint quantizations into one document histogram.
//!
//! With a spatial resolution `R > 1` the image plane is split into an
//! `R x R` grid and the histogram holds one `K`-long block per cell, so its
//! length is `R^2 * K`. Keypoint positions are expected in `[0, 1] x [0, 1]`.

use crate::error::{Error, Result};
use crate::quantize::{quantize_samples, Quantizer};
use crate::vocabulary::Vocabulary;
use crate::Sample;

/// Normalized `(x, y)` keypoint position.
pub type KeyPoint = [f32; 2];

/// Linear grid cell of a keypoint: `row * R + col`. Coordinates equal to 1.0
/// land in the last row/column, negative ones in the first.
pub fn spatial_bin(point: KeyPoint, resolution: usize) -> usize {
    let cell = |v: f32| ((v.max(0.0) * resolution as f32) as usize).min(resolution - 1);
    cell(point[1]) * resolution + cell(point[0])
}

/// Sums `quantized` into a histogram of `resolution^2 * vocabulary_size` bins.
///
/// `keypoints` is only read when `resolution > 1` and must then match
/// `quantized` in length. With `normalize` every bin is divided by the number
/// of keypoints. An empty `quantized` yields an all-zero histogram.
pub fn build_histogram(
    quantized: &[Vec<f32>],
    vocabulary_size: usize,
    normalize: bool,
    keypoints: &[KeyPoint],
    resolution: usize,
) -> Result<Vec<f32>> {
    if vocabulary_size == 0 {
        return Err(Error::invalid("vocabulary size must be positive"));
    }
    if resolution == 0 {
        return Err(Error::invalid("spatial resolution must be positive"));
    }
    if resolution > 1 {
        Error::check_dimension(quantized.len(), keypoints.len())?;
    }

    let mut hist = vec![0.0f32; resolution * resolution * vocabulary_size];
    for (i, q) in quantized.iter().enumerate() {
        Error::check_dimension(vocabulary_size, q.len())?;
        let offset = if resolution > 1 {
            spatial_bin(keypoints[i], resolution) * vocabulary_size
        } else {
            0
        };
        for (bin, &v) in hist[offset..offset + vocabulary_size].iter_mut().zip(q) {
            *bin += v;
        }
    }

    if normalize && !quantized.is_empty() {
        let n = quantized.len() as f32;
        hist.iter_mut().for_each(|v| *v /= n);
    }
    Ok(hist)
}

/// Quantizes all features of one document and folds them into a plain
/// (non-spatial) histogram. Normalization follows the quantizer's preference.
pub fn quantize_document<Q: Quantizer + ?Sized>(
    features: &[Sample],
    vocabulary: &Vocabulary,
    quantizer: &Q,
) -> Result<Vec<f32>> {
    quantize_document_spatial(features, &[], vocabulary, quantizer, 1)
}

/// Like [`quantize_document`], binning each feature by its keypoint position.
pub fn quantize_document_spatial<Q: Quantizer + ?Sized>(
    features: &[Sample],
    keypoints: &[KeyPoint],
    vocabulary: &Vocabulary,
    quantizer: &Q,
    resolution: usize,
) -> Result<Vec<f32>> {
    let quantized = quantize_samples(features, vocabulary, quantizer)?;
    build_histogram(
        &quantized,
        vocabulary.len(),
        quantizer.normalizes_histogram(),
        keypoints,
        resolution,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::SquaredEuclidean;
    use crate::quantize::{FuzzyQuantizer, HardQuantizer};

    fn one_hot(k: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; k];
        v[i] = 1.0;
        v
    }

    #[test]
    fn plain_histogram_counts_words() {
        let q = vec![one_hot(3, 0), one_hot(3, 2), one_hot(3, 2)];
        let h = build_histogram(&q, 3, false, &[], 1).unwrap();
        assert_eq!(h, vec![1.0, 0.0, 2.0]);
    }

    #[test]
    fn empty_document_gives_zero_histogram() {
        assert_eq!(build_histogram(&[], 4, true, &[], 1).unwrap(), vec![0.0; 4]);
        assert_eq!(build_histogram(&[], 2, false, &[], 3).unwrap(), vec![0.0; 18]);
    }

    #[test]
    fn spatial_bins_clamp_at_the_upper_edge() {
        assert_eq!(spatial_bin([0.0, 0.0], 2), 0);
        assert_eq!(spatial_bin([0.99, 0.0], 2), 1);
        assert_eq!(spatial_bin([0.0, 0.6], 2), 2);
        assert_eq!(spatial_bin([1.0, 1.0], 2), 3);
        assert_eq!(spatial_bin([-0.1, 1.0], 4), 12);
    }

    #[test]
    fn spatial_histogram_places_words_in_cell_blocks() {
        let q = vec![one_hot(2, 1), one_hot(2, 0)];
        let kp = [[1.0, 1.0], [0.2, 0.7]];
        let h = build_histogram(&q, 2, false, &kp, 2).unwrap();
        // cell 3 holds word 1, cell 2 holds word 0
        assert_eq!(h, vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn normalization_divides_by_keypoint_count() {
        let q = vec![one_hot(2, 0), one_hot(2, 0), one_hot(2, 1), one_hot(2, 1)];
        let h = build_histogram(&q, 2, true, &[], 1).unwrap();
        assert_eq!(h, vec![0.5, 0.5]);
    }

    #[test]
    fn rejects_bad_shapes() {
        let q = vec![one_hot(3, 0)];
        assert!(matches!(build_histogram(&q, 2, false, &[], 1), Err(Error::DimensionMismatch { .. })));
        assert!(matches!(build_histogram(&q, 3, false, &[], 2), Err(Error::DimensionMismatch { .. })));
        assert!(matches!(build_histogram(&q, 0, false, &[], 1), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(build_histogram(&q, 3, false, &[], 0), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn quantize_document_respects_quantizer_normalization() {
        let vocab = Vocabulary::new(vec![vec![0.0], vec![10.0]]).unwrap();
        let features = vec![vec![0.1], vec![9.0], vec![11.0]];

        let hard = quantize_document(&features, &vocab, &HardQuantizer::<SquaredEuclidean>::default()).unwrap();
        assert_eq!(hard, vec![1.0, 2.0]);

        let fuzzy = FuzzyQuantizer::new(2.0, SquaredEuclidean).unwrap();
        let soft = quantize_document(&features, &vocab, &fuzzy).unwrap();
        let total: f32 = soft.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn quantize_document_spatial_uses_keypoints() {
        let vocab = Vocabulary::new(vec![vec![0.0], vec![10.0]]).unwrap();
        let features = vec![vec![0.0], vec![10.0]];
        let kp = [[0.0, 0.0], [0.9, 0.9]];
        let h = quantize_document_spatial(&features, &kp, &vocab, &HardQuantizer::<SquaredEuclidean>::default(), 2)
            .unwrap();
        assert_eq!(h.len(), 8);
        assert_eq!(h[0], 1.0);
        assert_eq!(h[3 * 2 + 1], 1.0);
        assert_eq!(h.iter().sum::<f32>(), 2.0);
    }
}
