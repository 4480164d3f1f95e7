//! Distance metrics between equal-length feature vectors.
//!
//! Only dissimilarities live here: smaller values mean more similar
//! vectors. Every metric is non-negative for the inputs it is meant for
//! (`OneMinusDot` assumes unit-length vectors, `JensenShannon` assumes
//! non-negative histograms).
//!
//! The clustering, quantization and retrieval code is written against the
//! [`Distance`] trait, so any implementation can be plugged in. [`Metric`]
//! is the serializable selector used by configuration files and the CLI.

use serde::{Deserialize, Serialize};

/// A dissimilarity between two vectors of the same length.
///
/// Callers are responsible for checking lengths; implementations only look
/// at the common prefix.
pub trait Distance: Send + Sync {
    fn distance(&self, a: &[f32], b: &[f32]) -> f32;
}

impl<D: Distance + ?Sized> Distance for &D {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        (**self).distance(a, b)
    }
}

impl<D: Distance + ?Sized> Distance for Box<D> {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        (**self).distance(a, b)
    }
}

/// Squared Euclidean distance. Cheaper than [`Euclidean`] since it skips the `sqrt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredEuclidean;

impl Distance for SquaredEuclidean {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                let d = x - y;
                d * d
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl Distance for Euclidean {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        SquaredEuclidean.distance(a, b).sqrt()
    }
}

/// L1 distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manhattan;

impl Distance for Manhattan {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(&x, &y)| (x - y).abs()).sum()
    }
}

/// `1 - <a, b>`. Lies in `[0, 2]` when both inputs have unit length.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneMinusDot;

impl Distance for OneMinusDot {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(&x, &y)| x * y).sum();
        1.0 - dot
    }
}

/// Chi-squared distance `sum((a_i - b_i)^2 / (a_i + b_i))`.
///
/// `f32::EPSILON` is added to the denominator so that bins empty in both
/// inputs contribute zero instead of NaN.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChiSquared;

impl Distance for ChiSquared {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                let num = x - y;
                num * num / (x + y + f32::EPSILON)
            })
            .sum()
    }
}

/// Jensen-Shannon divergence (unscaled) between two non-negative histograms.
#[derive(Debug, Clone, Copy, Default)]
pub struct JensenShannon;

impl Distance for JensenShannon {
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                if x + y <= 0.0 {
                    return 0.0;
                }
                let n = 2.0 / (x + y);
                let left = if x > 0.0 { x * (x * n).ln() } else { 0.0 };
                let right = if y > 0.0 { y * (y * n).ln() } else { 0.0 };
                left + right
            })
            .sum()
    }
}

/// Serializable metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    SquaredEuclidean,
    Euclidean,
    Manhattan,
    OneMinusDot,
    ChiSquared,
    JensenShannon,
}

impl Distance for Metric {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::SquaredEuclidean => SquaredEuclidean.distance(a, b),
            Metric::Euclidean => Euclidean.distance(a, b),
            Metric::Manhattan => Manhattan.distance(a, b),
            Metric::OneMinusDot => OneMinusDot.distance(a, b),
            Metric::ChiSquared => ChiSquared.distance(a, b),
            Metric::JensenShannon => JensenShannon.distance(a, b),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "squared_euclidean" | "l2_squared" => Ok(Metric::SquaredEuclidean),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "manhattan" | "l1" => Ok(Metric::Manhattan),
            "one_minus_dot" | "cosine" => Ok(Metric::OneMinusDot),
            "chi_squared" | "chi2" => Ok(Metric::ChiSquared),
            "jensen_shannon" | "jsd" => Ok(Metric::JensenShannon),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}
