//! Initial center selection for k-means.

use crate::distance::Distance;
use crate::Sample;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    /// `K` distinct samples chosen uniformly at random.
    #[default]
    Random,
    /// Greedy k-means++ seeding.
    PlusPlus,
}

impl std::str::FromStr for InitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(InitStrategy::Random),
            "plus-plus" | "plus_plus" | "plusplus" | "++" => Ok(InitStrategy::PlusPlus),
            other => Err(format!("unknown init strategy: {other}")),
        }
    }
}

/// `k` distinct sample indices, uniformly at random. Requires `k <= n`.
pub(crate) fn init_random<R: Rng + ?Sized>(num_samples: usize, k: usize, rng: &mut R) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..num_samples).collect();
    indices.shuffle(rng);
    indices.truncate(k);
    indices
}

/// Greedy k-means++: the first center is uniform, every further one is the best
/// of `2 + ln(k)` candidates drawn proportionally to the squared distance to the
/// nearest center chosen so far, where "best" means the lowest resulting
/// potential (sum of squared min-distances). Requires `1 <= k <= n`.
pub(crate) fn init_plus_plus<D, R>(samples: &[Sample], k: usize, distance: &D, rng: &mut R) -> Vec<usize>
where
    D: Distance + ?Sized,
    R: Rng + ?Sized,
{
    let n = samples.len();
    let num_trials = 2 + (k as f64).ln() as usize;

    let mut chosen = vec![false; n];
    let mut centers = Vec::with_capacity(k);

    let first = rng.random_range(0..n);
    chosen[first] = true;
    centers.push(first);

    let mut min_dists: Vec<f64> = samples
        .iter()
        .map(|s| squared_distance(distance, &samples[first], s))
        .collect();
    let mut potential: f64 = min_dists.iter().sum();
    tracing::debug!(k, num_trials, n, potential, "k-means++ seeding");

    for c in 1..k {
        let mut best: Option<(usize, f64)> = None;

        for _ in 0..num_trials {
            let mut r = rng.random::<f64>() * potential;
            let mut candidate = 0;
            while candidate < n - 1 && r > min_dists[candidate] {
                r -= min_dists[candidate];
                candidate += 1;
            }
            // c < k <= n, so an unchosen index always exists
            while chosen[candidate] {
                candidate = (candidate + 1) % n;
            }

            let trial: f64 = samples
                .iter()
                .zip(&min_dists)
                .map(|(s, &current)| current.min(squared_distance(distance, &samples[candidate], s)))
                .sum();
            if best.map_or(true, |(_, p)| trial < p) {
                best = Some((candidate, trial));
            }
        }

        if let Some((index, trial_potential)) = best {
            for (slot, s) in min_dists.iter_mut().zip(samples) {
                *slot = slot.min(squared_distance(distance, &samples[index], s));
            }
            potential = trial_potential;
            chosen[index] = true;
            centers.push(index);
            tracing::trace!(center = c, index, potential, "k-means++ picked center");
        }
    }

    centers
}

fn squared_distance<D: Distance + ?Sized>(distance: &D, a: &[f32], b: &[f32]) -> f64 {
    let d = distance.distance(a, b) as f64;
    d * d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::SquaredEuclidean;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn random_init_yields_distinct_indices() {
        let mut rng = StdRng::seed_from_u64(1);
        let picked = init_random(10, 10, &mut rng);
        assert_eq!(picked.len(), 10);
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 10);
    }

    #[test]
    fn plus_plus_yields_k_distinct_indices_even_with_duplicates() {
        let samples = vec![vec![0.0, 0.0]; 6];
        let mut rng = StdRng::seed_from_u64(3);
        let picked = init_plus_plus(&samples, 4, &SquaredEuclidean, &mut rng);
        assert_eq!(picked.len(), 4);
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 4);
    }

    #[test]
    fn plus_plus_spreads_over_separated_groups() {
        let samples = vec![
            vec![0.0],
            vec![0.1],
            vec![100.0],
            vec![100.1],
            vec![200.0],
            vec![200.1],
        ];
        let mut rng = StdRng::seed_from_u64(11);
        let picked = init_plus_plus(&samples, 3, &SquaredEuclidean, &mut rng);
        let groups: HashSet<usize> = picked.iter().map(|&i| i / 2).collect();
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn parses_strategy_names() {
        assert_eq!("random".parse::<InitStrategy>().unwrap(), InitStrategy::Random);
        assert_eq!("plus-plus".parse::<InitStrategy>().unwrap(), InitStrategy::PlusPlus);
        assert!("other".parse::<InitStrategy>().is_err());
    }
}
