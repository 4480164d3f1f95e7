//! Lloyd-style k-means with parallel assignment and empty-cluster repair.

use super::init::{init_plus_plus, init_random, InitStrategy};
use super::{nearest_center, validate_samples, Vocabulary};
use crate::distance::Distance;
use crate::error::{Error, Result};
use crate::Sample;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Number of consecutive samples a worker claims from the shared cursor at once.
const ASSIGN_CHUNK: usize = 256;

/// Summary of one [`KMeans::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusteringReport {
    /// Number of assignment passes performed.
    pub iterations: usize,
    /// Samples that changed cluster in each pass.
    pub changes: Vec<usize>,
    /// Clusters without members in the final assignment.
    pub degenerate_clusters: usize,
}

/// k-means over a borrowed sample set.
///
/// The assignment step fans out over scoped worker threads. Workers pull
/// contiguous chunks of the assignment array from a mutex-guarded cursor and
/// only ever write the slots of the chunk they claimed; the number of changed
/// assignments is summed through an atomic. Center update and empty-cluster
/// repair run on the calling thread once all workers have joined.
pub struct KMeans<'a, D: Distance + ?Sized> {
    samples: &'a [Sample],
    distance: &'a D,
    dimension: usize,
    centers: Vec<Sample>,
    assignments: Vec<usize>,
    num_threads: usize,
}

impl<'a, D: Distance + ?Sized> KMeans<'a, D> {
    /// Picks `num_clusters` initial centers from `samples`.
    ///
    /// Fails with `InvalidConfiguration` when the corpus is empty, has zero
    /// dimension, or `num_clusters` is 0 or larger than the sample count.
    pub fn new(
        samples: &'a [Sample],
        num_clusters: usize,
        init: InitStrategy,
        seed: Option<u64>,
        distance: &'a D,
    ) -> Result<Self> {
        let dimension = validate_samples(samples)?;
        if num_clusters == 0 {
            return Err(Error::invalid("number of clusters must be at least 1"));
        }
        if num_clusters > samples.len() {
            return Err(Error::invalid(format!(
                "number of clusters ({num_clusters}) exceeds number of samples ({})",
                samples.len()
            )));
        }

        let seed = seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);
        let initial = match init {
            InitStrategy::Random => init_random(samples.len(), num_clusters, &mut rng),
            InitStrategy::PlusPlus => init_plus_plus(samples, num_clusters, distance, &mut rng),
        };
        let centers = initial.iter().map(|&i| samples[i].clone()).collect();

        let num_threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

        Ok(Self {
            samples,
            distance,
            dimension,
            centers,
            assignments: vec![0; samples.len()],
            num_threads,
        })
    }

    /// Overrides the worker count (defaults to the available parallelism).
    #[must_use]
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Iterates until `max_iterations` assignment passes have run (0 means no
    /// limit) or a pass changes at most `ceil(n * min_change_fraction)`
    /// assignments.
    pub fn run(&mut self, max_iterations: usize, min_change_fraction: f64) -> Result<ClusteringReport> {
        if !(0.0..=1.0).contains(&min_change_fraction) {
            return Err(Error::invalid(format!(
                "min change fraction must lie in [0, 1], got {min_change_fraction}"
            )));
        }
        let threshold = (self.samples.len() as f64 * min_change_fraction).ceil() as usize;
        let mut report = ClusteringReport::default();

        loop {
            if max_iterations > 0 && report.iterations == max_iterations {
                break;
            }

            let changes = self.assign();
            report.iterations += 1;
            report.changes.push(changes);
            tracing::debug!(iteration = report.iterations, changes, "k-means assignment pass");

            if changes <= threshold {
                break;
            }

            let mut sizes = self.update_centers();
            let unrepaired = self.repair_empty_clusters(&mut sizes);
            if unrepaired > 0 {
                tracing::debug!(iteration = report.iterations, unrepaired, "empty clusters after repair");
            }
        }

        report.degenerate_clusters = self.cluster_sizes().iter().filter(|&&s| s == 0).count();
        if report.degenerate_clusters > 0 {
            tracing::warn!(count = report.degenerate_clusters, "k-means left clusters without members");
        }

        tracing::info!(
            iterations = report.iterations,
            samples = self.samples.len(),
            clusters = self.centers.len(),
            "k-means finished"
        );
        Ok(report)
    }

    /// Runs without an iteration limit until fewer than 1% of samples move.
    pub fn run_default(&mut self) -> Result<ClusteringReport> {
        self.run(0, 0.01)
    }

    pub fn centers(&self) -> &[Sample] {
        &self.centers
    }

    /// `assignments()[i]` is the cluster of sample `i`.
    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centers.len()];
        for &c in &self.assignments {
            sizes[c] += 1;
        }
        sizes
    }

    /// `table[c]` lists the indices of the samples assigned to cluster `c`.
    pub fn cluster_table(&self) -> Vec<Vec<usize>> {
        let mut table = vec![Vec::new(); self.centers.len()];
        for (i, &c) in self.assignments.iter().enumerate() {
            table[c].push(i);
        }
        table
    }

    pub fn into_vocabulary(self) -> Result<Vocabulary> {
        Vocabulary::new(self.centers)
    }

    /// One parallel assignment pass; returns how many samples changed cluster.
    fn assign(&mut self) -> usize {
        let samples = self.samples;
        let distance = self.distance;
        let centers = &self.centers;
        let workers = self
            .num_threads
            .min(samples.len().div_ceil(ASSIGN_CHUNK))
            .max(1);

        let cursor = Mutex::new(self.assignments.chunks_mut(ASSIGN_CHUNK).enumerate());
        let changes = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    let mut local = 0;
                    loop {
                        let claimed = cursor.lock().next();
                        let Some((chunk, slots)) = claimed else { break };
                        let base = chunk * ASSIGN_CHUNK;
                        for (offset, slot) in slots.iter_mut().enumerate() {
                            let (nearest, _) = nearest_center(&samples[base + offset], centers, distance);
                            if *slot != nearest {
                                *slot = nearest;
                                local += 1;
                            }
                        }
                    }
                    changes.fetch_add(local, Ordering::Relaxed);
                });
            }
        });

        changes.into_inner()
    }

    /// Moves every non-empty center to the mean of its members. Empty clusters
    /// keep their previous center. Returns the cluster sizes.
    fn update_centers(&mut self) -> Vec<usize> {
        let k = self.centers.len();
        let mut sums = vec![vec![0.0f64; self.dimension]; k];
        let mut sizes = vec![0usize; k];

        for (sample, &c) in self.samples.iter().zip(&self.assignments) {
            sizes[c] += 1;
            for (acc, &v) in sums[c].iter_mut().zip(sample) {
                *acc += v as f64;
            }
        }

        for ((center, sum), &size) in self.centers.iter_mut().zip(&sums).zip(&sizes) {
            if size == 0 {
                continue;
            }
            for (value, &acc) in center.iter_mut().zip(sum) {
                *value = (acc / size as f64) as f32;
            }
        }

        sizes
    }

    /// Refills empty clusters: each one takes over the farthest member of the
    /// cluster whose members are, on average, farthest from their center
    /// (mean squared distance). A source emptied by a move joins the queue of
    /// clusters to refill. Returns the number of clusters still empty.
    fn repair_empty_clusters(&mut self, sizes: &mut [usize]) -> usize {
        let k = self.centers.len();
        let mut empty: Vec<usize> = (0..k).filter(|&c| sizes[c] == 0).collect();
        let mut is_source: Vec<bool> = sizes.iter().map(|&s| s > 0).collect();

        while let Some(target) = empty.pop() {
            let mut spread = vec![0.0f64; k];
            let mut farthest: Vec<Option<(usize, f32)>> = vec![None; k];
            for (i, (sample, &c)) in self.samples.iter().zip(&self.assignments).enumerate() {
                if !is_source[c] {
                    continue;
                }
                let d = self.distance.distance(sample, &self.centers[c]);
                spread[c] += (d as f64) * (d as f64);
                if farthest[c].map_or(true, |(_, best)| d > best) {
                    farthest[c] = Some((i, d));
                }
            }

            let mut source: Option<(usize, f64)> = None;
            for c in (0..k).filter(|&c| is_source[c]) {
                let variance = spread[c] / sizes[c] as f64;
                if source.map_or(true, |(_, best)| variance > best) {
                    source = Some((c, variance));
                }
            }
            let Some((source, variance)) = source else {
                empty.push(target);
                break;
            };
            let Some((member, _)) = farthest[source] else {
                empty.push(target);
                break;
            };

            self.centers[target] = self.samples[member].clone();
            self.assignments[member] = target;
            sizes[source] -= 1;
            sizes[target] = 1;
            if sizes[source] == 0 {
                is_source[source] = false;
                empty.insert(0, source);
            }
            tracing::debug!(target, source, member, variance, "reassigned empty cluster");
        }

        empty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::SquaredEuclidean;

    fn grid(n: usize) -> Vec<Sample> {
        (0..n).map(|i| vec![i as f32, (i * i) as f32 * 0.5]).collect()
    }

    #[test]
    fn rejects_invalid_cluster_counts() {
        let samples = grid(4);
        let zero = KMeans::new(&samples, 0, InitStrategy::Random, Some(1), &SquaredEuclidean);
        assert!(matches!(zero, Err(Error::InvalidConfiguration(_))));
        let too_many = KMeans::new(&samples, 5, InitStrategy::Random, Some(1), &SquaredEuclidean);
        assert!(matches!(too_many, Err(Error::InvalidConfiguration(_))));
        let empty: Vec<Sample> = Vec::new();
        let none = KMeans::new(&empty, 1, InitStrategy::Random, Some(1), &SquaredEuclidean);
        assert!(matches!(none, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn rejects_ragged_samples() {
        let samples = vec![vec![0.0, 1.0], vec![2.0]];
        let r = KMeans::new(&samples, 1, InitStrategy::Random, Some(1), &SquaredEuclidean);
        assert!(matches!(r, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn full_change_fraction_stops_after_one_pass() {
        let samples = grid(50);
        let mut km = KMeans::new(&samples, 5, InitStrategy::PlusPlus, Some(9), &SquaredEuclidean).unwrap();
        let report = km.run(100, 1.0).unwrap();
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn one_center_per_sample_converges_with_zero_changes() {
        let samples = grid(12);
        let mut km = KMeans::new(&samples, 12, InitStrategy::Random, Some(5), &SquaredEuclidean)
            .unwrap()
            .with_threads(3);
        let report = km.run(0, 0.0).unwrap();
        assert_eq!(report.iterations, 2);
        assert_eq!(report.changes[1], 0);
        assert_eq!(km.cluster_sizes(), vec![1; 12]);
        for (i, &c) in km.assignments().iter().enumerate() {
            assert_eq!(km.centers()[c], samples[i]);
        }
    }

    #[test]
    fn max_iterations_bounds_the_loop() {
        let samples = grid(40);
        let mut km = KMeans::new(&samples, 4, InitStrategy::Random, Some(2), &SquaredEuclidean).unwrap();
        let report = km.run(1, 0.0).unwrap();
        assert_eq!(report.iterations, 1);
        assert!(km.run(3, 0.0).unwrap().iterations <= 3);
    }

    #[test]
    fn rejects_out_of_range_change_fraction() {
        let samples = grid(4);
        let mut km = KMeans::new(&samples, 2, InitStrategy::Random, Some(2), &SquaredEuclidean).unwrap();
        assert!(matches!(km.run(10, 1.5), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn empty_cluster_takes_farthest_member_of_widest_cluster() {
        let samples = vec![vec![0.0], vec![1.0], vec![10.0], vec![11.0], vec![30.0]];
        let mut km = KMeans::new(&samples, 3, InitStrategy::Random, Some(1), &SquaredEuclidean).unwrap();
        // clusters 0 and 1 hold everything, cluster 2 is empty
        km.assignments = vec![0, 0, 1, 1, 1];
        let mut sizes = km.update_centers();
        assert_eq!(sizes, vec![2, 3, 0]);

        let left = km.repair_empty_clusters(&mut sizes);
        assert_eq!(left, 0);
        // cluster 1 (mean 17) is the widest; 30 is its farthest member
        assert_eq!(km.assignments()[4], 2);
        assert_eq!(km.centers()[2], vec![30.0]);
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn emptied_source_is_refilled() {
        let samples = vec![vec![0.0], vec![0.0], vec![3.0]];
        let mut km = KMeans::new(&samples, 3, InitStrategy::Random, Some(1), &SquaredEuclidean).unwrap();
        km.assignments = vec![1, 1, 0];
        let mut sizes = km.update_centers();
        assert_eq!(sizes, vec![1, 2, 0]);

        // both sources have zero spread, so the singleton cluster 0 gives up its member first
        let left = km.repair_empty_clusters(&mut sizes);
        assert_eq!(left, 0);
        assert_eq!(sizes, vec![1, 1, 1]);
        assert_eq!(km.assignments(), &[0, 1, 2]);
        assert_eq!(km.centers()[0], vec![0.0]);
        assert_eq!(km.centers()[2], vec![3.0]);
    }

    #[test]
    fn duplicate_samples_report_unreachable_clusters() {
        let samples = vec![vec![0.0], vec![0.0], vec![0.0]];
        let mut km = KMeans::new(&samples, 3, InitStrategy::Random, Some(3), &SquaredEuclidean).unwrap();
        let report = km.run(10, 0.0).unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(km.cluster_sizes(), vec![3, 0, 0]);
        assert_eq!(report.degenerate_clusters, 2);
    }

    #[test]
    fn cluster_table_lists_members() {
        let samples = vec![vec![0.0], vec![0.5], vec![100.0]];
        let mut km = KMeans::new(&samples, 2, InitStrategy::PlusPlus, Some(4), &SquaredEuclidean).unwrap();
        km.run_default().unwrap();
        let mut table = km.cluster_table();
        table.sort();
        assert_eq!(table, vec![vec![0, 1], vec![2]]);
    }
}
