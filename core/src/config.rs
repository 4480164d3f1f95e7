//! Tunables for vocabulary building and query serving.
//!
//! Both structs deserialize from JSON with every field optional, so a config
//! file only needs to name what it overrides.

use crate::distance::Metric;
use crate::error::Result;
use crate::vocabulary::InitStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_MIN_CHANGE_FRACTION: f64 = 0.01;
pub const DEFAULT_NUM_RESULTS: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Number of visual words (`K`).
    pub num_clusters: usize,
    pub init: InitStrategy,
    /// Upper bound on assignment passes; 0 means unbounded.
    pub max_iterations: usize,
    /// Clustering stops once a pass moves at most this fraction of samples.
    pub min_change_fraction: f64,
    /// Seed for center initialization. `None` draws one from the OS.
    pub seed: Option<u64>,
    pub metric: Metric,
    /// Worker threads for the assignment step; defaults to available parallelism.
    pub threads: Option<usize>,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            num_clusters: 1000,
            init: InitStrategy::Random,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            min_change_fraction: DEFAULT_MIN_CHANGE_FRACTION,
            seed: None,
            metric: Metric::SquaredEuclidean,
            threads: None,
        }
    }
}

impl VocabularyConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Directory holding `vocabulary.txt`, `index.txt` and friends.
    pub index_dir: PathBuf,
    /// Root that file-list entries are relative to.
    pub root_dir: Option<PathBuf>,
    pub num_results: usize,
    /// Consecutive documents that are views of one object; 1 disables grouping.
    pub views_per_group: usize,
    /// Spatial grid resolution the index was built with (1 = plain histogram).
    pub resolution: usize,
    pub metric: Metric,
    /// Use soft assignment with this kernel width instead of hard quantization.
    pub fuzzy_sigma: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./index"),
            root_dir: None,
            num_results: DEFAULT_NUM_RESULTS,
            views_per_group: 1,
            resolution: 1,
            metric: Metric::SquaredEuclidean,
            fuzzy_sigma: None,
        }
    }
}

impl SearchConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
