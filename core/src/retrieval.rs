//! Query-side driver: features in, ranked documents out.

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::filelist::FileList;
use crate::histogram::{quantize_document_spatial, KeyPoint};
use crate::index::{IdfWeighting, InvertedIndex, ResultItem, SimpleIdf, SimpleTf, TfWeighting};
use crate::persist::{self, IndexPaths};
use crate::quantize::{FuzzyQuantizer, HardQuantizer, Quantizer};
use crate::vocabulary::Vocabulary;
use crate::{DocId, Sample};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    /// `root/relative` when a file list is loaded.
    pub filename: Option<PathBuf>,
}

pub struct Searcher {
    vocabulary: Arc<Vocabulary>,
    index: InvertedIndex,
    quantizer: Box<dyn Quantizer>,
    tf: Box<dyn TfWeighting>,
    idf: Box<dyn IdfWeighting>,
    files: Option<FileList>,
    config: SearchConfig,
}

impl std::fmt::Debug for Searcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Searcher")
            .field("vocabulary_size", &self.vocabulary.len())
            .field("num_documents", &self.index.num_documents())
            .field("config", &self.config)
            .finish()
    }
}

impl Searcher {
    /// Wires an in-memory vocabulary and index together. The quantizer follows
    /// `config.fuzzy_sigma` and `config.metric`; weighting is the simple TF-IDF scheme.
    pub fn new(vocabulary: Arc<Vocabulary>, index: InvertedIndex, config: SearchConfig) -> Result<Self> {
        if config.resolution == 0 {
            return Err(Error::invalid("spatial resolution must be positive"));
        }
        let expected = config.resolution * config.resolution * vocabulary.len();
        Error::check_dimension(expected, index.num_words())?;

        let quantizer: Box<dyn Quantizer> = match config.fuzzy_sigma {
            Some(sigma) => Box::new(FuzzyQuantizer::new(sigma, config.metric)?),
            None => Box::new(HardQuantizer::new(config.metric)),
        };
        Ok(Self {
            vocabulary,
            index,
            quantizer,
            tf: Box::new(SimpleTf),
            idf: Box::new(SimpleIdf),
            files: None,
            config,
        })
    }

    /// Loads vocabulary, index and (if present) file list from `config.index_dir`.
    pub fn open(config: &SearchConfig) -> Result<Self> {
        let paths = IndexPaths::new(&config.index_dir);
        let vocabulary = Arc::new(persist::load_vocabulary(&paths)?);
        let index = persist::load_any_index(&paths)?;

        let mut config = config.clone();
        match persist::load_meta(&paths) {
            Ok(meta) => config.resolution = meta.resolution.max(1),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %paths.meta().display(), "no meta file, keeping configured resolution");
            }
            Err(e) => return Err(e),
        }

        let files = if paths.filelist().is_file() {
            let root = config.root_dir.clone().unwrap_or_else(|| paths.root.clone());
            Some(FileList::load(paths.filelist(), root)?)
        } else {
            None
        };

        tracing::info!(
            index_dir = %paths.root.display(),
            vocabulary_size = vocabulary.len(),
            num_documents = index.num_documents(),
            resolution = config.resolution,
            "searcher ready"
        );
        Ok(Self::new(vocabulary, index, config)?.with_files(files))
    }

    pub fn with_files(mut self, files: Option<FileList>) -> Self {
        self.files = files;
        self
    }

    /// Swaps the TF/IDF pair used for query weighting. It must match the
    /// scheme the index was finalized with.
    pub fn with_weighting(mut self, tf: Box<dyn TfWeighting>, idf: Box<dyn IdfWeighting>) -> Self {
        self.tf = tf;
        self.idf = idf;
        self
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn num_documents(&self) -> u32 {
        self.index.num_documents()
    }

    pub fn filename(&self, doc_id: DocId) -> Option<PathBuf> {
        self.files.as_ref().and_then(|f| f.filename(doc_id))
    }

    /// Ranks documents against a ready-made histogram. Histograms without a
    /// single nonzero entry match nothing.
    pub fn query_histogram(&self, histogram: &[f32], k: usize, views_per_group: usize) -> Result<Vec<ResultItem>> {
        if views_per_group == 0 {
            return Err(Error::invalid("views per group must be at least 1"));
        }
        if !histogram.iter().any(|&v| v > 0.0) {
            tracing::debug!("query histogram is empty");
            Error::check_dimension(self.index.num_words(), histogram.len())?;
            return Ok(Vec::new());
        }
        if views_per_group != 1 {
            self.index
                .query_multi_view(histogram, &self.tf, &self.idf, k, views_per_group)
        } else {
            self.index.query(histogram, &self.tf, &self.idf, k)
        }
    }

    /// Quantizes one query's features (binned by `keypoints` when the index is
    /// spatial) and ranks documents with the configured result count and grouping.
    pub fn query_features(&self, features: &[Sample], keypoints: &[KeyPoint]) -> Result<Vec<ResultItem>> {
        self.query_features_with(features, keypoints, self.config.num_results, self.config.views_per_group)
    }

    pub fn query_features_with(
        &self,
        features: &[Sample],
        keypoints: &[KeyPoint],
        k: usize,
        views_per_group: usize,
    ) -> Result<Vec<ResultItem>> {
        let histogram = quantize_document_spatial(
            features,
            keypoints,
            &self.vocabulary,
            &self.quantizer,
            self.config.resolution,
        )?;
        self.query_histogram(&histogram, k, views_per_group)
    }

    /// [`query_features_with`](Self::query_features_with) with file names attached.
    pub fn search(
        &self,
        features: &[Sample],
        keypoints: &[KeyPoint],
        k: usize,
        views_per_group: usize,
    ) -> Result<Vec<SearchHit>> {
        let hits = self.query_features_with(features, keypoints, k, views_per_group)?;
        Ok(hits
            .into_iter()
            .map(|r| SearchHit { doc_id: r.doc_id, score: r.score, filename: self.filename(r.doc_id) })
            .collect())
    }
}
