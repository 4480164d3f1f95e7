//! Bag-of-visual-words retrieval engine.
//!
//! Pipeline: cluster training features into a [`Vocabulary`], quantize each
//! document's features into a histogram, index the histograms with TF-IDF
//! weighting in an [`InvertedIndex`], then rank documents for a query with a
//! [`Searcher`].

pub mod config;
pub mod distance;
pub mod error;
pub mod filelist;
pub mod histogram;
pub mod index;
pub mod persist;
pub mod quantize;
pub mod retrieval;
pub mod vocabulary;

pub use config::{SearchConfig, VocabularyConfig};
pub use distance::{Distance, Metric};
pub use error::{Error, Result};
pub use filelist::FileList;
pub use histogram::{build_histogram, quantize_document, quantize_document_spatial, KeyPoint};
pub use index::{build_index, query, InvertedIndex, Posting, ResultItem};
pub use quantize::{quantize, quantize_samples, FuzzyQuantizer, HardQuantizer, Quantizer};
pub use retrieval::{SearchHit, Searcher};
pub use vocabulary::{build_vocabulary, InitStrategy, KMeans, Vocabulary};

/// One feature vector.
pub type Sample = Vec<f32>;
pub type TermId = u32;
pub type DocId = u32;
