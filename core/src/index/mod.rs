//! Inverted index over visual-word histograms.
//!
//! Building is two-phase: [`InvertedIndex::add_sample`] appends raw counts,
//! then [`InvertedIndex::create_index`] computes TF-IDF weights and
//! L2-normalizes every document. Queries run against the finalized weights.

mod tfidf;

pub use tfidf::{IdfWeighting, RawCountIdf, SimpleIdf, SimpleTf, TfWeighting, UnitTf};

use crate::error::{Error, Result};
use crate::{DocId, TermId};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    /// Raw histogram value for this term in the document.
    pub count: f32,
    /// Normalized TF-IDF weight; meaningful only once the index is finalized.
    pub weight: f32,
}

/// One ranked hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub score: f32,
    pub doc_id: DocId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    num_words: usize,
    num_documents: u32,
    df: Vec<u32>,
    /// postings[t] in insertion (= doc id) order
    postings: Vec<Vec<Posting>>,
    unique_terms: BTreeSet<TermId>,
    finalized: bool,
}

impl InvertedIndex {
    pub fn new(num_words: usize) -> Self {
        Self {
            num_words,
            num_documents: 0,
            df: vec![0; num_words],
            postings: vec![Vec::new(); num_words],
            unique_terms: BTreeSet::new(),
            finalized: false,
        }
    }

    /// Reassembles an index from persisted parts, checking its invariants.
    /// Weights are taken as already computed.
    pub(crate) fn from_parts(num_documents: u32, df: Vec<u32>, postings: Vec<Vec<Posting>>) -> Result<Self> {
        Error::check_dimension(df.len(), postings.len())?;
        let mut unique_terms = BTreeSet::new();
        for (term, list) in postings.iter().enumerate() {
            if df[term] as usize != list.len() {
                return Err(Error::Format(format!(
                    "term {term}: document frequency {} but {} postings",
                    df[term],
                    list.len()
                )));
            }
            if let Some(p) = list.iter().find(|p| p.doc_id >= num_documents) {
                return Err(Error::Format(format!(
                    "term {term}: doc id {} out of range for {num_documents} documents",
                    p.doc_id
                )));
            }
            if !list.is_empty() {
                unique_terms.insert(term as TermId);
            }
        }
        Ok(Self {
            num_words: df.len(),
            num_documents,
            df,
            postings,
            unique_terms,
            finalized: true,
        })
    }

    /// Re-checks a decoded index and rebuilds its derived term set.
    pub(crate) fn validated(self) -> Result<Self> {
        if self.num_words != self.df.len() {
            return Err(Error::Format(format!(
                "{} words declared but {} document frequencies",
                self.num_words,
                self.df.len()
            )));
        }
        if self.df.len() != self.postings.len() {
            return Err(Error::Format(format!(
                "{} document frequencies but {} posting lists",
                self.df.len(),
                self.postings.len()
            )));
        }
        Self::from_parts(self.num_documents, self.df, self.postings)
    }

    /// Builds and finalizes an index over `histograms` with the simple TF-IDF scheme.
    pub fn from_histograms(num_words: usize, histograms: &[Vec<f32>]) -> Result<Self> {
        let mut index = Self::new(num_words);
        for hist in histograms {
            index.add_sample(hist)?;
        }
        index.create_index(&SimpleTf, &SimpleIdf);
        Ok(index)
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    pub fn num_documents(&self) -> u32 {
        self.num_documents
    }

    pub fn document_frequency(&self, term: TermId) -> u32 {
        self.df.get(term as usize).copied().unwrap_or(0)
    }

    pub fn document_frequencies(&self) -> &[u32] {
        &self.df
    }

    pub fn postings(&self, term: TermId) -> &[Posting] {
        self.postings.get(term as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Terms with at least one posting, ascending.
    pub fn unique_terms(&self) -> &BTreeSet<TermId> {
        &self.unique_terms
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Appends one document. Every entry `> 0` becomes a posting. Returns the
    /// new document's id; ids are assigned in call order from 0.
    pub fn add_sample(&mut self, histogram: &[f32]) -> Result<DocId> {
        Error::check_dimension(self.num_words, histogram.len())?;
        let doc_id = self.num_documents;
        for (term, &count) in histogram.iter().enumerate() {
            if count > 0.0 {
                self.postings[term].push(Posting { doc_id, count, weight: 0.0 });
                self.df[term] += 1;
                self.unique_terms.insert(term as TermId);
            }
        }
        self.num_documents += 1;
        self.finalized = false;
        Ok(doc_id)
    }

    /// Computes every posting weight as `tf * idf` and scales each document's
    /// weight vector to unit length. Documents with an all-zero vector keep
    /// their weights unscaled.
    pub fn create_index<T, I>(&mut self, tf: &T, idf: &I)
    where
        T: TfWeighting + ?Sized,
        I: IdfWeighting + ?Sized,
    {
        let mut sum_sq = vec![0.0f64; self.num_documents as usize];
        let terms: Vec<TermId> = self.unique_terms.iter().copied().collect();

        for &term in &terms {
            let tf_value = tf.tf(self, term);
            let weights: Vec<f32> = self.postings[term as usize]
                .iter()
                .enumerate()
                .map(|(i, p)| tf_value * idf.idf(self, term, i, p.doc_id))
                .collect();
            for (p, w) in self.postings[term as usize].iter_mut().zip(weights) {
                p.weight = w;
                sum_sq[p.doc_id as usize] += (w as f64) * (w as f64);
            }
        }

        let norms: Vec<f32> = sum_sq
            .into_iter()
            .map(|s| if s > 0.0 { s.sqrt() as f32 } else { 1.0 })
            .collect();
        for &term in &terms {
            for p in &mut self.postings[term as usize] {
                p.weight /= norms[p.doc_id as usize];
            }
        }

        self.finalized = true;
        tracing::debug!(
            num_documents = self.num_documents,
            num_terms = terms.len(),
            "index finalized"
        );
    }

    /// Cosine score of `histogram` against every document, indexed by doc id.
    pub fn scores<T, I>(&self, histogram: &[f32], tf: &T, idf: &I) -> Result<Vec<f32>>
    where
        T: TfWeighting + ?Sized,
        I: IdfWeighting + ?Sized,
    {
        if !self.finalized {
            return Err(Error::invalid("index must be finalized with create_index before querying"));
        }
        let mut query = InvertedIndex::new(self.num_words);
        query.add_sample(histogram)?;
        query.create_index(tf, idf);

        let mut acc = vec![0.0f32; self.num_documents as usize];
        for &term in &query.unique_terms {
            let wq = query.postings[term as usize][0].weight;
            for p in &self.postings[term as usize] {
                acc[p.doc_id as usize] += p.weight * wq;
            }
        }
        Ok(acc)
    }

    /// Top `k` documents by cosine score, descending. `k` is clamped to the
    /// number of documents; equal scores rank the lower doc id first.
    pub fn query<T, I>(&self, histogram: &[f32], tf: &T, idf: &I, k: usize) -> Result<Vec<ResultItem>>
    where
        T: TfWeighting + ?Sized,
        I: IdfWeighting + ?Sized,
    {
        let scores = self.scores(histogram, tf, idf)?;
        Ok(top_k(&scores, k))
    }

    /// Like [`query`](Self::query) but returns at most one document per group
    /// of `views_per_group` consecutive doc ids, keeping each group's best view.
    pub fn query_multi_view<T, I>(
        &self,
        histogram: &[f32],
        tf: &T,
        idf: &I,
        k: usize,
        views_per_group: usize,
    ) -> Result<Vec<ResultItem>>
    where
        T: TfWeighting + ?Sized,
        I: IdfWeighting + ?Sized,
    {
        if views_per_group == 0 {
            return Err(Error::invalid("views per group must be at least 1"));
        }
        if self.num_documents as usize % views_per_group != 0 {
            return Err(Error::invalid(format!(
                "{} documents do not split into groups of {views_per_group} views",
                self.num_documents
            )));
        }
        let scores = self.scores(histogram, tf, idf)?;
        let candidates = top_k(&scores, k.saturating_mul(views_per_group));

        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(k.min(candidates.len()));
        for item in candidates {
            if results.len() == k {
                break;
            }
            if seen.insert(item.doc_id as usize / views_per_group) {
                results.push(item);
            }
        }
        Ok(results)
    }
}

/// Bounded min-heap selection of the `k` best entries of `scores`.
fn top_k(scores: &[f32], k: usize) -> Vec<ResultItem> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for (doc, &score) in scores.iter().enumerate() {
        heap.push(Reverse((OrderedFloat(score), Reverse(doc as DocId))));
        if heap.len() > k {
            heap.pop();
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse((score, Reverse(doc_id)))| ResultItem { score: score.into_inner(), doc_id })
        .collect()
}

/// Builds a finalized index from document histograms with the simple scheme.
pub fn build_index(histograms: &[Vec<f32>]) -> Result<InvertedIndex> {
    let num_words = histograms
        .first()
        .map(Vec::len)
        .ok_or_else(|| Error::invalid("cannot build an index from zero histograms"))?;
    if num_words == 0 {
        return Err(Error::invalid("histograms have zero length"));
    }
    let index = InvertedIndex::from_histograms(num_words, histograms)?;
    tracing::info!(
        num_documents = index.num_documents(),
        num_words,
        num_terms = index.unique_terms().len(),
        "index built"
    );
    Ok(index)
}

/// Top-`k` query with the simple TF-IDF scheme.
pub fn query(index: &InvertedIndex, histogram: &[f32], k: usize) -> Result<Vec<ResultItem>> {
    index.query(histogram, &SimpleTf, &SimpleIdf, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_norm(index: &InvertedIndex, doc: DocId) -> f32 {
        index
            .unique_terms()
            .iter()
            .flat_map(|&t| index.postings(t))
            .filter(|p| p.doc_id == doc)
            .map(|p| p.weight * p.weight)
            .sum::<f32>()
            .sqrt()
    }

    #[test]
    fn add_sample_assigns_sequential_ids_and_counts_df() {
        let mut index = InvertedIndex::new(3);
        assert_eq!(index.add_sample(&[1.0, 0.0, 2.0]).unwrap(), 0);
        assert_eq!(index.add_sample(&[0.0, 0.0, 1.0]).unwrap(), 1);
        assert_eq!(index.num_documents(), 2);
        assert_eq!(index.document_frequencies(), &[1, 0, 2]);
        assert_eq!(index.unique_terms().iter().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(index.postings(2)[1], Posting { doc_id: 1, count: 1.0, weight: 0.0 });
    }

    #[test]
    fn add_sample_checks_length() {
        let mut index = InvertedIndex::new(3);
        assert!(matches!(
            index.add_sample(&[1.0, 2.0]),
            Err(Error::DimensionMismatch { expected: 3, got: 2 })
        ));
        assert_eq!(index.num_documents(), 0);
    }

    #[test]
    fn documents_have_unit_norm_after_finalize() {
        let hists = vec![vec![1.0, 2.0, 0.0, 4.0], vec![0.0, 0.0, 3.0, 0.0], vec![0.0; 4], vec![5.0, 1.0, 1.0, 1.0]];
        let index = InvertedIndex::from_histograms(4, &hists).unwrap();
        for doc in [0, 1, 3] {
            assert!((doc_norm(&index, doc) - 1.0).abs() < 1e-5, "doc {doc}");
        }
        assert_eq!(doc_norm(&index, 2), 0.0);
    }

    #[test]
    fn adding_after_finalize_requires_rebuild() {
        let mut index = InvertedIndex::from_histograms(2, &[vec![1.0, 0.0]]).unwrap();
        assert!(index.is_finalized());
        index.add_sample(&[0.0, 1.0]).unwrap();
        assert!(!index.is_finalized());
        assert!(matches!(query(&index, &[1.0, 0.0], 1), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn exact_match_ranks_first() {
        let hists = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 1.0], vec![1.0, 1.0, 0.0]];
        let index = InvertedIndex::from_histograms(3, &hists).unwrap();
        let hits = query(&index, &[0.0, 1.0, 1.0], 3).unwrap();
        assert_eq!(hits[0].doc_id, 1);
        assert!(hits[0].score > 0.9 && hits[0].score <= 1.0 + 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn k_clamps_and_zero_k_is_empty() {
        let index = InvertedIndex::from_histograms(2, &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(query(&index, &[1.0, 0.0], 10).unwrap().len(), 2);
        assert!(query(&index, &[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn all_zero_query_returns_docs_in_id_order() {
        let index = InvertedIndex::from_histograms(2, &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let hits = query(&index, &[0.0, 0.0], 3).unwrap();
        assert_eq!(hits.iter().map(|h| h.doc_id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(hits.iter().all(|h| h.score == 0.0));
    }

    #[test]
    fn ties_rank_lower_doc_id_first() {
        let hists = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]];
        let index = InvertedIndex::from_histograms(2, &hists).unwrap();
        let hits = query(&index, &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.iter().map(|h| h.doc_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn multi_view_validates_grouping() {
        let index = InvertedIndex::from_histograms(1, &[vec![1.0], vec![1.0], vec![1.0]]).unwrap();
        assert!(matches!(
            index.query_multi_view(&[1.0], &SimpleTf, &SimpleIdf, 1, 0),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            index.query_multi_view(&[1.0], &SimpleTf, &SimpleIdf, 1, 2),
            Err(Error::InvalidConfiguration(_))
        ));
        assert_eq!(index.query_multi_view(&[1.0], &SimpleTf, &SimpleIdf, 5, 1).unwrap().len(), 3);
    }

    #[test]
    fn top_k_keeps_best_scores() {
        let hits = top_k(&[0.1, 0.9, 0.5, 0.9, 0.2], 3);
        assert_eq!(
            hits,
            vec![
                ResultItem { score: 0.9, doc_id: 1 },
                ResultItem { score: 0.9, doc_id: 3 },
                ResultItem { score: 0.5, doc_id: 2 },
            ]
        );
    }
}
