//! Weighting schemes applied when an index is finalized.
//!
//! A posting's weight is `tf(term) * idf(term, posting, doc)` before L2
//! normalization. Both functions only ever see terms with a non-empty posting
//! list, so `df[term] >= 1` holds inside them.

use super::InvertedIndex;
use crate::{DocId, TermId};

pub trait TfWeighting: Send + Sync {
    fn tf(&self, index: &InvertedIndex, term: TermId) -> f32;
}

pub trait IdfWeighting: Send + Sync {
    fn idf(&self, index: &InvertedIndex, term: TermId, posting: usize, doc: DocId) -> f32;
}

/// `ln(1 + N / df[t])`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTf;

impl TfWeighting for SimpleTf {
    fn tf(&self, index: &InvertedIndex, term: TermId) -> f32 {
        let n = index.num_documents() as f32;
        let df = index.document_frequency(term).max(1) as f32;
        (1.0 + n / df).ln()
    }
}

/// `1 + ln(count)` of the posting's raw count.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleIdf;

impl IdfWeighting for SimpleIdf {
    fn idf(&self, index: &InvertedIndex, term: TermId, posting: usize, _doc: DocId) -> f32 {
        let count = index.postings(term)[posting].count;
        1.0 + count.ln()
    }
}

/// Constant 1; with [`RawCountIdf`] the index scores plain normalized counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitTf;

impl TfWeighting for UnitTf {
    fn tf(&self, _index: &InvertedIndex, _term: TermId) -> f32 {
        1.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawCountIdf;

impl IdfWeighting for RawCountIdf {
    fn idf(&self, index: &InvertedIndex, term: TermId, posting: usize, _doc: DocId) -> f32 {
        index.postings(term)[posting].count
    }
}

impl<T: TfWeighting + ?Sized> TfWeighting for Box<T> {
    fn tf(&self, index: &InvertedIndex, term: TermId) -> f32 {
        (**self).tf(index, term)
    }
}

impl<T: IdfWeighting + ?Sized> IdfWeighting for Box<T> {
    fn idf(&self, index: &InvertedIndex, term: TermId, posting: usize, doc: DocId) -> f32 {
        (**self).idf(index, term, posting, doc)
    }
}
