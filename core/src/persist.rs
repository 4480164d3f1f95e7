//! On-disk formats.
//!
//! The vocabulary, index, feature and histogram files are whitespace-separated
//! text so they stay readable by other tools. The index can additionally be
//! stored as a bincode snapshot, and `meta.json` records how an index
//! directory was built.

use crate::error::{Error, Result};
use crate::histogram::KeyPoint;
use crate::index::{InvertedIndex, Posting};
use crate::vocabulary::Vocabulary;
use crate::{DocId, Sample};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::{FromStr, SplitWhitespace};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_words: usize,
    pub vocabulary_size: usize,
    pub resolution: usize,
    pub created_at: String,
    pub version: u32,
}

/// File layout of an index directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn vocabulary(&self) -> PathBuf { self.root.join("vocabulary.txt") }
    pub fn index(&self) -> PathBuf { self.root.join("index.txt") }
    pub fn index_snapshot(&self) -> PathBuf { self.root.join("index.bin") }
    pub fn filelist(&self) -> PathBuf { self.root.join("filelist.txt") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

/// Sequential reader over whitespace-separated tokens.
struct Tokens<'a> {
    inner: SplitWhitespace<'a>,
    what: &'static str,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str, what: &'static str) -> Self {
        Self { inner: text.split_whitespace(), what }
    }

    fn next<T>(&mut self, field: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let token = self
            .inner
            .next()
            .ok_or_else(|| Error::Format(format!("{}: unexpected end of file reading {field}", self.what)))?;
        token
            .parse()
            .map_err(|e| Error::Format(format!("{}: bad {field} {token:?}: {e}", self.what)))
    }

    fn matrix(&mut self, rows: usize, cols: usize) -> Result<Vec<Sample>> {
        (0..rows)
            .map(|_| (0..cols).map(|_| self.next::<f32>("value")).collect::<Result<Sample>>())
            .collect()
    }
}

fn read_text<R: Read>(mut reader: R) -> Result<String> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    Ok(buf)
}

fn write_row<W: Write>(w: &mut W, row: &[f32]) -> Result<()> {
    let mut first = true;
    for v in row {
        if !first {
            w.write_all(b" ")?;
        }
        write!(w, "{v}")?;
        first = false;
    }
    writeln!(w)?;
    Ok(())
}

// --- vocabulary ---

pub fn write_vocabulary<W: Write>(vocabulary: &Vocabulary, mut w: W) -> Result<()> {
    writeln!(w, "{}", vocabulary.len())?;
    writeln!(w, "{}", vocabulary.dimension())?;
    for center in vocabulary.centers() {
        write_row(&mut w, center)?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_vocabulary<R: Read>(reader: R) -> Result<Vocabulary> {
    let text = read_text(reader)?;
    let mut tokens = Tokens::new(&text, "vocabulary");
    let rows: usize = tokens.next("row count")?;
    let cols: usize = tokens.next("column count")?;
    if rows == 0 || cols == 0 {
        return Err(Error::Format(format!("vocabulary: empty {rows}x{cols} matrix")));
    }
    Vocabulary::new(tokens.matrix(rows, cols)?)
}

pub fn save_vocabulary(paths: &IndexPaths, vocabulary: &Vocabulary) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_vocabulary(vocabulary, BufWriter::new(File::create(paths.vocabulary())?))
}

pub fn load_vocabulary(paths: &IndexPaths) -> Result<Vocabulary> {
    read_vocabulary(File::open(paths.vocabulary())?)
}

// --- inverted index ---

pub fn write_index<W: Write>(index: &InvertedIndex, mut w: W) -> Result<()> {
    writeln!(w, "{}", index.num_words())?;
    writeln!(w, "{}", index.num_documents())?;
    let df: Vec<String> = index.document_frequencies().iter().map(u32::to_string).collect();
    writeln!(w, "{}", df.join(" "))?;
    for term in 0..index.num_words() {
        let postings = index.postings(term as u32);
        write!(w, "{}", postings.len())?;
        for p in postings {
            write!(w, " {} {} {}", p.doc_id, p.count, p.weight)?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

/// Parses a text index. Any malformed or inconsistent entry fails the whole load.
pub fn read_index<R: Read>(reader: R) -> Result<InvertedIndex> {
    let text = read_text(reader)?;
    let mut tokens = Tokens::new(&text, "index");
    let num_words: usize = tokens.next("word count")?;
    let num_documents: DocId = tokens.next("document count")?;
    let df = (0..num_words)
        .map(|_| tokens.next::<u32>("document frequency"))
        .collect::<Result<Vec<_>>>()?;

    let mut postings = Vec::with_capacity(num_words);
    for _ in 0..num_words {
        let size: usize = tokens.next("posting list size")?;
        let list = (0..size)
            .map(|_| {
                Ok(Posting {
                    doc_id: tokens.next("doc id")?,
                    count: tokens.next("count")?,
                    weight: tokens.next("weight")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        postings.push(list);
    }
    InvertedIndex::from_parts(num_documents, df, postings)
}

pub fn save_index(paths: &IndexPaths, index: &InvertedIndex) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_index(index, BufWriter::new(File::create(paths.index())?))
}

pub fn load_index(paths: &IndexPaths) -> Result<InvertedIndex> {
    read_index(File::open(paths.index())?)
}

pub fn save_index_snapshot(paths: &IndexPaths, index: &InvertedIndex) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.index_snapshot())?;
    let bytes = bincode::serialize(index)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_index_snapshot(paths: &IndexPaths) -> Result<InvertedIndex> {
    let mut f = File::open(paths.index_snapshot())?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let index: InvertedIndex = bincode::deserialize(&buf)?;
    index.validated()
}

/// Loads the bincode snapshot when present, the text index otherwise.
pub fn load_any_index(paths: &IndexPaths) -> Result<InvertedIndex> {
    if paths.index_snapshot().is_file() {
        tracing::debug!(path = %paths.index_snapshot().display(), "loading index snapshot");
        load_index_snapshot(paths)
    } else {
        load_index(paths)
    }
}

// --- feature, keypoint and histogram batches ---

/// Writes one matrix per document: `count`, then per document `rows cols` and the rows.
pub fn write_feature_batch<W: Write>(documents: &[Vec<Sample>], mut w: W) -> Result<()> {
    writeln!(w, "{}", documents.len())?;
    for doc in documents {
        let cols = doc.first().map_or(0, Vec::len);
        writeln!(w, "{} {}", doc.len(), cols)?;
        for row in doc {
            Error::check_dimension(cols, row.len())?;
            write_row(&mut w, row)?;
        }
    }
    w.flush()?;
    Ok(())
}

pub fn read_feature_batch<R: Read>(reader: R) -> Result<Vec<Vec<Sample>>> {
    let text = read_text(reader)?;
    let mut tokens = Tokens::new(&text, "feature file");
    let count: usize = tokens.next("document count")?;
    (0..count)
        .map(|_| {
            let rows: usize = tokens.next("row count")?;
            let cols: usize = tokens.next("column count")?;
            tokens.matrix(rows, cols)
        })
        .collect()
}

pub fn write_keypoint_batch<W: Write>(documents: &[Vec<KeyPoint>], w: W) -> Result<()> {
    let as_rows: Vec<Vec<Sample>> = documents
        .iter()
        .map(|doc| doc.iter().map(|p| p.to_vec()).collect())
        .collect();
    write_feature_batch(&as_rows, w)
}

/// Keypoint files share the feature format with exactly two columns.
pub fn read_keypoint_batch<R: Read>(reader: R) -> Result<Vec<Vec<KeyPoint>>> {
    let text = read_text(reader)?;
    let mut tokens = Tokens::new(&text, "keypoint file");
    let count: usize = tokens.next("document count")?;
    (0..count)
        .map(|_| {
            let rows: usize = tokens.next("row count")?;
            let cols: usize = tokens.next("column count")?;
            if rows > 0 && cols != 2 {
                return Err(Error::Format(format!("keypoint file: expected 2 columns, got {cols}")));
            }
            (0..rows)
                .map(|_| Ok([tokens.next::<f32>("x")?, tokens.next::<f32>("y")?]))
                .collect::<Result<Vec<KeyPoint>>>()
        })
        .collect()
}

/// `count`, `length`, then one histogram per line.
pub fn write_histogram_batch<W: Write>(histograms: &[Vec<f32>], mut w: W) -> Result<()> {
    let len = histograms.first().map_or(0, Vec::len);
    writeln!(w, "{}", histograms.len())?;
    writeln!(w, "{len}")?;
    for h in histograms {
        Error::check_dimension(len, h.len())?;
        write_row(&mut w, h)?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_histogram_batch<R: Read>(reader: R) -> Result<Vec<Vec<f32>>> {
    let text = read_text(reader)?;
    let mut tokens = Tokens::new(&text, "histogram file");
    let count: usize = tokens.next("histogram count")?;
    let len: usize = tokens.next("histogram length")?;
    tokens.matrix(count, len)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}
