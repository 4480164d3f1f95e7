//! Ordered list of corpus files; position in the list is the document id.

use crate::error::{Error, Result};
use crate::DocId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct FileList {
    root: PathBuf,
    /// Paths relative to `root`, `/`-separated.
    files: Vec<String>,
}

impl FileList {
    /// Empty list rooted at an existing directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::invalid(format!("root directory {} does not exist", root.display())));
        }
        Ok(Self { root: root.to_path_buf(), files: Vec::new() })
    }

    /// Replaces the list with every file under the root whose extension is one
    /// of `extensions` (case-insensitive, without the dot), sorted by path.
    pub fn lookup_dir(&mut self, extensions: &[&str]) -> Result<usize> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .path()
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));
            if !matches {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
                files.push(parts.join("/"));
            }
        }
        files.sort();
        tracing::info!(root = %self.root.display(), count = files.len(), "file list collected");
        self.files = files;
        Ok(self.files.len())
    }

    /// Keeps `n` entries drawn uniformly without replacement, in their
    /// original relative order. `n >= len` keeps everything.
    pub fn random_sample(&mut self, n: usize, seed: Option<u64>) {
        if n >= self.files.len() {
            return;
        }
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut picked: Vec<usize> = (0..self.files.len()).collect();
        picked.shuffle(&mut rng);
        picked.truncate(n);
        picked.sort_unstable();
        self.files = picked.into_iter().map(|i| std::mem::take(&mut self.files[i])).collect();
    }

    /// Reads one relative path per line; blank lines are skipped.
    pub fn load<P: AsRef<Path>, R: AsRef<Path>>(path: P, root: R) -> Result<Self> {
        let mut list = Self::new(root)?;
        let reader = BufReader::new(File::open(path)?);
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                list.files.push(line.to_string());
            }
        }
        Ok(list)
    }

    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        for f in &self.files {
            writeln!(w, "{f}")?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn push(&mut self, relative: impl Into<String>) {
        self.files.push(relative.into());
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn relative(&self, doc_id: DocId) -> Option<&str> {
        self.files.get(doc_id as usize).map(String::as_str)
    }

    /// Absolute-ish path of a document: `root/relative`.
    pub fn filename(&self, doc_id: DocId) -> Option<PathBuf> {
        self.relative(doc_id).map(|rel| self.root.join(rel))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }
}
