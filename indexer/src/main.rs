use anyhow::{bail, Context, Result};
use bovw_core::persist::{
    read_feature_batch, read_histogram_batch, read_keypoint_batch, read_vocabulary, save_index,
    save_index_snapshot, save_meta, save_vocabulary, write_histogram_batch, IndexPaths, MetaFile, FORMAT_VERSION,
};
use bovw_core::{
    build_index, build_vocabulary, quantize_document_spatial, FileList, FuzzyQuantizer, HardQuantizer,
    InitStrategy, KeyPoint, Metric, Quantizer, SearchConfig, Searcher, VocabularyConfig,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "bovw-indexer")]
#[command(about = "Build vocabularies and inverted indexes for bag-of-visual-words retrieval", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect the corpus file list under a root directory
    Filelist {
        #[arg(long)]
        root: PathBuf,
        /// Accepted extensions, comma separated
        #[arg(long, value_delimiter = ',', default_value = "png,jpg,jpeg")]
        ext: Vec<String>,
        /// Keep only this many randomly chosen files
        #[arg(long)]
        sample: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Index directory receiving filelist.txt
        #[arg(long)]
        output: PathBuf,
    },
    /// Cluster training features into a vocabulary
    Vocabulary {
        /// Feature batch file; all rows of all documents are clustered together
        #[arg(long)]
        features: PathBuf,
        /// JSON file with vocabulary settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        clusters: Option<usize>,
        #[arg(long)]
        init: Option<InitStrategy>,
        #[arg(long)]
        max_iter: Option<usize>,
        #[arg(long)]
        min_change: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        metric: Option<Metric>,
        #[arg(long)]
        threads: Option<usize>,
        /// Index directory receiving vocabulary.txt
        #[arg(long)]
        output: PathBuf,
    },
    /// Quantize per-document features into histograms
    Quantize {
        /// Vocabulary text file
        #[arg(long)]
        vocabulary: PathBuf,
        #[arg(long)]
        features: PathBuf,
        /// Keypoint batch file, required for spatial binning
        #[arg(long)]
        keypoints: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        resolution: usize,
        /// Soft assignment kernel width; hard assignment when absent
        #[arg(long)]
        fuzzy_sigma: Option<f32>,
        #[arg(long, default_value = "squared_euclidean")]
        metric: Metric,
        /// Histogram batch file to write
        #[arg(long)]
        output: PathBuf,
    },
    /// Build the inverted index from quantized histograms
    Index {
        /// Histogram batch file
        #[arg(long)]
        samples: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Spatial resolution the histograms were built with
        #[arg(long, default_value_t = 1)]
        resolution: usize,
        /// Also write a bincode snapshot for fast loading
        #[arg(long, default_value_t = false)]
        binary: bool,
    },
    /// Query an index with every document of a feature batch file
    Search {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        features: PathBuf,
        #[arg(long)]
        keypoints: Option<PathBuf>,
        #[arg(short, long, default_value_t = 25)]
        k: usize,
        #[arg(long, default_value_t = 1)]
        views: usize,
        #[arg(long)]
        fuzzy_sigma: Option<f32>,
        /// Print one JSON array per query instead of text lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Filelist { root, ext, sample, seed, output } => build_filelist(&root, &ext, sample, seed, &output),
        Commands::Vocabulary { features, config, clusters, init, max_iter, min_change, seed, metric, threads, output } => {
            let mut cfg = match config {
                Some(path) => VocabularyConfig::from_json_file(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => VocabularyConfig::default(),
            };
            if let Some(v) = clusters { cfg.num_clusters = v; }
            if let Some(v) = init { cfg.init = v; }
            if let Some(v) = max_iter { cfg.max_iterations = v; }
            if let Some(v) = min_change { cfg.min_change_fraction = v; }
            if let Some(v) = metric { cfg.metric = v; }
            if seed.is_some() { cfg.seed = seed; }
            if threads.is_some() { cfg.threads = threads; }
            train_vocabulary(&features, &cfg, &output)
        }
        Commands::Quantize { vocabulary, features, keypoints, resolution, fuzzy_sigma, metric, output } => {
            quantize_batch(&vocabulary, &features, keypoints.as_deref(), resolution, fuzzy_sigma, metric, &output)
        }
        Commands::Index { samples, output, resolution, binary } => index_histograms(&samples, &output, resolution, binary),
        Commands::Search { index, root, features, keypoints, k, views, fuzzy_sigma, json } => {
            let config = SearchConfig {
                index_dir: index,
                root_dir: root,
                num_results: k,
                views_per_group: views,
                fuzzy_sigma,
                ..SearchConfig::default()
            };
            search(&config, &features, keypoints.as_deref(), json)
        }
    }
}

fn build_filelist(root: &Path, ext: &[String], sample: Option<usize>, seed: Option<u64>, output: &Path) -> Result<()> {
    let mut files = FileList::new(root)?;
    let exts: Vec<&str> = ext.iter().map(|s| s.trim().trim_start_matches('.')).collect();
    files.lookup_dir(&exts)?;
    if let Some(n) = sample {
        files.random_sample(n, seed);
    }
    let paths = IndexPaths::new(output);
    std::fs::create_dir_all(&paths.root)?;
    files.store(paths.filelist())?;
    tracing::info!(count = files.len(), output = %paths.filelist().display(), "file list written");
    Ok(())
}

fn train_vocabulary(features: &Path, config: &VocabularyConfig, output: &Path) -> Result<()> {
    let docs = read_feature_batch(File::open(features).with_context(|| format!("opening {}", features.display()))?)?;
    let samples: Vec<Vec<f32>> = docs.into_iter().flatten().collect();
    tracing::info!(num_samples = samples.len(), num_clusters = config.num_clusters, "clustering features");

    let vocab = build_vocabulary(&samples, config, &config.metric)?;
    let paths = IndexPaths::new(output);
    save_vocabulary(&paths, &vocab)?;
    tracing::info!(output = %paths.vocabulary().display(), "vocabulary written");
    Ok(())
}

fn quantize_batch(
    vocabulary: &Path,
    features: &Path,
    keypoints: Option<&Path>,
    resolution: usize,
    fuzzy_sigma: Option<f32>,
    metric: Metric,
    output: &Path,
) -> Result<()> {
    let vocab = read_vocabulary(File::open(vocabulary).with_context(|| format!("opening {}", vocabulary.display()))?)?;
    let docs = read_feature_batch(File::open(features)?)?;
    let kps = load_keypoints(keypoints, docs.len(), resolution)?;

    let quantizer: Box<dyn Quantizer> = match fuzzy_sigma {
        Some(sigma) => Box::new(FuzzyQuantizer::new(sigma, metric)?),
        None => Box::new(HardQuantizer::new(metric)),
    };

    let mut hists = Vec::with_capacity(docs.len());
    for (i, doc) in docs.iter().enumerate() {
        let kp = kps.get(i).map(Vec::as_slice).unwrap_or(&[]);
        hists.push(quantize_document_spatial(doc, kp, &vocab, &quantizer, resolution)?);
    }
    write_histogram_batch(&hists, BufWriter::new(File::create(output)?))?;
    tracing::info!(num_documents = hists.len(), vocabulary_size = vocab.len(), resolution, "histograms written");
    Ok(())
}

fn load_keypoints(path: Option<&Path>, num_documents: usize, resolution: usize) -> Result<Vec<Vec<KeyPoint>>> {
    match path {
        Some(p) => {
            let kps = read_keypoint_batch(File::open(p)?)?;
            if kps.len() != num_documents {
                bail!("{} keypoint sets for {} documents", kps.len(), num_documents);
            }
            Ok(kps)
        }
        None if resolution > 1 => bail!("spatial resolution {resolution} requires --keypoints"),
        None => Ok(Vec::new()),
    }
}

fn index_histograms(samples: &Path, output: &Path, resolution: usize, binary: bool) -> Result<()> {
    if resolution == 0 {
        bail!("resolution must be positive");
    }
    let hists = read_histogram_batch(File::open(samples).with_context(|| format!("opening {}", samples.display()))?)?;
    let index = build_index(&hists)?;
    if index.num_words() % (resolution * resolution) != 0 {
        bail!("histogram length {} is not a multiple of {}", index.num_words(), resolution * resolution);
    }

    let paths = IndexPaths::new(output);
    save_index(&paths, &index)?;
    if binary {
        save_index_snapshot(&paths, &index)?;
    }
    let meta = MetaFile {
        num_docs: index.num_documents(),
        num_words: index.num_words(),
        vocabulary_size: index.num_words() / (resolution * resolution),
        resolution,
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "".into()),
        version: FORMAT_VERSION,
    };
    save_meta(&paths, &meta)?;

    tracing::info!(output = %paths.root.display(), num_documents = meta.num_docs, "index build complete");
    Ok(())
}

fn search(config: &SearchConfig, features: &Path, keypoints: Option<&Path>, json: bool) -> Result<()> {
    let searcher = Searcher::open(config).with_context(|| format!("opening index {}", config.index_dir.display()))?;
    let docs = read_feature_batch(File::open(features)?)?;
    let kps = load_keypoints(keypoints, docs.len(), searcher.config().resolution)?;

    for (i, doc) in docs.iter().enumerate() {
        let kp = kps.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let hits = searcher.search(doc, kp, config.num_results, config.views_per_group)?;
        if json {
            println!("{}", serde_json::to_string(&hits)?);
            continue;
        }
        println!("query {i}: {} hits", hits.len());
        for hit in hits {
            let name = hit
                .filename
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".into());
            println!("  {:>6} {:.6} {}", hit.doc_id, hit.score, name);
        }
    }
    Ok(())
}
