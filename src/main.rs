use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use phylo_fingerprint::catalog::{Catalog, IngestOptions, SearchQuery};
use phylo_fingerprint::distances::{self, kf_from_snapshots, rf_from_snapshots, weighted_rf_from_snapshots};
use phylo_fingerprint::explain::Explanation;
use phylo_fingerprint::io::{Burnin, read_tree_file, write_matrix_tsv};
use phylo_fingerprint::snapshot::TreeSnapshot;
use phylo_fingerprint::vector::pairwise_cosine;
use phylo_fingerprint::{CatalogConfig, Error, Result, Tree, TreeId};

/// Structural fingerprints for phylogenetic trees: embeddings, similarity search,
/// explanations and pairwise matrices.
#[derive(Parser, Debug)]
#[command(name = "phylo-fingerprint", version, about)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", default_value_t = false, global = true)]
    quiet: bool,

    /// TOML configuration file; flags below override its values
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Similarity search budget in milliseconds
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    /// Reasons per explanation, including the summary
    #[arg(long = "max-reasons", global = true)]
    max_reasons: Option<usize>,

    /// Branch length decimals in extracted Newick
    #[arg(long = "precision", global = true)]
    precision: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Input {
    /// Tree file: Newick per line, `name<TAB>newick` per line, or NEXUS/BEAST (.gz accepted)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Burn-in by number of trees (drop first N trees)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,

    /// Burn-in by state (keep trees with STATE_ > value)
    #[arg(short = 's', long = "burnin-states", default_value_t = 0)]
    burnin_states: usize,

    /// Use TRANSLATE block to map taxon IDs to labels when available
    #[arg(long = "use-real-taxa", default_value_t = false)]
    use_real_taxa: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one JSON line per tree with its topology embedding
    Embed {
        #[command(flatten)]
        input: Input,

        /// Print the whole tree, nodes and position vectors included
        #[arg(long = "full", default_value_t = false)]
        full: bool,
    },
    /// Rank the input trees by similarity to a query tree
    Search {
        #[command(flatten)]
        input: Input,

        /// Query tree in Newick
        #[arg(long = "query")]
        query: String,

        #[arg(short = 'k', long = "limit", default_value_t = 10)]
        limit: usize,
    },
    /// Explain how a query tree resembles each input tree
    Explain {
        #[command(flatten)]
        input: Input,

        /// Query tree in Newick
        #[arg(long = "query")]
        query: String,

        /// Only explain against trees with this name
        #[arg(long = "tree")]
        tree: Option<String>,
    },
    /// Extract the smallest clade containing the given taxa from one input tree
    Clade {
        #[command(flatten)]
        input: Input,

        /// Tree name; defaults to the first tree
        #[arg(long = "tree")]
        tree: Option<String>,

        /// Leaf label, repeat for every taxon
        #[arg(long = "taxon", required = true)]
        taxa: Vec<String>,
    },
    /// Write a labelled pairwise matrix (TSV, `.gz` compresses, `-` is stdout)
    Matrix {
        #[command(flatten)]
        input: Input,

        #[arg(short = 'o', long = "output")]
        output: PathBuf,

        /// cosine | rf | weighted | kf
        #[arg(long = "metric", value_enum, default_value_t = Metric::Cosine)]
        metric: Metric,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Metric {
    Cosine,
    Rf,
    Weighted,
    Kf,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        error!(error = %e, "failed");
        eprintln!("error: {e}");
        std::process::exit(exit_code(&e));
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(e: &Error) -> i32 {
    match e {
        Error::SearchUnavailable(_) => 3,
        Error::Io(_) => 4,
        _ => 2,
    }
}

fn load_config(cli: &Cli) -> Result<CatalogConfig> {
    let mut config = match &cli.config {
        Some(path) => CatalogConfig::from_file(path)?,
        None => CatalogConfig::default(),
    };
    if let Some(ms) = cli.timeout_ms {
        config.search_timeout_ms = ms;
    }
    if let Some(n) = cli.max_reasons {
        config.max_reasons = n;
    }
    if let Some(p) = cli.precision {
        config.newick_precision = p;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let catalog = Catalog::in_memory(load_config(&cli)?)?;

    match &cli.command {
        Command::Embed { input, full } => {
            let trees = load_trees(&catalog, input)?;
            let mut out = io::BufWriter::new(io::stdout().lock());
            for tree in &trees {
                if *full {
                    serde_json::to_writer(&mut out, tree).map_err(io::Error::from)?;
                } else {
                    serde_json::to_writer(&mut out, &EmbedLine::from(&**tree))
                        .map_err(io::Error::from)?;
                }
                writeln!(out)?;
            }
            out.flush()?;
        }
        Command::Search { input, query, limit } => {
            load_trees(&catalog, input)?;
            let t0 = Instant::now();
            let hits = catalog.search_similar(SearchQuery::Newick(query), *limit)?;
            info!(hits = hits.len(), elapsed_s = t0.elapsed().as_secs_f64(), "searched");
            let lines: Vec<HitLine<'_>> = hits
                .iter()
                .map(|hit| HitLine {
                    name: hit.tree.name(),
                    id: hit.tree.id(),
                    leaf_count: hit.tree.leaf_count(),
                    score: hit.score,
                })
                .collect();
            print_json(&lines)?;
        }
        Command::Explain { input, query, tree } => {
            let trees = load_trees(&catalog, input)?;
            let selected: Vec<&Arc<Tree>> = trees
                .iter()
                .filter(|t| tree.as_deref().is_none_or(|name| t.name() == name))
                .collect();
            if selected.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "no input tree is named {:?}",
                    tree.as_deref().unwrap_or_default()
                )));
            }
            let explained = selected
                .into_iter()
                .map(|candidate| {
                    let explanation = catalog.explain_similarity(query, candidate.id())?;
                    Ok(Explained { name: candidate.name(), explanation })
                })
                .collect::<Result<Vec<_>>>()?;
            print_json(&explained)?;
        }
        Command::Clade { input, tree, taxa } => {
            let trees = load_trees(&catalog, input)?;
            let target = match tree {
                Some(name) => trees
                    .iter()
                    .find(|t| t.name() == name)
                    .ok_or_else(|| Error::InvalidArgument(format!("no input tree is named {name:?}")))?,
                None => &trees[0],
            };
            let mut nodes = taxa.iter().map(|label| {
                target.find_label(label).map(|n| n.id).ok_or_else(|| {
                    Error::InvalidArgument(format!("tree {:?} has no leaf {label:?}", target.name()))
                })
            });
            let mut clade = match nodes.next() {
                Some(first) => first?,
                None => target.root_id(),
            };
            for node in nodes {
                clade = catalog.lca(target.id(), clade, node?)?.id;
            }
            print_json(&catalog.subtree_extract(target.id(), clade)?)?;
        }
        Command::Matrix { input, output, metric } => {
            let trees = load_trees(&catalog, input)?;
            let names: Vec<String> = trees.iter().map(|t| t.name().to_string()).collect();
            let t0 = Instant::now();
            match metric {
                Metric::Cosine => {
                    let embeddings: Vec<&[f64]> = trees.iter().map(|t| t.embedding()).collect();
                    write_timed(output, &names, &pairwise_cosine(&embeddings), *metric, t0)?;
                }
                Metric::Rf => {
                    let snaps = snapshots(&trees)?;
                    write_timed(output, &names, &distances::pairwise(&snaps, rf_from_snapshots), *metric, t0)?;
                }
                Metric::Weighted => {
                    let snaps = snapshots(&trees)?;
                    let matrix = distances::pairwise(&snaps, weighted_rf_from_snapshots);
                    write_timed(output, &names, &matrix, *metric, t0)?;
                }
                Metric::Kf => {
                    let snaps = snapshots(&trees)?;
                    write_timed(output, &names, &distances::pairwise(&snaps, kf_from_snapshots), *metric, t0)?;
                }
            }
        }
    }
    Ok(())
}

/// Read, parse and ingest every tree of the input file, in file order.
fn load_trees(catalog: &Catalog, input: &Input) -> Result<Vec<Arc<Tree>>> {
    let t0 = Instant::now();
    let burnin = Burnin { trees: input.burnin_trees, states: input.burnin_states };
    let file = read_tree_file(&input.input, burnin)?;
    if file.translate.is_some() && !input.use_real_taxa {
        info!("TRANSLATE block present; pass --use-real-taxa to apply it");
    }
    let options = IngestOptions {
        translate: file.translate.filter(|_| input.use_real_taxa),
        ..IngestOptions::default()
    };

    let items: Vec<(String, String)> = file.records.into_iter().map(|r| (r.name, r.newick)).collect();
    let mut trees = Vec::with_capacity(items.len());
    for ((name, _), result) in items.iter().zip(catalog.ingest_batch(&items, &options)) {
        match result {
            Ok(tree) => trees.push(tree),
            Err(e) => warn!(tree = %name, error = %e, "skipping tree"),
        }
    }
    if trees.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no tree in {} could be parsed",
            input.input.display()
        )));
    }
    info!(trees = trees.len(), elapsed_s = t0.elapsed().as_secs_f64(), "loaded trees");
    Ok(trees)
}

/// Clade distances need every tree over the same taxa.
fn snapshots(trees: &[Arc<Tree>]) -> Result<Vec<TreeSnapshot>> {
    let snaps = trees
        .iter()
        .map(|t| TreeSnapshot::from_tree(t))
        .collect::<Result<Vec<_>>>()?;
    for (tree, snap) in trees.iter().zip(&snaps).skip(1) {
        if !snap.same_taxa(&snaps[0]) {
            return Err(Error::InvalidArgument(format!(
                "tree {:?} has a different leaf set than tree {:?}; all trees must have the same taxa",
                tree.name(),
                trees[0].name()
            )));
        }
    }
    Ok(snaps)
}

fn write_timed<T: std::fmt::Display>(
    output: &Path,
    names: &[String],
    matrix: &[Vec<T>],
    metric: Metric,
    t0: Instant,
) -> Result<()> {
    let pairs = names.len() * names.len().saturating_sub(1) / 2;
    info!(?metric, pairs, elapsed_s = t0.elapsed().as_secs_f64(), "computed matrix");
    let t1 = Instant::now();
    write_matrix_tsv(output, names, matrix)?;
    info!(output = %output.display(), elapsed_s = t1.elapsed().as_secs_f64(), "wrote matrix");
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).map_err(io::Error::from)?;
    writeln!(out)?;
    Ok(())
}

#[derive(Serialize)]
struct EmbedLine<'a> {
    name: &'a str,
    id: TreeId,
    leaf_count: usize,
    embedding: &'a [f64],
}

impl<'a> From<&'a Tree> for EmbedLine<'a> {
    fn from(tree: &'a Tree) -> Self {
        EmbedLine { name: tree.name(), id: tree.id(), leaf_count: tree.leaf_count(), embedding: tree.embedding() }
    }
}

#[derive(Serialize)]
struct HitLine<'a> {
    name: &'a str,
    id: TreeId,
    leaf_count: usize,
    score: f64,
}

#[derive(Serialize)]
struct Explained<'a> {
    name: &'a str,
    #[serde(flatten)]
    explanation: Explanation,
}
