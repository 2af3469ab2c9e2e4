//! Command-line front end for NBLAST, exact matching, match likelihoods and
//! model fitting over a directory of compact-skeleton JSON files.

#[macro_use]
extern crate serde_derive;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use homology::analysis::{conn_training_vectors, fit_morpho_stats, pair_observations, train_conn_stats};
use homology::homology::{match_likelihood_ratio, LikelihoodRow};
use homology::matching::{max_match_similarity, MatchRow};
use homology::nblast::{exact_nblast, nblast_neurons};
use homology::transform::{transform_neuronlist, Mirror};
use homology::utils::{load_json, save_json};
use homology::{
    AnalysisConfig, ConnStats, HomologyPairs, InMemorySource, NeuronList, NeuronSource,
    ScoreMatrixLookup, SimilarityMatrix,
};

#[derive(Parser)]
#[command(name = "homology", version, about)]
struct Cli {
    /// TOML file of analysis parameters
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct NeuronArgs {
    /// Directory of `<skid>.json` compact-skeleton responses
    #[arg(short, long)]
    neurons: PathBuf,

    /// NBLAST score matrix, overriding the config
    #[arg(short, long)]
    score_matrix: Option<PathBuf>,

    /// Annotation selecting query neurons; all neurons if absent
    #[arg(short, long)]
    query: Option<String>,

    /// Annotation selecting target neurons; the queries if absent
    #[arg(short, long)]
    target: Option<String>,

    /// Reflect targets across the plane x = MIRROR_PLANE
    #[arg(long)]
    mirror_plane: Option<f64>,

    /// Where to write JSON results
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// All-by-all NBLAST scores
    Nblast(NeuronArgs),

    /// Symmetric NBLAST similarity matrix and maximum matching
    Exact(NeuronArgs),

    /// Combined morphology and connectivity likelihood table
    Likelihood {
        #[command(flatten)]
        neurons: NeuronArgs,

        /// JSON list of known [left, right] pairs
        #[arg(short, long)]
        pairs: PathBuf,

        /// Trained connectivity statistics (JSON)
        #[arg(long)]
        conn_stats: PathBuf,

        /// Compare target connectivity vectors without swapping pair members
        #[arg(long)]
        unmirrored: bool,
    },

    /// Train connectivity statistics from the known pairs
    TrainConn {
        /// Directory of `<skid>.json` compact-skeleton responses
        #[arg(short, long)]
        neurons: PathBuf,

        /// JSON list of known [left, right] pairs
        #[arg(short, long)]
        pairs: PathBuf,

        /// Synapse counts above this share the last table cell
        #[arg(long, default_value = "20")]
        max_weight: usize,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fit the morphological model from a likelihood table
    Fit {
        /// Likelihood table written by `likelihood`
        #[arg(long)]
        table: PathBuf,

        /// JSON list of known [left, right] pairs
        #[arg(short, long)]
        pairs: PathBuf,

        /// Similarity bins for the logistic fit
        #[arg(long, default_value = "20")]
        bins: usize,

        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct ExactOutput {
    similarity: SimilarityMatrix,
    matching: Vec<MatchRow>,
}

fn load_score_matrix(path: &Path) -> anyhow::Result<ScoreMatrixLookup> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading score matrix {}", path.display()))?;
    Ok(ScoreMatrixLookup::from_json(&contents)?)
}

struct Loaded {
    source: InMemorySource,
    lookup: ScoreMatrixLookup,
    queries: NeuronList,
    targets: Option<NeuronList>,
}

fn load_neurons(args: &NeuronArgs, config: &AnalysisConfig) -> anyhow::Result<Loaded> {
    let score_path = args
        .score_matrix
        .as_ref()
        .or_else(|| config.score_matrix.as_ref())
        .ok_or_else(|| anyhow!("no score matrix given on the command line or in the config"))?;
    let lookup = load_score_matrix(score_path)?;

    let source = InMemorySource::from_directory(&args.neurons)?;
    let queries = match &args.query {
        Some(annotation) => source.neurons_with_annotation(annotation)?,
        None => source.all(),
    };
    let targets = match &args.target {
        Some(annotation) => Some(source.neurons_with_annotation(annotation)?),
        None => None,
    };
    let targets = match args.mirror_plane {
        Some(plane) => Some(transform_neuronlist(
            targets.as_ref().unwrap_or(&queries),
            &Mirror { plane },
        )),
        None => targets,
    };
    if queries.is_empty() {
        return Err(anyhow!("no query neurons selected"));
    }

    Ok(Loaded {
        source,
        lookup,
        queries,
        targets,
    })
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };

    match cli.command {
        Commands::Nblast(args) => {
            let loaded = load_neurons(&args, &config)?;
            let rows = nblast_neurons(&loaded.lookup, &loaded.queries, loaded.targets.as_ref(), &config.nblast)?;
            save_json(&args.output, &rows)?;
            info!(n_rows = rows.len(), output = ?args.output, "wrote nblast scores");
        }
        Commands::Exact(args) => {
            let loaded = load_neurons(&args, &config)?;
            let targets = loaded.targets.as_ref().unwrap_or(&loaded.queries);
            let similarity = exact_nblast(&loaded.lookup, &loaded.queries, targets, &config.nblast)?;
            let matching = max_match_similarity(&similarity, config.partners.min_similarity, &[], 1.0)?;
            info!(n_matches = matching.len(), "matched");
            save_json(&args.output, &ExactOutput { similarity, matching })?;
        }
        Commands::Likelihood {
            neurons,
            pairs,
            conn_stats,
            unmirrored,
        } => {
            let morpho = config
                .morpho
                .as_ref()
                .ok_or_else(|| anyhow!("config has no [morpho] section"))?;
            let loaded = load_neurons(&neurons, &config)?;
            let mut pairs = HomologyPairs::load(&pairs)?;
            pairs.retain_present(&loaded.source.all());
            let conn_stats = ConnStats::load(&conn_stats)?;

            let targets = loaded.targets.as_ref().unwrap_or(&loaded.queries);
            let mut rows = match_likelihood_ratio(
                &loaded.source,
                &loaded.lookup,
                &loaded.queries,
                targets,
                &pairs.pair_map(),
                &conn_stats,
                morpho,
                &config.nblast,
                !unmirrored,
            )?;
            // each neuron against itself, when queries are also the targets
            rows.retain(|r| r.queries != r.targets);
            save_json(&neurons.output, &rows)?;
            info!(n_rows = rows.len(), output = ?neurons.output, "wrote likelihood table");
        }
        Commands::TrainConn {
            neurons,
            pairs,
            max_weight,
            output,
        } => {
            let source = InMemorySource::from_directory(&neurons)?;
            let mut pairs = HomologyPairs::load(&pairs)?;
            pairs.retain_present(&source.all());
            if pairs.len() < 2 {
                return Err(anyhow!("need at least two known pairs, found {}", pairs.len()));
            }
            let (matched, unmatched) = conn_training_vectors(&source, &pairs)?;
            let stats = train_conn_stats(&matched, &unmatched, max_weight);
            save_json(&output, &stats)?;
            info!(n_pairs = pairs.len(), output = ?output, "wrote connectivity statistics");
        }
        Commands::Fit {
            table,
            pairs,
            bins,
            output,
        } => {
            let rows: Vec<LikelihoodRow> = load_json(&table)?;
            let pairs = HomologyPairs::load(&pairs)?;
            let (matched, unmatched) = pair_observations(&rows, &pairs)?;
            let exp_cutoff = config.morpho.as_ref().map_or([0.0, 1.0], |m| m.exp_cutoff);
            let stats = fit_morpho_stats(&matched, &unmatched, exp_cutoff, bins)?;
            save_json(&output, &stats)?;
            info!(?stats, "fitted morphology model");
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    run(Cli::parse())
}
