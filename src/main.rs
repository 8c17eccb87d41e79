//! OntoTree - Iterative hierarchical clustering CLI
//!
//! Turns a text document into a provenance-preserving knowledge tree:
//! paragraphs are summarized, embedded and clustered round by round until a
//! single root remains.

use anyhow::Context;
use clap::Parser;
use ontotree::{
    config::AppConfig,
    embedding::EmbeddingEngine,
    llm::create_provider,
    logging,
    raptor::{
        cache_path_for, distill_fragments, export_json, import_json, merge_short_fragments,
        save_bincode, split_paragraphs, validate_snapshot, BuildProgress, Distiller,
        LlmDistiller, MemberPolicy, PassthroughDistiller, RoundDriver,
    },
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Build a clustering tree from a text file of paragraphs
    Build {
        /// Input text file (paragraphs separated by blank lines)
        input: PathBuf,
        /// Output JSON path (default: <input>.tree.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip the language model: paragraphs are their own summaries
        #[arg(long)]
        offline: bool,
        /// Reject rounds with unresolvable cluster members
        #[arg(long)]
        strict: bool,
        /// Safety ceiling on clustering rounds
        #[arg(long)]
        max_rounds: Option<usize>,
        /// Clustering seed
        #[arg(long)]
        seed: Option<u64>,
        /// Merge paragraphs shorter than this many words
        #[arg(long)]
        min_words: Option<usize>,
    },
    /// Print and validate an exported tree
    Inspect {
        /// Tree JSON written by `build`
        tree: PathBuf,
        /// Characters of content shown per node
        #[arg(long, default_value_t = 80)]
        max_content: usize,
    },
}

#[derive(Parser, Debug)]
#[command(name = "ontotree")]
#[command(author = "MadKoding")]
#[command(version)]
#[command(about = "Iterative hierarchical clustering of documents into a knowledge tree", long_about = None)]
struct Args {
    /// Configuration file path (overrides defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to a file instead of stderr (default location if no path given)
    #[arg(long, global = true, value_name = "PATH", num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_path = args
        .log_file
        .map(|path| path.unwrap_or_else(logging::default_log_path));
    if let Some(path) = logging::init_logging(args.verbose, log_path.as_deref())? {
        eprintln!("Logging to {}", path.display());
    }

    match args.command {
        Command::Build {
            input,
            output,
            offline,
            strict,
            max_rounds,
            seed,
            min_words,
        } => {
            let mut config = AppConfig::load(args.config.as_deref())?;
            if strict {
                config.engine.driver.member_policy = MemberPolicy::Strict;
            }
            if let Some(rounds) = max_rounds {
                config.engine.driver.max_rounds = rounds;
            }
            if let Some(seed) = seed {
                config.engine.clusterer.seed = seed;
            }
            if let Some(words) = min_words {
                config.input.merge_min_words = words;
            }
            config.validate()?;

            let output = output.unwrap_or_else(|| input.with_extension("tree.json"));
            run_build(&config, &input, &output, offline).await
        }
        Command::Inspect { tree, max_content } => run_inspect(&tree, max_content),
    }
}

async fn run_build(
    config: &AppConfig,
    input: &Path,
    output: &Path,
    offline: bool,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let paragraphs = merge_short_fragments(&split_paragraphs(&text), config.input.merge_min_words);
    if paragraphs.is_empty() {
        anyhow::bail!("{} contains no paragraphs", input.display());
    }
    tracing::info!("{} paragraphs after merging", paragraphs.len());

    let distiller: Box<dyn Distiller> = if offline {
        Box::new(PassthroughDistiller {
            max_chars: config.input.passthrough_chars,
            ..Default::default()
        })
    } else {
        let provider = create_provider(config.model.clone())?;
        provider.validate_connection().await.with_context(|| {
            format!(
                "{} is unreachable (use --offline to skip summarization)",
                config.model.url
            )
        })?;
        Box::new(LlmDistiller::new(provider, config.input.distill_limits()))
    };
    let fragments = distill_fragments(distiller.as_ref(), &paragraphs).await?;

    let embedder = Arc::new(EmbeddingEngine::new().await?);

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<BuildProgress>(32);
    let reporter = tokio::spawn(async move {
        while let Some(p) = progress_rx.recv().await {
            tracing::info!("[{}] {}/{} {}", p.stage, p.current, p.total, p.detail);
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current round");
            ctrl_c.cancel();
        }
    });

    let outcome = RoundDriver::new(embedder, &config.engine)
        .with_progress(progress_tx)
        .with_cancellation(cancel)
        .build(&fragments)
        .await?;
    let _ = reporter.await;

    export_json(&outcome.snapshot, Some(&outcome.termination), output)?;
    let cache_path = cache_path_for(&input.to_string_lossy());
    if let Some(dir) = cache_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    if let Err(e) = save_bincode(&outcome.snapshot, &cache_path) {
        tracing::warn!("Could not write tree cache: {:#}", e);
    }

    let stats = outcome.snapshot.stats();
    println!("Tree written to {}", output.display());
    println!(
        "  {} nodes, {} leaves, {} rounds, {} root(s)",
        stats.total_nodes, stats.leaf_count, outcome.rounds, stats.root_count
    );
    for (round, count) in &stats.nodes_per_round {
        println!("  round {}: {} node(s)", round, count);
    }
    if outcome.is_converged() {
        println!("Status: {}", outcome.termination);
    } else {
        println!("Status: {} (partial tree)", outcome.termination);
    }
    Ok(())
}

fn run_inspect(path: &Path, max_content: usize) -> anyhow::Result<()> {
    let export = import_json(path)?;
    let meta = &export.metadata;
    println!(
        "{} nodes, {} rounds, {} final cluster(s), created {}",
        meta.total_nodes,
        meta.rounds,
        meta.final_clusters,
        meta.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(termination) = &meta.termination {
        println!("Status: {}", termination);
    }

    let snapshot = export.into_snapshot();
    println!("{}", snapshot.render_outline(max_content));

    let violations = validate_snapshot(&snapshot);
    if violations.is_empty() {
        println!("Tree is well formed");
        return Ok(());
    }
    for v in &violations {
        println!("  ! {}", v);
    }
    anyhow::bail!("{} structural violation(s)", violations.len())
}
