use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use manifold_core::chaos;
use manifold_core::config::{load_config, ManifoldConfig};
use manifold_core::depgraph::DepGraph;
use manifold_core::ingest::ingest_repo;
use manifold_core::risk::combine_risk;
use manifold_core::search;
use manifold_core::store::{KvStore, RedisStore};
use manifold_core::verify::verify_snippet;
use manifold_core::watcher::watch_repo;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "manifold-cli")]
#[command(version)]
#[command(about = "Code-intelligence manifold index: byte-stream signatures, chaos analytics, and AST blast radius over a Redis-compatible store")]
struct Cli {
    /// Redis/Valkey connection string; overrides `.manifold.json`'s `redis_url`.
    #[arg(long, global = true)]
    redis_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walk ROOT, encode every file, and populate the index.
    Ingest {
        root: PathBuf,
        /// Wipe the `manifold:*` namespace before ingesting.
        #[arg(long)]
        clear_first: bool,
    },
    /// Keyword/regex search over indexed document bodies.
    Search {
        query: String,
        #[arg(long)]
        glob: Option<String>,
        #[arg(long, default_value_t = 20)]
        max_results: usize,
        #[arg(long)]
        case_sensitive: bool,
    },
    /// Print an indexed file's body with 1-based line numbers.
    Get { path: String },
    /// List indexed paths, optionally glob-filtered.
    List {
        #[arg(long)]
        glob: Option<String>,
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
    /// Chaos analytics: single-file, batch ranking, clustering, trajectory.
    Chaos {
        #[command(subcommand)]
        cmd: ChaosCommand,
    },
    /// Verify a candidate snippet's coverage against the index.
    Verify {
        /// Path to a file whose contents are the candidate snippet.
        file: PathBuf,
        #[arg(long)]
        scope_glob: Option<String>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// AST dependency graph: blast radius / depth for a Python file.
    Deps {
        /// Root of the Python source tree to analyze.
        root: PathBuf,
        /// Relative path (within ROOT) to report on.
        path: String,
    },
    /// Fused chaos + blast-radius (+ optional churn) risk for a file.
    Risk {
        /// Root of the Python source tree backing the dependency graph.
        root: PathBuf,
        path: String,
        #[arg(long)]
        with_churn: bool,
    },
    /// Watch ROOT and keep the index live under concurrent edits.
    Watch { root: PathBuf },
}

#[derive(Debug, Subcommand)]
enum ChaosCommand {
    /// Chaos blob for a single file (computed on demand if not cached).
    File { path: String },
    /// Top-N files by chaos score.
    Batch {
        #[arg(long)]
        glob: Option<String>,
        #[arg(long, default_value_t = 20)]
        max_files: usize,
    },
    /// Ejection prediction for a file over a horizon in days.
    Predict {
        path: String,
        #[arg(long, default_value_t = 30)]
        horizon_days: u32,
    },
    /// 2-D structural clustering over (coherence, entropy).
    Cluster {
        #[arg(long, default_value_t = 5)]
        k: usize,
    },
    /// Per-window trajectory arrays for visualization.
    Trajectory { path: String },
}

fn open_store(cli_redis_url: Option<&str>, cfg: &ManifoldConfig) -> Result<RedisStore> {
    let url = cli_redis_url.unwrap_or(&cfg.redis_url);
    let mut store = RedisStore::connect(url).context("connecting to the index store")?;
    store.ping().context("PING failed against the index store")?;
    Ok(store)
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar.set_message(message.to_string());
    bar
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Ingest { root, clear_first } => {
            let mut cfg = load_config(&root);
            cfg.clear_first = cfg.clear_first || clear_first;
            let mut store = open_store(cli.redis_url.as_deref(), &cfg)?;
            let bar = spinner("ingesting...");
            let report = ingest_repo(&mut store, &root, &cfg)?;
            bar.finish_with_message(format!(
                "ingested {} text + {} binary files ({} errors)",
                report.metadata.text_files, report.metadata.binary_files, report.metadata.errors
            ));
            println!("{}", serde_json::to_string_pretty(&report.metadata)?);
        }
        Command::Search {
            query,
            glob,
            max_results,
            case_sensitive,
        } => {
            let cfg = ManifoldConfig::default();
            let mut store = open_store(cli.redis_url.as_deref(), &cfg)?;
            let results = search::search_code(&mut store, &query, glob.as_deref(), max_results, case_sensitive)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Get { path } => {
            let cfg = ManifoldConfig::default();
            let mut store = open_store(cli.redis_url.as_deref(), &cfg)?;
            match search::get_file(&mut store, &path) {
                Ok(body) => {
                    for (n, line) in body.lines {
                        println!("{n:>6} | {line}");
                    }
                }
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }
        Command::List { glob, limit } => {
            let cfg = ManifoldConfig::default();
            let mut store = open_store(cli.redis_url.as_deref(), &cfg)?;
            let files = search::list_files(&mut store, glob.as_deref(), limit)?;
            println!("{}", serde_json::to_string_pretty(&files)?);
        }
        Command::Chaos { cmd } => run_chaos(&cli, cmd)?,
        Command::Verify {
            file,
            scope_glob,
            threshold,
        } => {
            let cfg = ManifoldConfig::default();
            let mut store = open_store(cli.redis_url.as_deref(), &cfg)?;
            let text = std::fs::read_to_string(&file).context("reading candidate snippet")?;
            let result = verify_snippet(
                &mut store,
                &text,
                scope_glob.as_deref(),
                threshold.unwrap_or(cfg.coverage_threshold),
                &cfg,
            )?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "total_windows": result.total_windows,
                    "matched_windows": result.matched_windows,
                    "gated_hits": result.gated_hits,
                    "coverage": result.coverage,
                    "match_ratio": result.match_ratio,
                    "verified": result.verified,
                    "matched_documents": result.matched_documents,
                }))?
            );
        }
        Command::Deps { root, path } => {
            let graph = DepGraph::build(&root);
            match graph.get(&path) {
                Some(info) => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "imports": info.imports,
                        "imported_by": info.imported_by,
                        "blast_radius": info.blast_radius,
                        "depth": info.depth,
                        "is_core": info.is_core,
                    }))?
                ),
                None => {
                    eprintln!("{path}: not found in the dependency graph under {}", root.display());
                    std::process::exit(1);
                }
            }
        }
        Command::Risk {
            root,
            path,
            with_churn,
        } => {
            let cfg = ManifoldConfig::default();
            let mut store = open_store(cli.redis_url.as_deref(), &cfg)?;
            let graph = DepGraph::build(&root);
            let blast_radius = graph.get(&path).map(|d| d.blast_radius).unwrap_or(0);
            let blob = chaos::file_chaos(&mut store, &path, &cfg)?;
            let chaos_score = blob.as_ref().map(|b| b.chaos_score).unwrap_or(0.0);
            let churn = if with_churn {
                let paths = graph
                    .get(&path)
                    .map(|_| vec![path.clone()])
                    .unwrap_or_default();
                let scores = manifold_core::churn::compute_churn_scores(
                    &root,
                    &paths,
                    manifold_core::churn::DEFAULT_WINDOW_DAYS,
                );
                scores.get(&path).copied()
            } else {
                None
            };
            let risk = combine_risk(chaos_score, blast_radius, churn);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "chaos": risk.chaos,
                    "normalized_blast": risk.normalized_blast,
                    "churn": risk.churn,
                    "combined": risk.combined,
                    "band": risk.band.label(),
                }))?
            );
        }
        Command::Watch { root } => {
            let cfg = load_config(&root);
            let store = open_store(cli.redis_url.as_deref(), &cfg)?;
            let handle = watch_repo(root.clone(), store, cfg).context("starting filesystem watcher")?;
            eprintln!("watching {} — press Ctrl+C to stop", root.display());
            ctrlc_wait();
            handle.stop();
        }
    }

    Ok(())
}

fn run_chaos(cli: &Cli, cmd: ChaosCommand) -> Result<()> {
    let cfg = ManifoldConfig::default();
    let mut store = open_store(cli.redis_url.as_deref(), &cfg)?;
    match cmd {
        ChaosCommand::File { path } => {
            let blob = chaos::file_chaos(&mut store, &path, &cfg)?;
            println!("{}", serde_json::to_string_pretty(&blob)?);
        }
        ChaosCommand::Batch { glob, max_files } => {
            let ranked = chaos::batch_rank(&mut store, glob.as_deref(), max_files, &cfg)?;
            println!("{}", serde_json::to_string_pretty(&ranked)?);
        }
        ChaosCommand::Predict { path, horizon_days } => {
            let thresholds = chaos::dynamic_thresholds(&mut store, &cfg)?;
            let blob = chaos::file_chaos(&mut store, &path, &cfg)?;
            let score = blob.map(|b| b.chaos_score).unwrap_or(0.0);
            let prediction = chaos::predict_ejection(score, &thresholds, horizon_days);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "chaos_score": score,
                    "state": format!("{:?}", prediction.state),
                    "projected_days": prediction.projected_days,
                    "within_horizon": prediction.within_horizon,
                }))?
            );
        }
        ChaosCommand::Cluster { k } => {
            let clusters = chaos::cluster_corpus(&mut store, k, &cfg)?;
            println!("{}", serde_json::to_string_pretty(&clusters)?);
        }
        ChaosCommand::Trajectory { path } => {
            let trajectory = chaos::trajectory_for_file(&mut store, &path, &cfg)?;
            println!("{}", serde_json::to_string_pretty(&trajectory)?);
        }
    }
    Ok(())
}

fn ctrlc_wait() {
    let (tx, rx) = std::sync::mpsc::channel();
    let _ = ctrlc_register(tx);
    let _ = rx.recv();
}

// A minimal Ctrl+C wait without pulling in the `ctrlc` crate: block on
// stdin EOF instead, which is enough for an interactive `watch` session.
fn ctrlc_register(tx: std::sync::mpsc::Sender<()>) -> std::io::Result<()> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = std::io::stdin().read_line(&mut buf);
        let _ = tx.send(());
    });
    Ok(())
}
