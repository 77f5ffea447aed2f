use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use delta_vision::core_modules::text_delta::text_change_percentage;
use delta_vision::parallel_pipeline::WorkerPool;
use delta_vision::pipeline::decode;
use delta_vision::{CompareConfig, ComparisonPipeline, FsArtifactStore, SessionKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Parser)]
#[command(name = "delta_tester", about = "Compare page captures and report what changed")]
struct Cli {
    /// Directory under which each comparison stores its artifacts.
    #[arg(long, env = "DELTA_MEDIA_ROOT", default_value = "media", global = true)]
    media_root: PathBuf,

    /// Public URL the media root is served from. Artifact references are file
    /// paths when unset.
    #[arg(long, env = "DELTA_PUBLIC_HOST", global = true)]
    public_host: Option<String>,

    /// Change regions must cover more pixels than this.
    #[arg(long, env = "DELTA_MIN_AREA", global = true)]
    min_area: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compare a current capture against a baseline and print the report as JSON.
    Compare {
        before: PathBuf,
        after: PathBuf,
        /// Session key for the stored artifacts. A fresh one is generated when omitted.
        #[arg(long)]
        session: Option<SessionKey>,
    },
    /// Print the percentage of change between two text files.
    Text { before: PathBuf, after: PathBuf },
    /// Compare several captures against one baseline concurrently.
    Batch {
        before: PathBuf,
        #[arg(required = true)]
        after: Vec<PathBuf>,
        /// Number of comparison workers. Defaults to one per CPU.
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Argument Parsing & Logging Setup ---
    let cli = Cli::parse();
    init_tracing();

    // --- 2. Pipeline Initialization ---
    let mut config = CompareConfig::default();
    if let Some(min_area) = cli.min_area {
        config.min_region_area = min_area;
    }
    let mut store = FsArtifactStore::new(&cli.media_root);
    if let Some(host) = &cli.public_host {
        store = store.with_public_base(host.as_str());
    }
    let pipeline = Arc::new(ComparisonPipeline::new(config, Arc::new(store)));

    // --- 3. Command Dispatch ---
    match cli.command {
        Command::Compare {
            before,
            after,
            session,
        } => {
            let session = session.unwrap_or_else(SessionKey::generate);
            let result = pipeline
                .compare_files(&before, &after, &session)
                .with_context(|| {
                    format!("comparing {} with {}", before.display(), after.display())
                })?;
            info!(session = %session, "artifacts stored under {}", cli.media_root.display());
            println!("{}", serde_json::to_string_pretty(&result.report())?);
        }
        Command::Text { before, after } => {
            let before = read_text(&before)?;
            let after = read_text(&after)?;
            println!("{:.2}", text_change_percentage(&before, &after));
        }
        Command::Batch {
            before,
            after,
            workers,
        } => {
            let baseline = decode(&read_bytes(&before)?)?;
            let mut jobs = Vec::with_capacity(after.len());
            for path in &after {
                let capture = decode(&read_bytes(path)?)
                    .with_context(|| format!("decoding {}", path.display()))?;
                jobs.push((baseline.clone(), capture, SessionKey::generate()));
            }

            let pool = match workers {
                Some(workers) => WorkerPool::with_workers(pipeline, workers),
                None => WorkerPool::new(pipeline),
            };
            info!(captures = jobs.len(), workers = pool.worker_count(), "starting batch");
            let results = pool.compare_many(jobs).await;
            pool.shutdown().await;

            let mut failures = 0;
            let entries: Vec<serde_json::Value> = after
                .iter()
                .zip(results)
                .map(|(path, result)| match result {
                    Ok(result) => serde_json::json!({
                        "capture": path.display().to_string(),
                        "report": result.report(),
                    }),
                    Err(err) => {
                        failures += 1;
                        error!(capture = %path.display(), %err, "comparison failed");
                        serde_json::json!({
                            "capture": path.display().to_string(),
                            "error": err.to_string(),
                        })
                    }
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
            if failures > 0 {
                anyhow::bail!("{failures} of {} comparisons failed", after.len());
            }
        }
    }

    Ok(())
}

/// Logs go to stderr so that stdout carries only the JSON report.
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
