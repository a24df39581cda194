//! papr-ai - paper analysis runner
//!
//! Scores the papers of one domain (a dated arXiv category, or any other
//! grouping) with a stored prompt, records each result at most once per
//! prompt, and enriches positive papers with author affiliations.
//!
//! Subcommands:
//! - `analyze`: run a task and stream progress as JSON lines on stdout
//! - `status`: store-backed completion counts for a domain and prompt
//! - `import`: load items from a JSON file into a domain
//! - `prompt`: store or replace a prompt

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use papr_common::config::{resolve_config_path, resolve_database_path, TomlConfig};
use papr_common::events::TaskStatus;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use papr_ai::db::{init_database_pool, DedupStore, SqliteBackend};
use papr_ai::models::{NewWorkItem, TaskSignature};
use papr_ai::AnalysisService;

/// Command-line arguments for papr-ai
#[derive(Parser, Debug)]
#[command(name = "papr-ai")]
#[command(about = "Concurrent paper scoring and enrichment")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file (default: PAPR_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (default: PAPR_DATABASE, then TOML, then the user data dir)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score pending items of a domain and stream progress
    Analyze {
        #[command(flatten)]
        domain: DomainArgs,

        /// Prompt key; also the idempotency key for recorded results
        #[arg(short, long)]
        key: String,

        /// Process at most this many pending items
        #[arg(short, long)]
        limit: Option<usize>,

        /// Override `[orchestrator] workers`
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show total/completed/pending counts from the store
    Status {
        #[command(flatten)]
        domain: DomainArgs,

        #[arg(short, long)]
        key: String,
    },

    /// Load items from a JSON array file and link them to a domain
    Import {
        #[command(flatten)]
        domain: DomainArgs,

        /// JSON file: `[{"natural_key", "primary_text", "secondary_text", "external_ref"}]`
        file: PathBuf,
    },

    /// Store or replace a prompt
    Prompt {
        key: String,

        /// Read the prompt text from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Prompt text given inline
        #[arg(short, long)]
        text: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct DomainArgs {
    /// Explicit domain key
    #[arg(long, conflicts_with_all = ["date", "category"])]
    domain: Option<String>,

    /// Partition date (YYYY-MM-DD), used with --category
    #[arg(long, requires = "category")]
    date: Option<NaiveDate>,

    /// Partition category (e.g. cs.AI), used with --date
    #[arg(long, requires = "date")]
    category: Option<String>,
}

impl DomainArgs {
    fn signature(&self, key: &str) -> Result<TaskSignature> {
        match (&self.domain, self.date, &self.category) {
            (Some(domain), _, _) => Ok(TaskSignature::new(domain.clone(), key)),
            (None, Some(date), Some(category)) => Ok(TaskSignature::for_partition(date, category, key)),
            _ => bail!("either --domain or both --date and --category are required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config_found = config_path.exists();
    let mut config = TomlConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    config.apply_env_overrides();
    if let Command::Analyze { workers: Some(workers), .. } = &args.command {
        config.orchestrator.workers = *workers;
    }
    config.validate().context("Invalid configuration")?;

    // Initialize tracing; RUST_LOG wins over [logging] level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("papr_ai={0},papr_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("papr-ai {}", env!("CARGO_PKG_VERSION"));
    if config_found {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "No configuration file, using defaults");
    }

    let db_path = resolve_database_path(args.database.as_deref(), &config);
    info!(path = %db_path.display(), "Database");
    let pool = init_database_pool(&db_path, &config.store)
        .await
        .context("Failed to open database")?;

    match args.command {
        Command::Analyze { domain, key, limit, .. } => {
            let signature = domain.signature(&key)?;
            run_analysis(&config, pool, signature, limit).await
        }
        Command::Status { domain, key } => {
            let signature = domain.signature(&key)?;
            let store = open_store(&config, pool);
            let counts = store.status_for(&signature).await?;
            println!("{}", serde_json::to_string(&counts)?);
            Ok(())
        }
        Command::Import { domain, file } => {
            let signature = domain.signature("")?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let rows: Vec<NewWorkItem> =
                serde_json::from_str(&raw).with_context(|| format!("Invalid item file {}", file.display()))?;

            let store = open_store(&config, pool);
            let mapping = store.bulk_upsert_items(&rows).await?;
            let mut ids: Vec<i64> = mapping.values().copied().collect();
            ids.sort_unstable();
            let report = store.link_domain_items(&signature.domain_key, &ids).await?;

            info!(
                domain_key = %signature.domain_key,
                rows = rows.len(),
                items = ids.len(),
                failed_rows = report.failed_rows,
                "Import finished"
            );
            println!(
                "{}",
                serde_json::json!({
                    "domain_key": signature.domain_key,
                    "items": ids.len(),
                    "failed_rows": report.failed_rows,
                })
            );
            Ok(())
        }
        Command::Prompt { key, file, text } => {
            let content = match (file, text) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, Some(text)) => text,
                (None, None) => bail!("either --file or --text is required"),
            };
            if content.trim().is_empty() {
                bail!("prompt text is empty");
            }

            let store = open_store(&config, pool);
            store.upsert_prompt(&key, &content).await?;
            info!(prompt_key = %key, chars = content.chars().count(), "Prompt stored");
            Ok(())
        }
    }
}

fn open_store(config: &TomlConfig, pool: sqlx::SqlitePool) -> DedupStore {
    DedupStore::new(Arc::new(SqliteBackend::new(pool)), config.store.clone())
}

async fn run_analysis(
    config: &TomlConfig,
    pool: sqlx::SqlitePool,
    signature: TaskSignature,
    limit: Option<usize>,
) -> Result<()> {
    let service = AnalysisService::from_config(config, pool).await?;
    let task_id = service.submit_task(signature.clone(), limit)?;
    let handle = service
        .task(&task_id)
        .context("Submitted task is not registered")?;

    let mut events = Box::pin(service.stream_progress(&task_id)?);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut cancelled = false;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
            }
            _ = &mut shutdown, if !cancelled => {
                info!(task_id = %task_id, "Cancelling task, waiting for in-flight items");
                handle.cancel();
                cancelled = true;
            }
        }
    }

    let snapshot = handle.wait().await;
    let counts = service.status_of(&signature).await?;
    println!("{}", serde_json::json!({ "type": "Status", "status": counts }));

    if snapshot.status == TaskStatus::Error {
        bail!(
            "task {} failed: {}",
            task_id,
            snapshot.error_message.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
