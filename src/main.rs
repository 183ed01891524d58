use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tabular_ingest::clients::{
    InMemoryObjectStore, LocalObjectStore, PrestoClient, QueryEngineClient, RecordingQueryEngine,
    StorageClient, StoragePaths,
};
use tabular_ingest::date_grouping::date_grouping_expression_str;
use tabular_ingest::ingestion::{
    FileOperation, IngestionPipeline, IngestionRequest, IngestionStatus, UploadedFile,
};
use tabular_ingest::PipelineConfig;

#[derive(Parser)]
#[command(name = "tabular-ingest")]
#[command(about = "Turn uploaded CSV files into external tables and a joining view")]
struct Args {
    /// JSON config file (defaults to INGEST_* / PRESTO_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a batch of local CSV files and create tables in the query engine
    Ingest(BatchArgs),
    /// Print the statements a batch would execute without contacting the engine
    Plan(BatchArgs),
    /// Print a date grouping expression
    DateExpr {
        column: String,
        /// Mode name, e.g. QUALIFIED_MONTH
        mode: String,
    },
}

#[derive(clap::Args)]
struct BatchArgs {
    /// View joining the batch's tables
    #[arg(long)]
    view: String,

    /// Entries as TABLE:OPERATION:PATH, e.g. orders:ADD:./orders.csv.
    /// DELETE entries take a file name instead of a path.
    #[arg(required = true)]
    files: Vec<String>,
}

fn parse_entry(raw: &str) -> Result<UploadedFile> {
    let mut parts = raw.splitn(3, ':');
    let (Some(table), Some(op), Some(target)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("expected TABLE:OPERATION:PATH, got '{}'", raw);
    };
    let op: FileOperation = op.parse()?;
    Ok(match op {
        FileOperation::Delete => UploadedFile::delete(table, target),
        _ => UploadedFile::from_path(table, op, target),
    })
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::load(p)
            .with_context(|| format!("failed to load config from {}", p.display()))?,
        None => PipelineConfig::from_env()?,
    };
    Ok(config)
}

/// Copy the project's objects so a plan never writes to real storage.
async fn snapshot_storage(config: &PipelineConfig) -> Result<Arc<InMemoryObjectStore>> {
    let local = LocalObjectStore::new(&config.storage_root);
    let paths = StoragePaths::new(&config.workspace_id, &config.project_id);
    let snapshot = Arc::new(InMemoryObjectStore::new());
    for key in local.list_objects(&paths.project_root()).await? {
        let body = local.get_object(&key).await?;
        snapshot.insert(key, body);
    }
    Ok(snapshot)
}

async fn run_batch(
    config: PipelineConfig,
    storage: Arc<dyn StorageClient>,
    query_engine: Arc<dyn QueryEngineClient>,
    batch: BatchArgs,
) -> Result<IngestionStatus> {
    let files = batch
        .files
        .iter()
        .map(|f| parse_entry(f))
        .collect::<Result<Vec<_>>>()?;
    let mut pipeline = IngestionPipeline::new(config, storage, query_engine)?;

    let response = pipeline
        .ingest_batch(IngestionRequest {
            view_name: batch.view,
            files,
        })
        .await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.status)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let status = match args.command {
        Command::DateExpr { column, mode } => {
            println!("{}", date_grouping_expression_str(&column, &mode));
            return Ok(());
        }
        Command::Ingest(batch) => {
            let config = load_config(args.config.as_ref())?;
            let engine = Arc::new(PrestoClient::new(&config.presto)?);
            info!(coordinator = %config.presto.coordinator_url, "ingesting batch");
            let storage = Arc::new(LocalObjectStore::new(&config.storage_root));
            run_batch(config, storage, engine, batch).await?
        }
        Command::Plan(batch) => {
            let config = load_config(args.config.as_ref())?;
            let storage = snapshot_storage(&config).await?;
            let engine = Arc::new(RecordingQueryEngine::new());
            let status = run_batch(config, storage, engine.clone(), batch).await?;
            for statement in engine.statements() {
                println!("{};", statement.trim_end_matches(';'));
            }
            status
        }
    };

    if status == IngestionStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
