//! offsync command-line tool
//!
//! Inspects a local offsync database, makes offline-first writes against it,
//! and runs sync cycles against the configured remote.
//!
//! Usage:
//!   offsync --db field.db --config offsync.json sync
//!   offsync --db field.db --offline put equipment '{"name": "Pump"}'

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use offsync_cli::{AppConfig, Engine};
use offsync_storage::{SyncAction, SyncScope};
use offsync_sync::{NewDocument, WriteOutcome};
use offsync_types::{EntityKind, Fields, OperationId};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline-first sync engine: local store, operation queue and sync cycles")]
struct Args {
    /// Path to the SQLite database
    #[arg(long, default_value = "offsync.db")]
    db: PathBuf,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the remote base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Treat the device as offline (writes are queued)
    #[arg(long)]
    offline: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show queue depth, last sync and entity counts
    Status,
    /// List queued operations in send order
    Pending,
    /// Run one sync cycle
    Sync,
    /// Sync on a timer until interrupted
    Watch {
        /// Seconds between cycles (config value if omitted)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Create an entity, or update it if `id` is given and exists
    Put {
        kind: String,
        /// JSON object with the entity's fields
        fields: String,
    },
    /// Print an entity
    Get { kind: String, id: String },
    /// Delete an entity
    Delete { kind: String, id: String },
    /// Store a file as a document and upload it
    Attach {
        kind: String,
        file: PathBuf,
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
    },
    /// Manage the pull scope
    #[command(subcommand)]
    Scope(ScopeCommand),
    /// Remove a queued operation without sending it
    Drop { operation: String },
    /// Remove expired cached blobs
    Sweep,
    /// Dump the whole store as JSON
    Export,
}

#[derive(Subcommand, Debug)]
enum ScopeCommand {
    /// Show the active scope
    Show,
    /// Set the active scope, e.g. `scope set vessels/v-17 equipment documents`
    Set {
        path: String,
        #[arg(required = true)]
        kinds: Vec<String>,
    },
    /// Stop pulling
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.as_str())),
        )
        .with_target(false)
        .compact()
        .init();

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        config.remote.base_url = base_url;
    }
    let engine = Engine::open(&args.db, &config)?;
    engine.connectivity.set_online(!args.offline);

    run(&engine, &config, args.command).await
}

async fn run(engine: &Engine, config: &AppConfig, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            let status = engine.orchestrator.status().await?;
            let stats = engine.store().stats()?;
            print_json(&serde_json::json!({
                "status": status,
                "stats": stats,
                "cache_bytes": engine.blobs().total_size()?,
            }))
        }
        Command::Pending => print_json(&engine.store().list_pending()?),
        Command::Sync => {
            let report = engine.orchestrator.sync_all().await?;
            info!("{}", report);
            print_json(&report)
        }
        Command::Watch { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.sync.auto_sync_interval());
            engine.orchestrator.start_auto_sync(Some(interval));
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for interrupt")?;
            engine.orchestrator.stop_auto_sync();
            Ok(())
        }
        Command::Put { kind, fields } => {
            let kind = parse_kind(&kind)?;
            let fields = parse_fields(&fields)?;
            let existing = match fields.get("id").and_then(Value::as_str) {
                Some(id) => engine.store().get_entity(kind.as_str(), id)?,
                None => None,
            };
            let outcome = match existing {
                Some(entity) => engine.writer.update(&kind, &entity.id, fields).await?,
                None => engine.writer.create(&kind, fields).await?,
            };
            print_outcome(&outcome)
        }
        Command::Get { kind, id } => {
            let kind = parse_kind(&kind)?;
            match engine.writer.get(&kind, &id).await? {
                Some(entity) => print_json(&entity),
                None => bail!("{kind}/{id} not found"),
            }
        }
        Command::Delete { kind, id } => {
            let outcome = engine.writer.delete(&parse_kind(&kind)?, &id).await?;
            print_outcome(&outcome)
        }
        Command::Attach {
            kind,
            file,
            id,
            mime_type,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let document = NewDocument {
                id,
                filename,
                mime_type,
                bytes,
                metadata: Fields::new(),
            };
            let outcome = engine
                .writer
                .upload_document(&parse_kind(&kind)?, document)
                .await?;
            print_outcome(&outcome)
        }
        Command::Scope(ScopeCommand::Show) => print_json(&engine.store().active_scope()?),
        Command::Scope(ScopeCommand::Set { path, kinds }) => {
            let kinds = kinds
                .iter()
                .map(|k| parse_kind(k))
                .collect::<Result<Vec<_>>>()?;
            let scope = SyncScope::new(path, kinds);
            engine.store().set_active_scope(Some(&scope))?;
            print_json(&scope)
        }
        Command::Scope(ScopeCommand::Clear) => {
            engine.store().set_active_scope(None)?;
            Ok(())
        }
        Command::Drop { operation } => {
            let id = OperationId::parse(&operation)
                .with_context(|| format!("invalid operation id {operation}"))?;
            let Some(queued) = engine.store().get_operation(&id)? else {
                bail!("operation {id} is not queued");
            };
            engine.store().remove_operation(&id)?;
            if let SyncAction::UploadDocument(upload) = &queued.action {
                engine.blobs().unpin(&upload.source_key)?;
            }
            info!("Dropped {}", queued.action);
            Ok(())
        }
        Command::Sweep => {
            let swept = engine.blobs().sweep_expired()?;
            info!("Swept {} expired blobs", swept);
            Ok(())
        }
        Command::Export => print_json(&engine.store().export_json()?),
    }
}

fn parse_kind(raw: &str) -> Result<EntityKind> {
    EntityKind::new(raw).with_context(|| format!("invalid entity kind {raw:?}"))
}

fn parse_fields(raw: &str) -> Result<Fields> {
    match serde_json::from_str(raw).context("fields must be JSON")? {
        Value::Object(fields) => Ok(fields),
        _ => bail!("fields must be a JSON object"),
    }
}

fn print_outcome<T: Serialize>(outcome: &WriteOutcome<T>) -> Result<()> {
    if let WriteOutcome::Queued { operation, .. } = outcome {
        info!("Queued as {}", operation);
    }
    print_json(outcome.value())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
