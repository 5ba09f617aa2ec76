// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use packsmith::command::{Command, CommandRequest};
use packsmith::operation::{
    ChannelJobQueue, JobQueue, OperationRegistry, RecordingExecutor, SqliteOperationRegistry, run_worker,
};
use packsmith::registry::SqliteRegistry;
use packsmith::{CommandResponse, Config, PackAction, PackService};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

mod cli;

use cli::{Cli, Commands, DbCommands, OpCommands, PackCommands, SessionCommands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(db_path) = &cli.db_path {
        config.storage.db_path = db_path.clone();
    }
    if let Some(dir) = &cli.manifest_dir {
        config.manifest.dir = dir.clone();
    }

    if let Commands::Db(DbCommands::Init) = &cli.command {
        info!("Initializing database at: {}", config.storage.db_path.display());
        packsmith::db::init(&config.storage.db_path)?;
        println!("Database initialized successfully at: {}", config.storage.db_path.display());
        return Ok(());
    }

    let (queue, rx) = ChannelJobQueue::new();
    let (worker, _parked) = if config.worker.enabled {
        let operations: Arc<dyn OperationRegistry> =
            Arc::new(SqliteOperationRegistry::new(config.storage.db_path.clone()));
        let executor = Arc::new(RecordingExecutor::new(Arc::new(SqliteRegistry::new(
            config.storage.db_path.clone(),
        ))));
        (Some(tokio::spawn(run_worker(rx, operations, executor))), None)
    } else {
        debug!("In-process worker disabled; jobs stay queued");
        (None, Some(rx))
    };

    let output = {
        let jobs: Arc<dyn JobQueue> = Arc::new(queue);
        let service = PackService::from_config(&config, jobs)?;
        run(&service, &cli)
    };

    // The service owned the last sender, so the worker stops once it has
    // drained what this command queued.
    if let Some(worker) = worker {
        let processed = worker.await.context("Worker task failed")?;
        debug!("Worker processed {} jobs", processed);
    }

    match output {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) if e.is_user_facing() => {
            let body = json!({ "error_kind": e.kind(), "message": e.to_string(), "details": e.details() });
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn response(response: CommandResponse) -> packsmith::Result<Value> {
    Ok(serde_json::to_value(response)?)
}

fn run(service: &PackService, cli: &Cli) -> packsmith::Result<Value> {
    let user = cli.user.as_str();
    let ref_id = cli.ref_id.as_str();

    match &cli.command {
        Commands::Session(cmd) => {
            let command = match cmd {
                SessionCommands::Show => {
                    return Ok(serde_json::to_value(service.session(user, ref_id)?)?);
                }
                SessionCommands::Raw { request } => {
                    let request: CommandRequest = serde_json::from_str(request)?;
                    return response(service.execute(user, ref_id, request)?);
                }
                SessionCommands::Init => Command::Init,
                SessionCommands::Select { pack } => Command::SelectPack {
                    pack_name: pack.clone(),
                },
                SessionCommands::Deselect { pack, cascade } => Command::DeselectPack {
                    pack_name: pack.clone(),
                    cascade: *cascade,
                },
                SessionCommands::Action { pack, action } => Command::SetPackAction {
                    pack_name: pack.clone(),
                    action: action.parse::<PackAction>()?,
                },
                SessionCommands::Rename { pack, page, title } => Command::RenamePage {
                    pack_name: pack.clone(),
                    page_name: page.clone(),
                    title: title.clone(),
                },
                SessionCommands::Prefix { pack, prefix } => Command::SetPackPrefix {
                    pack_name: pack.clone(),
                    prefix: prefix.clone(),
                },
                SessionCommands::Refresh => Command::Refresh,
                SessionCommands::Clear => Command::Clear,
                SessionCommands::Apply { hash } => {
                    let state_hash = match hash {
                        Some(hash) => hash.clone(),
                        None => service
                            .session(user, ref_id)?
                            .map(|s| s.hash)
                            .unwrap_or_default(),
                    };
                    Command::Apply {
                        state_hash,
                        client_packs: None,
                    }
                }
            };
            response(service.run(user, ref_id, command)?.into())
        }
        Commands::Pack(cmd) => {
            let operation = match cmd {
                PackCommands::Install { packs } => service.install(user, ref_id, packs)?,
                PackCommands::Update { packs } => service.update(user, ref_id, packs)?,
                PackCommands::Remove { packs } => service.remove(user, ref_id, packs)?,
            };
            Ok(serde_json::to_value(operation)?)
        }
        Commands::Op(cmd) => match cmd {
            OpCommands::Show { operation_id } => {
                let operation = service.operation(operation_id)?.ok_or_else(|| {
                    packsmith::Error::InvalidArgument(format!("No operation {}", operation_id))
                })?;
                Ok(serde_json::to_value(operation)?)
            }
            OpCommands::List { limit } => Ok(serde_json::to_value(service.operations(user, *limit)?)?),
        },
        Commands::Db(DbCommands::Init) => Ok(json!({ "initialized": true })),
    }
}
