use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dashboard_core::{load_config, DashboardEngine, DurableBackend};
use shared::{
    catalog::WorkspaceMetadata,
    domain::{DashboardDocument, ObjRef},
    protocol::{DashboardCommand, DashboardEvent},
};
use storage::Storage;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://dashboards.db")]
    database_url: String,
    /// Overrides the workspace from `dashboard.toml` / `DASH__WORKSPACE`.
    #[arg(long)]
    workspace: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stores catalog and settings for the workspace.
    ImportWorkspace { metadata: PathBuf },
    ImportDashboard { document: PathBuf },
    ListDashboards,
    /// Deletes by identifier, or by uri when the argument starts with `/`.
    DeleteDashboard { dashboard: String },
    /// Runs a JSON array of commands through the engine and prints every event as a JSON line.
    Replay {
        #[arg(long)]
        script: PathBuf,
        /// How long to keep collecting background events after the last command.
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let mut config = load_config()?;
    if let Some(workspace) = cli.workspace {
        config = config.with_workspace(workspace);
    }
    let storage = Storage::new(&cli.database_url).await?;
    let workspace = config.workspace.clone();

    match cli.command {
        Command::ImportWorkspace { metadata } => {
            let metadata: WorkspaceMetadata = read_json(&metadata)?;
            storage.save_workspace_metadata(&workspace, &metadata).await?;
            println!(
                "imported workspace={} attributes={} measures={}",
                workspace,
                metadata.catalog.attributes.len(),
                metadata.catalog.measures.len()
            );
        }
        Command::ImportDashboard { document } => {
            let document: DashboardDocument = read_json(&document)?;
            let stored = storage.save_dashboard(&workspace, &document).await?;
            println!(
                "imported dashboard identifier={} title={}",
                stored.identifier.unwrap_or_default(),
                stored.title
            );
        }
        Command::ListDashboards => {
            for summary in storage.list_dashboards(&workspace).await? {
                let updated = summary
                    .updated
                    .map(|updated| updated.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                println!("{}\t{}\t{}", summary.identifier, updated, summary.title);
            }
        }
        Command::DeleteDashboard { dashboard } => {
            let dashboard_ref = if dashboard.starts_with('/') {
                ObjRef::uri(dashboard)
            } else {
                ObjRef::identifier(dashboard)
            };
            if !storage.delete_dashboard(&workspace, &dashboard_ref).await? {
                bail!("dashboard {dashboard_ref} not found in workspace {workspace}");
            }
            println!("deleted dashboard {dashboard_ref}");
        }
        Command::Replay { script, settle_ms } => {
            let commands: Vec<DashboardCommand> = read_json(&script)?;
            let engine = DashboardEngine::spawn(Arc::new(DurableBackend::new(storage)), config);
            let mut events = engine.subscribe_events();

            info!("replaying script commands={}", commands.len());
            for command in commands {
                let command_type = command.body.command_type();
                let outcome = engine.dispatch(command).await?;
                if let Some(failure) = outcome.failure() {
                    warn!(
                        "command failed command_type={} correlation_id={} reason={:?}",
                        command_type, outcome.correlation_id, failure.reason
                    );
                }
                print_pending(&mut events)?;
            }

            tokio::time::sleep(Duration::from_millis(settle_ms)).await;
            print_pending(&mut events)?;
            engine.shutdown().await;
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_pending(events: &mut broadcast::Receiver<DashboardEvent>) -> Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(TryRecvError::Lagged(skipped)) => warn!("event output lagged skipped={}", skipped),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
        }
    }
}
