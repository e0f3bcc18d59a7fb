use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use songqueue::storage::persistence::recover_snapshot;
use songqueue::{NewRequest, RecoveryOutcome, RequestStatus, RequestStore, StoreConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "songqueue")]
#[command(about = "Song request queue backed by a crash-safe JSON file")]
pub struct Cli {
    /// Snapshot file (overrides SONGQUEUE_DATA)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Skip the recovery pass when opening the store
    #[arg(long, global = true)]
    no_recover: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue a new request
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        artist: String,
        #[arg(long)]
        requester: String,
        #[arg(long)]
        url: Option<String>,
    },
    /// List requests, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Set the status of a request
    Status { id: u64, status: String },
    /// Remove a request
    Delete { id: u64 },
    /// Reconcile a leftover temp snapshot and exit
    Recover,
    /// Hold the store open until Ctrl+C or SIGTERM, then shut down cleanly
    Serve,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = StoreConfig::from_env().context("failed to load configuration")?;
        if let Some(path) = self.data {
            config.data_path = path;
        }
        if self.no_recover {
            config.recover_on_open = false;
        }

        match self.command {
            Command::Recover => {
                let outcome = recover_snapshot(&config.data_path)
                    .await
                    .with_context(|| format!("recovery of '{}' failed", config.data_path.display()))?;
                println!("{}", describe_outcome(&outcome));
                Ok(())
            }
            Command::Serve => serve(config).await,
            command => {
                let store = open(&config).await?;
                let result = run_once(&store, command).await;
                store.shutdown().await.context("shutdown failed")?;
                result
            }
        }
    }
}

async fn open(config: &StoreConfig) -> Result<RequestStore> {
    RequestStore::open(config.clone())
        .await
        .with_context(|| format!("failed to open store at '{}'", config.data_path.display()))
}

async fn run_once(store: &RequestStore, command: Command) -> Result<()> {
    match command {
        Command::Add {
            title,
            artist,
            requester,
            url,
        } => {
            let candidate = NewRequest {
                title,
                artist,
                requester,
                url,
            };
            candidate.validate()?;
            let record = store.create(candidate).await?;
            print_json(&record)
        }
        Command::List { status } => {
            let records = match status {
                Some(raw) => store.get_by_status(raw.parse::<RequestStatus>()?).await,
                None => store.get_all().await,
            };
            print_json(&records)
        }
        Command::Status { id, status } => {
            let status = status.parse::<RequestStatus>()?;
            match store.update_status(id, status).await? {
                Some(record) => print_json(&record),
                None => Err(anyhow!("request {} not found", id)),
            }
        }
        Command::Delete { id } => {
            if !store.delete(id).await? {
                bail!("request {} not found", id);
            }
            println!("request {} deleted", id);
            Ok(())
        }
        Command::Recover | Command::Serve => bail!("command does not run against an open store"),
    }
}

async fn serve(config: StoreConfig) -> Result<()> {
    let store = open(&config).await?;
    let records = store.len().await;
    info!(
        path = %config.data_path.display(),
        records,
        "serving; press Ctrl+C to stop"
    );

    crate::shutdown_signal().await;

    info!("shutdown requested, saving data");
    let outcome = store.shutdown().await.context("shutdown failed")?;
    info!("data saved: {}", describe_outcome(&outcome));
    Ok(())
}

fn describe_outcome(outcome: &RecoveryOutcome) -> String {
    match outcome {
        RecoveryOutcome::Promoted { bytes } | RecoveryOutcome::FellBack { bytes } => {
            format!("{} ({} bytes)", outcome.describe(), bytes.len())
        }
        _ => outcome.describe().to_string(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
