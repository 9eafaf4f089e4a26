//! `rsx-recv` command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use reposync_store::{MemoryContentStore, MemoryNodeStore};

use crate::config::ReceiverConfig;
use crate::progress::{InMemoryProgressMonitor, TransferId};
use crate::receiver::TransferReceiver;
use crate::requisite::VecRequisiteWriter;

/// Applies transfer manifests to a node store snapshot.
#[derive(Parser)]
#[command(name = "rsx-recv")]
#[command(about = "reposync transfer receiver", long_about = None)]
pub struct Cli {
    /// Receiver configuration (`.toml` or `.json`).
    #[arg(short, long, env = "RSX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Command,
}

/// `rsx-recv` subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Apply a manifest and print the destination report.
    Apply {
        /// JSON snapshot of the destination store; created when missing.
        #[arg(long)]
        store: PathBuf,
        /// Manifest file (JSON lines).
        #[arg(long)]
        manifest: PathBuf,
        /// Directory holding content parts named by part name.
        #[arg(long)]
        content: PathBuf,
    },
    /// Print the content parts the destination still needs.
    Requisite {
        /// JSON snapshot of the destination store.
        #[arg(long)]
        store: PathBuf,
        /// Manifest file (JSON lines).
        #[arg(long)]
        manifest: PathBuf,
    },
}

impl Cli {
    /// Runs the selected subcommand.
    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        match self.command {
            Command::Apply {
                ref store,
                ref manifest,
                ref content,
            } => apply(config, store, manifest, content).await,
            Command::Requisite {
                ref store,
                ref manifest,
            } => requisite(config, store, manifest),
        }
    }

    fn load_config(&self) -> Result<ReceiverConfig> {
        match &self.config {
            Some(path) => ReceiverConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display())),
            None => Ok(ReceiverConfig {
                staging_root: std::env::temp_dir().join("reposync-staging"),
                ..ReceiverConfig::default()
            }),
        }
    }
}

fn open_store(path: &Path) -> Result<Arc<MemoryNodeStore>> {
    if path.exists() {
        let store = MemoryNodeStore::load(path)
            .with_context(|| format!("loading store {}", path.display()))?;
        Ok(Arc::new(store))
    } else {
        warn!(path = %path.display(), "store snapshot not found, starting empty");
        Ok(Arc::new(MemoryNodeStore::new()))
    }
}

fn receiver(config: ReceiverConfig, store: Arc<MemoryNodeStore>) -> Arc<TransferReceiver> {
    Arc::new(TransferReceiver::new(
        config,
        store,
        Arc::new(MemoryContentStore::new()),
        Arc::new(InMemoryProgressMonitor::new()),
    ))
}

fn stage_manifest(
    receiver: &TransferReceiver,
    manifest: &Path,
) -> Result<(TransferId, VecRequisiteWriter)> {
    let id = receiver.start()?;
    let file = File::open(manifest).with_context(|| format!("opening {}", manifest.display()))?;
    receiver.save_snapshot(&id, file)?;
    let mut requisite = VecRequisiteWriter::new();
    receiver.generate_requisite(&id, &mut requisite)?;
    Ok((id, requisite))
}

async fn apply(config: ReceiverConfig, store: &Path, manifest: &Path, content: &Path) -> Result<()> {
    let node_store = open_store(store)?;
    let receiver = receiver(config, node_store.clone());
    let (id, requisite) = stage_manifest(&receiver, manifest)?;

    for missing in requisite.missing() {
        let part = content.join(&missing.part_name);
        if !part.is_file() {
            warn!(part = %missing.part_name, node = %missing.node, "content part not supplied");
            continue;
        }
        receiver.save_content(&id, &missing.part_name, File::open(&part)?)?;
    }
    receiver.prepare(&id)?;

    let committed = receiver.commit_async(&id).await?;
    let report = receiver.get_transfer_report(&id)?;
    println!("{}", String::from_utf8_lossy(&report));
    receiver.end(&id)?;
    committed?;

    node_store.save(store)?;
    info!(transfer_id = %id, store = %store.display(), "store saved");
    Ok(())
}

fn requisite(config: ReceiverConfig, store: &Path, manifest: &Path) -> Result<()> {
    let receiver = receiver(config, open_store(store)?);
    let (id, requisite) = stage_manifest(&receiver, manifest)?;
    receiver.end(&id)?;
    println!("{}", serde_json::to_string_pretty(requisite.missing())?);
    Ok(())
}
