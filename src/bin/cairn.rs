//! Cairn CLI Binary
//!
//! Command-line interface for the Cairn backup engine.

use anyhow::{bail, Context, Result};
use cairn::api::{BackupEngine, ProducedArtifact};
use cairn::config::CairnConfig;
use cairn::logging::init_logging;
use cairn::restore::{RegenerationPolicy, RestoreStrategy};
use cairn::types::Digest;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use owo_colors::OwoColorize;
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use tracing::error;

#[derive(Parser)]
#[command(name = "cairn", about = "Content-addressable backup engine", version)]
struct Cli {
    /// Store root directory (overrides config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a JSON payload from a file (or stdin) and print its digest
    Store {
        /// Payload file; reads stdin when omitted
        file: Option<PathBuf>,
    },
    /// Print a stored payload by digest
    Cat { digest: String },
    /// Check whether a digest has stored content
    Exists { digest: String },
    /// Delete a blob by digest
    Delete { digest: String },
    /// List all stored digests
    List,
    /// Ingest an artifact manifest and freeze it into a snapshot
    Backup {
        /// JSON manifest: an array of artifacts
        manifest: PathBuf,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        tag: Vec<String>,
        /// Exempt the snapshot from deletion and GC, forever
        #[arg(long)]
        immutable: bool,
    },
    /// Snapshot index operations
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    /// Restore a snapshot, printing the restore report
    Restore {
        id: String,
        /// Re-validate blob content instead of an existence check
        #[arg(long)]
        validate: bool,
        /// Proceed even when the snapshot fails consensus validation
        #[arg(long)]
        best_effort: bool,
        /// Restrict the walk to these node ids
        #[arg(long)]
        node: Vec<String>,
        /// Diff against this baseline snapshot id
        #[arg(long)]
        baseline: Option<String>,
    },
    /// Apply the retention policy, deleting expired snapshots
    Gc {
        #[arg(long)]
        max_snapshots: Option<usize>,
        #[arg(long)]
        ttl_days: Option<i64>,
    },
    /// Checksum every stored blob and report corruption
    Verify,
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write the active configuration to a TOML file
    Init {
        /// Destination path
        #[arg(long, default_value = "cairn.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// List all snapshots
    List,
    /// Delete a snapshot by id
    Delete { id: String },
}

/// One entry of a backup manifest.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: String,
    payload: Value,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    trace_id: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let config = match CairnConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&config.logging)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(cli, config) {
        error!("Command failed: {:#}", e);
        eprintln!("{} {:#}", "error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(cli: Cli, config: CairnConfig) -> Result<()> {
    // Config commands never touch the store.
    if let Command::Config(ConfigCommand::Init { path, force }) = &cli.command {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        std::fs::write(path, config.to_toml()?)
            .with_context(|| format!("failed to write {:?}", path))?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let root = cli.store.unwrap_or_else(|| config.store_root.clone());
    let engine = BackupEngine::open(&root)
        .with_context(|| format!("failed to open store at {:?}", root))?;

    match cli.command {
        Command::Store { file } => {
            let payload = read_payload(file)?;
            let digest = engine.store_payload(&payload)?;
            println!("{}", digest);
        }
        Command::Cat { digest } => {
            let digest = parse_digest(&digest)?;
            let payload = engine.retrieve_payload(&digest)?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Exists { digest } => {
            let digest = parse_digest(&digest)?;
            if engine.payload_exists(&digest) {
                println!("{}", "present".green());
            } else {
                println!("{}", "absent".red());
                process::exit(1);
            }
        }
        Command::Delete { digest } => {
            let digest = parse_digest(&digest)?;
            if engine.live_digests().contains(&digest) {
                bail!("digest {} is referenced by a live snapshot", digest);
            }
            if engine.delete_payload(&digest)? {
                println!("deleted {}", digest);
            } else {
                println!("absent {}", digest);
            }
        }
        Command::List => {
            for digest in engine.cas().list()? {
                println!("{}", digest);
            }
        }
        Command::Backup {
            manifest,
            description,
            tag,
            immutable,
        } => {
            let bytes = std::fs::read(&manifest)
                .with_context(|| format!("failed to read manifest {:?}", manifest))?;
            let entries: Vec<ManifestEntry> =
                serde_json::from_slice(&bytes).context("manifest does not parse")?;

            for entry in entries {
                let mut artifact =
                    ProducedArtifact::new(entry.id, entry.payload).with_deps(entry.deps);
                artifact.agent_id = entry.agent_id;
                artifact.trace_id = entry.trace_id;
                engine.ingest_artifact(artifact)?;
            }

            let snapshot = engine.create_snapshot(description, tag, immutable)?;
            let consensus = if snapshot.dag.consensus_valid {
                "consistent".green().to_string()
            } else {
                "inconsistent".yellow().to_string()
            };
            println!(
                "created {} ({} nodes, {} digests, {})",
                snapshot.id,
                snapshot.dag.node_count(),
                snapshot.referenced_digests.len(),
                consensus
            );
        }
        Command::Snapshot(SnapshotCommand::List) => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec![
                "ID",
                "Created",
                "Nodes",
                "Digests",
                "Immutable",
                "Description",
            ]);
            for snapshot in engine.list_snapshots() {
                table.add_row(vec![
                    snapshot.id.clone(),
                    snapshot.timestamp.to_rfc3339(),
                    snapshot.dag.node_count().to_string(),
                    snapshot.referenced_digests.len().to_string(),
                    if snapshot.immutable { "yes" } else { "no" }.to_string(),
                    snapshot.description.clone(),
                ]);
            }
            println!("{table}");
        }
        Command::Snapshot(SnapshotCommand::Delete { id }) => {
            if engine.delete_snapshot(&id)? {
                println!("deleted {}", id);
            } else {
                bail!("snapshot {} is absent or immutable", id);
            }
        }
        Command::Restore {
            id,
            validate,
            best_effort,
            node,
            baseline,
        } => {
            let strategy = if let Some(baseline) = baseline {
                RestoreStrategy::Incremental { baseline }
            } else if !node.is_empty() {
                RestoreStrategy::Selective { nodes: node }
            } else {
                RestoreStrategy::Full
            };
            let policy = RegenerationPolicy {
                strategy,
                validate_before_restore: validate,
                ..config.default_policy()
            };

            let report = if best_effort {
                engine.restore_snapshot_best_effort(&id, &policy)?
            } else {
                engine.restore_snapshot(&id, &policy)?
            };

            for node in &report.restored_nodes {
                println!("{} {}", "restored ".green(), node);
            }
            for node in &report.recompute_nodes {
                println!("{} {}", "recompute".yellow(), node);
            }
            println!(
                "{} restored, {} flagged for recompute",
                report.restored_nodes.len(),
                report.recompute_nodes.len()
            );
        }
        Command::Gc {
            max_snapshots,
            ttl_days,
        } => {
            let mut policy = config.default_policy();
            if let Some(max) = max_snapshots {
                policy.max_snapshots = max;
            }
            if ttl_days.is_some() {
                policy.ttl_days = ttl_days;
            }

            let deleted = engine.garbage_collect(&policy)?;
            if deleted.is_empty() {
                println!("nothing to collect");
            } else {
                for id in &deleted {
                    println!("collected {}", id);
                }
            }
        }
        Command::Verify => {
            let corrupt = engine.verify_store()?;
            if corrupt.is_empty() {
                println!("{} all blobs verify", "ok".green());
            } else {
                for digest in &corrupt {
                    println!("{} {}", "corrupt".red(), digest);
                }
                process::exit(1);
            }
        }
        // Handled before the store was opened.
        Command::Config(_) => {}
    }

    Ok(())
}

fn read_payload(file: Option<PathBuf>) -> Result<Value> {
    let bytes = match file {
        Some(path) => {
            std::fs::read(&path).with_context(|| format!("failed to read {:?}", path))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };
    serde_json::from_slice(&bytes).context("payload is not valid JSON")
}

fn parse_digest(s: &str) -> Result<Digest> {
    s.parse().with_context(|| format!("invalid digest: {}", s))
}
