//! collabd: the Collab daemon.
//!
//! Single binary that runs a collaborator node:
//! - Persisted membership case
//! - Priority scheduler with built-in handlers
//! - Gossip catchup and dead-peer reaping
//! - Peer HTTP API (exchange, distribute, dispatch, digest)
//!
//! # Usage
//!
//! ```text
//! collabd init --case-id prod --ip 10.0.0.1 --port 8080 --seed 10.0.0.2:8080
//! collabd run --config collab.toml
//! collabd submit --peer 10.0.0.1:8080 --consumable sum --source 1 --source 2
//! collabd status --peer 10.0.0.1:8080
//! ```

mod handlers;
mod node;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use collab_cluster::{Case, HttpTransport};
use collab_core::{Card, CollabConfig, Priority, Task, TaskType, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collabd", about = "Collab task-fabric daemon")]
struct Cli {
    /// Path to collab.toml. Every setting has a default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a fresh case file for this node.
    Init {
        /// Cluster identifier shared by every node.
        #[arg(long)]
        case_id: String,

        /// Address peers reach this node at.
        #[arg(long)]
        ip: String,

        #[arg(long)]
        port: u16,

        /// Known peer, as IP:PORT. Repeatable.
        #[arg(long = "seed")]
        seeds: Vec<Card>,

        /// Route prefix for the peer API.
        #[arg(long)]
        api: Option<String>,

        /// Overwrite an existing case file.
        #[arg(long)]
        force: bool,
    },

    /// Run the node until Ctrl-C.
    Run {
        /// Bind address, overrides `node.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Worker count, overrides `node.workers`.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Send a batch of tasks to a node and print the results.
    Submit {
        /// Node to submit to, as IP:PORT.
        #[arg(long)]
        peer: Card,

        #[arg(long)]
        api: Option<String>,

        /// Handler name.
        #[arg(long)]
        consumable: String,

        /// Source value, parsed as JSON when possible. Repeatable.
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Number of copies of the task in the batch.
        #[arg(long, default_value = "1")]
        count: usize,

        /// Priority level, 0 (base) to 4 (urgent).
        #[arg(long, default_value = "0")]
        priority: u8,

        /// Task type, 0 (short) to 3 (permanent).
        #[arg(long = "type", default_value = "0")]
        task_type: u8,
    },

    /// Print a node's membership digest.
    Status {
        #[arg(long)]
        peer: Card,

        #[arg(long)]
        api: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Init {
            case_id,
            ip,
            port,
            seeds,
            api,
            force,
        } => {
            let mut local = Card::new(ip, port);
            if let Some(api) = api {
                local = local.with_api(api);
            }
            init_case(&config.node.case_file, &case_id, local, seeds, force)
        }
        Command::Run { listen, workers } => {
            if let Some(listen) = listen {
                config.node.listen = listen;
            }
            if let Some(workers) = workers {
                config.node.workers = workers;
            }
            node::run_node(config).await
        }
        Command::Submit {
            peer,
            api,
            consumable,
            sources,
            count,
            priority,
            task_type,
        } => {
            let task = Task::new(consumable)
                .with_priority(Priority::from(priority))
                .with_type(TaskType::from(task_type))
                .with_source(sources.iter().map(|s| parse_value(s)).collect());
            let batch: BTreeMap<usize, Task> = (0..count).map(|i| (i, task.clone())).collect();

            let transport = HttpTransport::new(config.dial_timeout());
            let results = transport.dispatch(&with_api(peer, api), &batch).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Command::Status { peer, api } => {
            let transport = HttpTransport::new(config.dial_timeout());
            let digest = transport.digest(&with_api(peer, api)).await?;
            println!("{}", serde_json::to_string_pretty(&digest)?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,collabd=debug,collab=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CollabConfig> {
    match path {
        Some(path) => {
            let config = CollabConfig::from_file(path)?;
            info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => Ok(CollabConfig::default()),
    }
}

fn init_case(path: &Path, case_id: &str, local: Card, seeds: Vec<Card>, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", path.display());
    }
    let case = Case::create(path, case_id, local, seeds)
        .with_context(|| format!("write case file {}", path.display()))?;
    info!(
        path = %path.display(),
        case = %case.case_id(),
        local = %case.local(),
        cards = case.peers().len(),
        "case initialized"
    );
    Ok(())
}

fn with_api(peer: Card, api: Option<String>) -> Card {
    match api {
        Some(api) => peer.with_api(api),
        None => peer,
    }
}

/// Parse a CLI value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cli_parses_init_with_seeds() {
        let cli = Cli::try_parse_from([
            "collabd", "init", "--case-id", "c1", "--ip", "10.0.0.1", "--port", "8080",
            "--seed", "10.0.0.2:8080", "--seed", "10.0.0.3:8081",
        ])
        .unwrap();
        match cli.command {
            Command::Init { seeds, case_id, .. } => {
                assert_eq!(case_id, "c1");
                assert_eq!(seeds, vec![Card::new("10.0.0.2", 8080), Card::new("10.0.0.3", 8081)]);
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn cli_rejects_bad_seed() {
        assert!(
            Cli::try_parse_from([
                "collabd", "init", "--case-id", "c1", "--ip", "10.0.0.1", "--port", "1",
                "--seed", "nope",
            ])
            .is_err()
        );
    }

    #[test]
    fn source_values_parse_as_json_or_string() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_value("hello"), json!("hello"));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.json");
        init_case(&path, "c1", Card::new("127.0.0.1", 1), vec![], false).unwrap();
        assert!(init_case(&path, "c1", Card::new("127.0.0.1", 1), vec![], false).is_err());
        init_case(&path, "c2", Card::new("127.0.0.1", 1), vec![], true).unwrap();
        assert_eq!(Case::load(&path).unwrap().case_id(), "c2");
    }
}
