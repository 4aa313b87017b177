use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::node::{PrimaryConfig, ReplicaConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept writes, log them as events and push them to replicas.
    Primary(PrimaryArgs),
    /// Receive pushed events and catch up from the primary.
    Replica(ReplicaArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Node name; also names the database file.
    #[arg(long, env = "NODE_NAME")]
    pub name: String,

    /// Socket address to serve HTTP on. Use port 0 for an ephemeral port.
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Directory holding `<name>.db`.
    #[arg(long, default_value = "db")]
    pub data_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PrimaryArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Replica base URL, e.g. http://127.0.0.1:5001. Repeat or comma-separate.
    #[arg(long = "replica", env = "REPLICAS", value_delimiter = ',')]
    pub replicas: Vec<String>,

    /// Per-replica push timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub push_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ReplicaArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Primary base URL used for catch-up. Without it only pushes are applied.
    #[arg(long, env = "PRIMARY_URL")]
    pub primary: Option<String>,

    #[arg(long, default_value_t = 5000)]
    pub sync_interval_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub sync_timeout_ms: u64,
}

impl From<PrimaryArgs> for PrimaryConfig {
    fn from(args: PrimaryArgs) -> Self {
        let NodeArgs {
            name,
            listen,
            data_dir,
        } = args.node;
        Self {
            replicas: args
                .replicas
                .into_iter()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect(),
            push_timeout: Duration::from_millis(args.push_timeout_ms),
            ..PrimaryConfig::new(name, listen, data_dir)
        }
    }
}

impl From<ReplicaArgs> for ReplicaConfig {
    fn from(args: ReplicaArgs) -> Self {
        let NodeArgs {
            name,
            listen,
            data_dir,
        } = args.node;
        Self {
            primary: args.primary.filter(|url| !url.trim().is_empty()),
            sync_interval: Duration::from_millis(args.sync_interval_ms.max(1)),
            sync_timeout: Duration::from_millis(args.sync_timeout_ms),
            ..ReplicaConfig::new(name, listen, data_dir)
        }
    }
}
