use anyhow::Result;
use clap::Parser;
use tracing::warn;

use event_replication::{
    cli::{Cli, Command},
    node::{PrimaryNode, ReplicaNode},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Primary(args) => {
            PrimaryNode::bind(args.into())
                .await?
                .run_until_ctrl_c()
                .await
        }
        Command::Replica(args) => {
            ReplicaNode::bind(args.into())
                .await?
                .run_until_ctrl_c()
                .await
        }
    };

    if let Err(err) = &result {
        warn!("node exited with error: {err:?}");
    }
    result
}
