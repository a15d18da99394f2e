use clap::Parser;
use helpmate_lib::config::{self, NodeRole};
use std::path::PathBuf;

/// HelpMate node coordinator
#[derive(Debug, Parser)]
#[command(name = "helpmate", version, about)]
struct Cli {
    /// Config file (defaults to ~/.helpmate/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node role, overriding the config file
    #[arg(long)]
    role: Option<NodeRole>,

    /// Listen address, e.g. 0.0.0.0:8000
    #[arg(long)]
    listen: Option<String>,

    /// Peer base URL, e.g. http://192.168.1.20:5000
    #[arg(long)]
    peer: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(config::default_config_path);
    let mut config = config::load_or_default(&path);
    if let Some(role) = cli.role {
        config.node.role = role;
        if config.node.name == config::NodeConfig::default().name {
            config.node.name = role.as_str().to_string();
        }
    }
    if let Some(listen) = cli.listen {
        config.node.listen_addr = listen;
    }
    if let Some(peer) = cli.peer {
        config.node.peer_url = peer;
    }

    helpmate_lib::logging::init(config.node.role);
    tracing::info!(
        "Starting HelpMate {} ({}) on {}",
        env!("CARGO_PKG_VERSION"),
        config.node.role.as_str(),
        config.node.listen_addr
    );

    helpmate_lib::run(config).await
}
