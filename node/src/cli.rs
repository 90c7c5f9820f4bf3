//! peer-node command line: the operational surface for running and
//! inspecting one overlay peer. Contract drafting, key-ring management and
//! file upload/download belong to the bridge/CLI tooling the spec treats as
//! an external collaborator (§1); this binary only starts and reports on
//! the long-running peer process.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::{ConfigOverrides, NodeConfig};
use crate::orchestrator::PeerNode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Overlay storage peer node", name = "peer-node")]
pub struct PeerCli {
    #[command(subcommand)]
    pub command: PeerCommand,
}

#[derive(Subcommand, Debug)]
pub enum PeerCommand {
    /// Start the peer: identity, storage adapter, protocol handlers, shard
    /// server and tunnel gateway pool, all running until interrupted.
    Start(StartArgs),
    /// Print this node's identity (node id, address, public key) without
    /// starting any servers.
    Identity(StartArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// TOML configuration file. Defaults are used for anything it omits.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for identity keys, shard bytes and metadata.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Address the shard transfer server binds to.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Address other peers should use to reach this node.
    #[arg(long)]
    pub advertise_address: Option<String>,

    /// Port other peers should use to reach this node.
    #[arg(long)]
    pub advertise_port: Option<u16>,
}

impl StartArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            data_dir: self.data_dir,
            shard_bind: self.bind,
            advertise_address: self.advertise_address,
            advertise_port: self.advertise_port,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = PeerCli::parse();
    match cli.command {
        PeerCommand::Start(args) => {
            let config_path = args.config.clone();
            let config = NodeConfig::load(config_path.as_ref(), args.into_overrides())?;
            let node = PeerNode::bootstrap(config).await?;
            tracing::info!(
                node_id = %node.node_id_hex(),
                address = %node.advertise_address(),
                "peer node starting"
            );
            node.run().await
        }
        PeerCommand::Identity(args) => {
            let config_path = args.config.clone();
            let config = NodeConfig::load(config_path.as_ref(), args.into_overrides())?;
            let identity = crate::orchestrator::load_identity(&config)?;
            println!("node_id:    {}", identity.node_id_hex());
            println!("address:    {}", identity.address());
            println!("public_key: {}", hex::encode(identity.public_key_bytes()));
            Ok(())
        }
    }
}
