//! Configuration for linkmapd

use clap::Parser;
use std::net::SocketAddr;

/// linkmapd - cluster connectivity gossip daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "linkmapd")]
#[command(about = "Gossips a shared directory of which cluster nodes are connected to which")]
pub struct Config {
    /// Listen address for peer connections
    #[arg(short, long, default_value = "0.0.0.0:9400")]
    pub listen: SocketAddr,

    /// Stable node identifier; a random one is generated when omitted
    #[arg(long, env = "LINKMAP_NODE_ID")]
    pub node_id: Option<String>,

    /// Peer addresses to dial at startup
    pub peers: Vec<SocketAddr>,

    /// Log the merged graph after every applied batch
    #[arg(long)]
    pub dump_graph: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(id) = &self.node_id {
            if id.is_empty() {
                anyhow::bail!("Node id cannot be empty");
            }
            if id.len() > 64 {
                anyhow::bail!("Node id too long ({} bytes, max 64)", id.len());
            }
        }
        Ok(())
    }
}
