//! Overlay storage peer: a Kademlia DHT participant and HTTP/WebSocket
//! shard endpoint (see crate-level docs in `lib.rs` and `spec.md`).

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    peer_node::logging::initialize_logging()?;
    peer_node::cli::run().await
}
