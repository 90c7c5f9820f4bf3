//! The narrow interface protocol handlers need into the tunnel gateway pool
//! (lib-network), kept here rather than a hard dependency so this crate
//! doesn't need to know about WebSockets or port allocation.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct GatewayLease {
    pub ws_url: String,
    pub address: String,
    pub port: u16,
}

#[async_trait]
pub trait TunnelPool: Send + Sync {
    /// Allocate a gateway from the pool. `None` means the pool is at
    /// capacity (spec's *maximum tunnels open*).
    async fn allocate_gateway(&self) -> Option<GatewayLease>;

    /// Whether this node currently has at least one free gateway slot,
    /// used by FIND_TUNNEL to decide whether to offer itself as a relay.
    async fn has_free_gateway(&self) -> bool;
}
