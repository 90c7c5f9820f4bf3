//! Tunnel transport for peers that can't be reached directly: multiplexed
//! WebSocket framing, a relay-side gateway pool, and the client loop that
//! pipes a borrowed public port back to a node's own local servers.

pub mod tunnel;

pub use tunnel::{Gateway, TunnelFrame, TunnelMux, TunnelServer, TunnelServerConfig, TunnelServerEvent};
