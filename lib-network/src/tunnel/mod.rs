//! Tunnel multiplexer and gateway pool (spec §4.J, §4.K): lets a node
//! behind a NAT that UPnP/NAT-PMP couldn't open borrow a public port on a
//! relay and still answer shard requests and RPCs.

pub mod client;
pub mod frame;
pub mod gateway;
pub mod mux;
pub mod server;

pub use frame::{DatachannelType, Quid, TunnelFrame};
pub use gateway::Gateway;
pub use mux::TunnelMux;
pub use server::{TunnelServer, TunnelServerConfig, TunnelServerEvent};
