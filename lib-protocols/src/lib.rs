//! Protocol state machine for the storage overlay (spec §4.G–§4.K): the ten
//! RPC methods a peer answers, the outbound client that calls them on other
//! peers, the renter-side offer stream, and the tunnel pool interface the
//! FIND_TUNNEL/OPEN_TUNNEL handlers need.

pub mod client;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod offer;
pub mod tunnel;
pub mod types;

pub use client::NodeClient;
pub use error::{ProtocolError, ProtocolResult};
pub use handlers::{ProtocolHandlers, TriggerHandler};
pub use offer::OfferStream;
pub use tunnel::{GatewayLease, TunnelPool};
