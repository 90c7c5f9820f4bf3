//! Tunable constants from spec §6.5.

use std::time::Duration;

pub const NONCE_EXPIRE: Duration = Duration::from_secs(15);
pub const RPC_TIMEOUT: Duration = Duration::from_secs(15);
pub const PUBLISH_TTL: u8 = 6;
pub const NET_REENTRY: Duration = Duration::from_secs(10 * 60);
pub const CLEAN_INTERVAL: Duration = Duration::from_secs(3 * 60 * 60);
pub const CONSIGN_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);
pub const TUNNEL_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const OFFER_TIMEOUT: Duration = Duration::from_secs(15);
pub const ROUTER_CLEAN_INTERVAL: Duration = Duration::from_secs(60);

pub const MAX_CONCURRENT_OFFERS: usize = 3;
pub const MAX_CONCURRENT_AUDITS: usize = 3;
pub const MAX_FIND_TUNNEL_RELAYS: usize = 3;
pub const DEFAULT_MAX_TUNNELS: usize = 3;
