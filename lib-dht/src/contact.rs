//! A reachable peer: enough to address an RPC call or open a shard transfer
//! connection, independent of how the DHT located it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub node_id: String,
    pub address: String,
    pub port: u16,
}

impl Contact {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl std::fmt::Display for Contact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.node_id, self.address, self.port)
    }
}
