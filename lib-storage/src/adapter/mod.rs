//! Content-addressed storage adapter: key (shard hash) to contracts, audit
//! trees, challenges, and shard bytes, over a pluggable backend.

mod fs_backend;
mod memory_backend;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use lib_contract::Contract;
use lib_crypto::NodeId;
use lib_proofs::{Challenge, LeafHash};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

pub use fs_backend::FsAdapter;
pub use memory_backend::MemoryAdapter;

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send + Unpin>>;

/// Everything the adapter holds about one `data_hash`, aside from the shard
/// bytes themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageItem {
    /// Contracts covering this hash, keyed by the counterparty's node id.
    /// A renter may hold more than one farmer's contract for the same hash
    /// only in the mirror case.
    #[serde(with = "node_id_map")]
    pub contracts: HashMap<NodeId, Contract>,
    /// Audit leaf lists installed at CONSIGN time (the renter's
    /// `audit_tree`), keyed by renter id.
    #[serde(with = "node_id_leaf_map")]
    pub trees: HashMap<NodeId, Vec<LeafHash>>,
    /// Challenge preimages, known only on the renter side that generated
    /// them, keyed by the farmer id they were issued to.
    #[serde(with = "node_id_challenge_map")]
    pub challenges: HashMap<NodeId, Vec<Challenge>>,
    /// Whether shard bytes are present in the backend for this hash.
    pub shard_present: bool,
}

impl StorageItem {
    pub fn new() -> Self {
        Self::default()
    }
}

mod node_id_map {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &HashMap<NodeId, Contract>, s: S) -> Result<S::Ok, S::Error> {
        let as_hex: HashMap<String, Contract> =
            map.iter().map(|(k, v)| (hex::encode(k), v.clone())).collect();
        as_hex.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HashMap<NodeId, Contract>, D::Error> {
        let as_hex: HashMap<String, Contract> = HashMap::deserialize(d)?;
        as_hex
            .into_iter()
            .map(|(k, v)| {
                let bytes = hex::decode(&k).map_err(serde::de::Error::custom)?;
                let id: NodeId = bytes.try_into().map_err(|_| serde::de::Error::custom("bad node id"))?;
                Ok((id, v))
            })
            .collect()
    }
}

mod node_id_leaf_map {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &HashMap<NodeId, Vec<LeafHash>>, s: S) -> Result<S::Ok, S::Error> {
        let as_hex: HashMap<String, Vec<String>> = map
            .iter()
            .map(|(k, v)| (hex::encode(k), v.iter().map(hex::encode).collect()))
            .collect();
        as_hex.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HashMap<NodeId, Vec<LeafHash>>, D::Error> {
        let as_hex: HashMap<String, Vec<String>> = HashMap::deserialize(d)?;
        as_hex
            .into_iter()
            .map(|(k, v)| {
                let bytes = hex::decode(&k).map_err(serde::de::Error::custom)?;
                let id: NodeId = bytes.try_into().map_err(|_| serde::de::Error::custom("bad node id"))?;
                let leaves = v
                    .into_iter()
                    .map(|h| {
                        let b = hex::decode(&h).map_err(serde::de::Error::custom)?;
                        b.try_into().map_err(|_| serde::de::Error::custom("bad leaf hash"))
                    })
                    .collect::<Result<Vec<LeafHash>, D::Error>>()?;
                Ok((id, leaves))
            })
            .collect()
    }
}

mod node_id_challenge_map {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &HashMap<NodeId, Vec<Challenge>>, s: S) -> Result<S::Ok, S::Error> {
        let as_hex: HashMap<String, Vec<String>> = map
            .iter()
            .map(|(k, v)| (hex::encode(k), v.iter().map(hex::encode).collect()))
            .collect();
        as_hex.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HashMap<NodeId, Vec<Challenge>>, D::Error> {
        let as_hex: HashMap<String, Vec<String>> = HashMap::deserialize(d)?;
        as_hex
            .into_iter()
            .map(|(k, v)| {
                let bytes = hex::decode(&k).map_err(serde::de::Error::custom)?;
                let id: NodeId = bytes.try_into().map_err(|_| serde::de::Error::custom("bad node id"))?;
                let challenges = v
                    .into_iter()
                    .map(|h| {
                        let b = hex::decode(&h).map_err(serde::de::Error::custom)?;
                        b.try_into().map_err(|_| serde::de::Error::custom("bad challenge"))
                    })
                    .collect::<Result<Vec<Challenge>, D::Error>>()?;
                Ok((id, challenges))
            })
            .collect()
    }
}

/// The content-addressed storage contract every backend implements.
///
/// Invariants: `put` then `get` returns an equivalent item; `del` removes
/// both metadata and shard bytes; writes are atomic with respect to crash
/// (either both contract-state and shard bytes survive, or neither do).
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn open(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;

    async fn put(&self, hash: &str, item: StorageItem) -> anyhow::Result<()>;
    async fn peek(&self, hash: &str) -> anyhow::Result<Option<StorageItem>>;
    async fn get(&self, hash: &str) -> anyhow::Result<Option<(StorageItem, Option<BoxedReader>)>>;
    async fn del(&self, hash: &str) -> anyhow::Result<()>;
    async fn keys(&self) -> anyhow::Result<Vec<String>>;
    async fn size(&self) -> anyhow::Result<u64>;

    async fn create_read_stream(&self, hash: &str) -> anyhow::Result<BoxedReader>;
    async fn create_write_stream(&self, hash: &str) -> anyhow::Result<BoxedWriter>;

    /// Commit a shard write started via `create_write_stream`: marks the
    /// item's `shard_present` flag. Backends that write directly to a final
    /// location (no temp-file staging) can implement this as a metadata
    /// flip; see `FsAdapter` for the atomic rename version.
    async fn finalize_write(&self, hash: &str) -> anyhow::Result<()>;

    /// Abort a write in progress (client disconnected, integrity check
    /// failed): discard any partial bytes so a later `get` never observes them.
    async fn abort_write(&self, hash: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    async fn exercise_put_then_get<A: StorageAdapter>(adapter: &A) {
        adapter.open().await.unwrap();
        let mut item = StorageItem::new();
        item.shard_present = false;
        adapter.put("deadbeef", item.clone()).await.unwrap();

        let fetched = adapter.peek("deadbeef").await.unwrap().unwrap();
        assert_eq!(fetched.shard_present, item.shard_present);

        adapter.del("deadbeef").await.unwrap();
        assert!(adapter.peek("deadbeef").await.unwrap().is_none());
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn memory_adapter_put_get_del_roundtrip() {
        let adapter = MemoryAdapter::new();
        exercise_put_then_get(&adapter).await;
    }

    #[tokio::test]
    async fn fs_adapter_put_get_del_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path()).unwrap();
        exercise_put_then_get(&adapter).await;
    }
}
