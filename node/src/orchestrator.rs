//! Wires the four in-scope subsystems (contract/audit state behind protocol
//! handlers, the storage adapter, the shard transfer server, and the tunnel
//! gateway pool) into one running peer. The DHT routing table itself is an
//! external collaborator per spec §1 ("assumed provided by a library"); this
//! node plugs in [`lib_dht::mock::InMemoryDht`] so the peer is runnable
//! stand-alone, with a real Kademlia implementation left as a drop-in
//! replacement behind the same [`lib_dht::DhtNode`] trait.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lib_contract::Contract;
use lib_crypto::Identity;
use lib_dht::{Contact, DhtNode, InMemoryDht};
use lib_identity::IdentityStore;
use lib_network::{TunnelServer, TunnelServerConfig};
use lib_protocols::{NodeClient, ProtocolHandlers, TunnelPool};
use lib_storage::{spawn_reaper, FsAdapter, ShardServer, ShardServerConfig, StorageAdapter, TokenTable};

use crate::config::NodeConfig;

const TOKEN_REAP_INTERVAL: Duration = Duration::from_secs(60);

pub fn load_identity(config: &NodeConfig) -> Result<Identity> {
    let store = IdentityStore::new(config.data_dir.join("identity.json"));
    store.load_or_generate()
}

/// One running overlay peer: identity, storage, protocol handlers, the
/// shard server and a tunnel gateway pool, sharing state the way the
/// handlers in `lib-protocols` expect (everything behind `Arc`).
pub struct PeerNode {
    config: NodeConfig,
    identity: Arc<Identity>,
    contact: Contact,
    storage: Arc<dyn StorageAdapter>,
    tokens: Arc<TokenTable>,
    dht: Arc<InMemoryDht>,
    handlers: Arc<ProtocolHandlers>,
    client: NodeClient,
    tunnels: Arc<TunnelServer>,
}

impl PeerNode {
    pub async fn bootstrap(config: NodeConfig) -> Result<Self> {
        let identity = Arc::new(load_identity(&config)?);

        let contact = Contact::new(
            identity.node_id_hex(),
            config.advertise_address.clone(),
            config.advertise_port,
        );

        let storage: Arc<dyn StorageAdapter> = Arc::new(FsAdapter::new(config.data_dir.join("storage"))?);
        storage.open().await?;

        let tokens = Arc::new(TokenTable::new());
        spawn_reaper(tokens.clone(), TOKEN_REAP_INTERVAL);

        let tunnels = Arc::new(TunnelServer::new(TunnelServerConfig {
            bind_ip: "0.0.0.0".to_string(),
            port_range: config.tunnel.port_range_start..=config.tunnel.port_range_end,
            max_tunnels: config.tunnel.max_tunnels,
            public_host: config.tunnel.public_host.clone(),
        }));

        let handlers = Arc::new(ProtocolHandlers::new(
            identity.clone(),
            contact.clone(),
            storage.clone(),
            tokens.clone(),
            tunnels.clone() as Arc<dyn TunnelPool>,
        ));

        let dht = Arc::new(InMemoryDht::new(contact.clone()));
        handlers.register_all(dht.as_ref());

        let client = NodeClient::new(dht.clone() as Arc<dyn DhtNode>);

        Ok(Self {
            config,
            identity,
            contact,
            storage,
            tokens,
            dht,
            handlers,
            client,
            tunnels,
        })
    }

    pub fn node_id_hex(&self) -> String {
        self.identity.node_id_hex()
    }

    pub fn advertise_address(&self) -> String {
        format!("{}:{}", self.config.advertise_address, self.config.advertise_port)
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn dht(&self) -> Arc<InMemoryDht> {
        self.dht.clone()
    }

    pub fn handlers(&self) -> Arc<ProtocolHandlers> {
        self.handlers.clone()
    }

    pub fn client(&self) -> &NodeClient {
        &self.client
    }

    pub fn tunnels(&self) -> Arc<TunnelServer> {
        self.tunnels.clone()
    }

    /// Draft a new renter-side contract proposal and open it to farmer
    /// offers, returning the stream the caller should drain (spec §4.H).
    /// A thin pass-through to [`ProtocolHandlers::open_for_offers`] kept
    /// here so orchestration callers don't need to reach into the handler
    /// internals directly.
    pub async fn propose_contract(
        &self,
        draft: Contract,
        max_offers: usize,
    ) -> lib_protocols::ProtocolResult<Arc<lib_protocols::OfferStream>> {
        self.handlers.open_for_offers(draft, max_offers).await
    }

    /// Run the shard server and tunnel gateway pool until cancelled. The
    /// DHT itself has no background I/O to drive (`InMemoryDht` dispatches
    /// in-process); a real Kademlia implementation would get its own task
    /// here alongside the shard server.
    pub async fn run(&self) -> Result<()> {
        let shard_server = ShardServer::new(self.storage.clone(), self.tokens.clone());
        let config = ShardServerConfig {
            bind_addr: self.config.shard_bind,
        };

        tokio::select! {
            result = shard_server.run(config) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn test_config(data_dir: &std::path::Path, port: u16) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.data_dir = data_dir.to_path_buf();
        config.advertise_port = port;
        config.shard_bind = format!("127.0.0.1:{port}").parse().unwrap();
        config
    }

    #[tokio::test]
    async fn bootstrap_persists_identity_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 7100);

        let first = PeerNode::bootstrap(config.clone()).await.unwrap();
        let second = PeerNode::bootstrap(config).await.unwrap();

        assert_eq!(first.node_id_hex(), second.node_id_hex());
    }

    #[tokio::test]
    async fn registered_handlers_answer_through_the_dht() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 7101);
        let node = PeerNode::bootstrap(config).await.unwrap();

        let contact = node.contact().clone();
        let reply = node
            .dht()
            .send(&contact, "PROBE", serde_json::json!({"contact": contact}))
            .await
            .unwrap();
        assert_eq!(reply["reachable"], serde_json::json!(true));
    }
}
