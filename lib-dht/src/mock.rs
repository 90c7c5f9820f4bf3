//! An in-process `DhtNode` that dispatches `send` directly to registered
//! handlers instead of going over a network. Used by tests in this crate
//! and by the protocol/node crates to exercise handler logic without a real
//! Kademlia routing table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::contact::Contact;
use crate::rpc::{RpcError, RpcHandler, RpcResult};
use crate::{DhtNode, DhtPlugin};

pub struct InMemoryDht {
    local: Contact,
    handlers: RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
    plugins: RwLock<Vec<Arc<dyn DhtPlugin>>>,
}

impl InMemoryDht {
    pub fn new(local: Contact) -> Self {
        Self {
            local,
            handlers: RwLock::new(HashMap::new()),
            plugins: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DhtNode for InMemoryDht {
    fn local_contact(&self) -> Contact {
        self.local.clone()
    }

    fn use_method(&self, method: &str, handler: Arc<dyn RpcHandler>) {
        self.handlers.write().unwrap().insert(method.to_string(), handler);
    }

    async fn send(&self, contact: &Contact, method: &str, params: Value) -> RpcResult<Value> {
        let handler = self
            .handlers
            .read()
            .unwrap()
            .get(method)
            .cloned()
            .ok_or_else(|| RpcError::method_not_found(method))?;
        handler.handle(params, contact.clone()).await
    }

    fn plugin(&self, plugin: Arc<dyn DhtPlugin>) {
        self.plugins.write().unwrap().push(plugin);
    }

    async fn start_upnp(&self) -> anyhow::Result<()> {
        tracing::debug!("InMemoryDht has no real transport; start_upnp is a no-op");
        Ok(())
    }

    async fn start_nat_pmp(&self) -> anyhow::Result<()> {
        tracing::debug!("InMemoryDht has no real transport; start_nat_pmp is a no-op");
        Ok(())
    }
}

/// A registry of [`InMemoryDht`] nodes keyed by contact, letting test
/// harnesses route `send` calls between several in-process peers as if they
/// shared a network.
#[derive(Default)]
pub struct InMemoryNetwork {
    nodes: RwLock<HashMap<String, Arc<InMemoryDht>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: Arc<InMemoryDht>) {
        self.nodes.write().unwrap().insert(node.local_contact().node_id.clone(), node);
    }

    pub fn node(&self, node_id: &str) -> Option<Arc<InMemoryDht>> {
        self.nodes.read().unwrap().get(node_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PingHandler;

    #[async_trait]
    impl RpcHandler for PingHandler {
        async fn handle(&self, _params: Value, _contact: Contact) -> RpcResult<Value> {
            Ok(serde_json::json!({"pong": true}))
        }
    }

    #[tokio::test]
    async fn network_routes_send_to_the_right_registered_node() {
        let network = InMemoryNetwork::new();
        let a = Arc::new(InMemoryDht::new(Contact::new("a", "127.0.0.1", 1)));
        let b = Arc::new(InMemoryDht::new(Contact::new("b", "127.0.0.1", 2)));
        b.use_method("PING", Arc::new(PingHandler));
        network.register(a.clone());
        network.register(b.clone());

        let target = network.node("b").unwrap();
        let reply = target.send(&target.local_contact(), "PING", Value::Null).await.unwrap();
        assert_eq!(reply, serde_json::json!({"pong": true}));
    }
}
