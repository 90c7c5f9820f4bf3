//! Interface traits for the Kademlia DHT, RPC dispatch, and NAT-traversal
//! library this overlay assumes as an external collaborator.
//!
//! The routing table itself — node discovery, bucket maintenance, iterative
//! lookups — is out of scope for this workspace; a real deployment plugs in
//! an actual Kademlia implementation behind [`DhtNode`]. What lives here is
//! the shape of that collaborator as the rest of the workspace depends on
//! it: register an RPC method with [`DhtNode::use_method`], call a peer's
//! method with [`DhtNode::send`], extend behavior with [`DhtNode::plugin`],
//! and traverse NATs via [`DhtNode::start_upnp`]/[`start_nat_pmp`].

pub mod contact;
pub mod mock;
pub mod rpc;

pub use contact::Contact;
pub use rpc::{RpcError, RpcHandler, RpcResult};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use mock::InMemoryDht;

/// A pluggable extension registered on a [`DhtNode`] (pub/sub topic routing,
/// metrics, custom wire transports). The trait is intentionally opaque here:
/// concrete plugins live in the crates that need them and only need a place
/// to hang off the node's lifecycle.
pub trait DhtPlugin: Send + Sync {
    fn name(&self) -> &str;
}

/// The DHT node collaborator. An implementation owns the routing table, the
/// transport, and the JSON-RPC dispatch loop; everything above this trait
/// talks to peers only through `send` and only accepts calls through
/// handlers registered via `use_method`.
#[async_trait]
pub trait DhtNode: Send + Sync {
    /// This node's own contact, as it would appear to a peer it calls.
    fn local_contact(&self) -> Contact;

    /// Register the handler invoked when a peer calls `method` on us.
    /// Re-registering a method replaces its handler.
    fn use_method(&self, method: &str, handler: Arc<dyn RpcHandler>);

    /// Call `method` on `contact` with `params`, waiting up to the node's
    /// configured RPC timeout for a reply.
    async fn send(&self, contact: &Contact, method: &str, params: Value) -> RpcResult<Value>;

    /// Attach a plugin. Plugins are retained for the node's lifetime; there
    /// is no detach, matching the library this trait models.
    fn plugin(&self, plugin: Arc<dyn DhtPlugin>);

    /// Best-effort UPnP port mapping for this node's listening port.
    async fn start_upnp(&self) -> anyhow::Result<()>;

    /// Best-effort NAT-PMP port mapping, tried when UPnP is unavailable.
    async fn start_nat_pmp(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(&self, params: Value, _contact: Contact) -> RpcResult<Value> {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn registered_handler_is_reachable_via_send() {
        let dht = InMemoryDht::new(Contact::new("node-a", "127.0.0.1", 9000));
        dht.use_method("ECHO", Arc::new(EchoHandler));

        let peer = Contact::new("node-a", "127.0.0.1", 9000);
        let reply = dht.send(&peer, "ECHO", serde_json::json!({"hello": "world"})).await.unwrap();
        assert_eq!(reply, serde_json::json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn unregistered_method_errors() {
        let dht = InMemoryDht::new(Contact::new("node-a", "127.0.0.1", 9000));
        let peer = Contact::new("node-a", "127.0.0.1", 9000);
        let err = dht.send(&peer, "NOPE", Value::Null).await.unwrap_err();
        assert_eq!(err.code, rpc::METHOD_NOT_FOUND);
    }
}
