//! Outbound RPC helpers (spec §4.I): the calls *this* node makes against a
//! remote peer, as opposed to the handlers in [`crate::handlers`] that
//! answer calls made *to* this node. Thin wrappers over
//! [`lib_dht::DhtNode::send`] that know the method name and the
//! params/result shape for each call.

use std::sync::Arc;

use lib_contract::Contract;
use lib_dht::{Contact, DhtNode};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{
    AuditChallenge, AuditParams, AuditResult, ConsignParams, ConsignResult, FindTunnelParams,
    FindTunnelResult, MirrorParams, MirrorResult, OfferParams, OfferResult, OpenTunnelParams,
    OpenTunnelResult, RenewParams, RenewResult, RetrieveParams, RetrieveResult,
};

fn into_protocol_result<T: serde::de::DeserializeOwned>(result: lib_dht::rpc::RpcResult<Value>) -> ProtocolResult<T> {
    let value = result.map_err(|e| ProtocolError::Unexpected(e.message))?;
    serde_json::from_value(value).map_err(ProtocolError::from)
}

/// Outbound RPC surface a publisher or farmer uses against the DHT. Holds no
/// state of its own beyond the `DhtNode` it calls through.
pub struct NodeClient {
    dht: Arc<dyn DhtNode>,
}

impl NodeClient {
    pub fn new(dht: Arc<dyn DhtNode>) -> Self {
        Self { dht }
    }

    /// Renter side of OFFER: send our drafted contract to a volunteering
    /// farmer and get back the countersigned version.
    pub async fn send_offer(&self, farmer: &Contact, contract: Contract) -> ProtocolResult<Contract> {
        let params = serde_json::to_value(OfferParams { contract })?;
        let result = self.dht.send(farmer, "OFFER", params).await;
        let result: OfferResult = into_protocol_result(result)?;
        Ok(result.contract)
    }

    /// Renter side of CONSIGN: authorize the farmer to accept an upload for
    /// `data_hash`, handing it the audit tree it should store for later
    /// AUDIT challenges.
    pub async fn authorize_consignment(&self, farmer: &Contact, data_hash: &str, audit_tree: Vec<String>) -> ProtocolResult<String> {
        let params = serde_json::to_value(ConsignParams {
            data_hash: data_hash.to_string(),
            audit_tree,
        })?;
        let result: ConsignResult = into_protocol_result(self.dht.send(farmer, "CONSIGN", params).await)?;
        Ok(result.token)
    }

    /// Renter side of RETRIEVE: ask the farmer for a download token.
    pub async fn authorize_retrieval(&self, farmer: &Contact, data_hash: &str) -> ProtocolResult<String> {
        let params = serde_json::to_value(RetrieveParams {
            data_hash: data_hash.to_string(),
        })?;
        let result: RetrieveResult = into_protocol_result(self.dht.send(farmer, "RETRIEVE", params).await)?;
        Ok(result.token)
    }

    /// Ask a farmer to mirror a shard from another farmer it can reach.
    pub async fn create_shard_mirror(&self, target_farmer: &Contact, data_hash: &str, source_contact: Contact, source_token: &str) -> ProtocolResult<bool> {
        let params = serde_json::to_value(MirrorParams {
            data_hash: data_hash.to_string(),
            source_contact,
            source_token: source_token.to_string(),
        })?;
        let result: MirrorResult = into_protocol_result(self.dht.send(target_farmer, "MIRROR", params).await)?;
        Ok(result.mirrored)
    }

    /// Challenge a farmer to prove it still holds the shards named in
    /// `challenges`, returning the proofs to verify against the renter's
    /// locally-held roots.
    pub async fn audit_remote_shards(&self, farmer: &Contact, challenges: Vec<AuditChallenge>) -> ProtocolResult<AuditResult> {
        let params = serde_json::to_value(AuditParams { challenges })?;
        into_protocol_result(self.dht.send(farmer, "AUDIT", params).await)
    }

    /// Ask a peer to find a tunnel relay for us (we believe ourselves
    /// unreachable, possibly behind a NAT that UPnP/NAT-PMP couldn't open).
    pub async fn find_tunnel(&self, peer: &Contact) -> ProtocolResult<FindTunnelResult> {
        let params = serde_json::to_value(FindTunnelParams {})?;
        into_protocol_result(self.dht.send(peer, "FIND_TUNNEL", params).await)
    }

    /// Ask a relay to open a tunnel gateway for us and hand back its
    /// websocket URL and public alias.
    pub async fn open_tunnel(&self, relay: &Contact) -> ProtocolResult<OpenTunnelResult> {
        let params = serde_json::to_value(OpenTunnelParams {})?;
        into_protocol_result(self.dht.send(relay, "OPEN_TUNNEL", params).await)
    }

    /// Ask a farmer to accept a replacement contract for an expiring one.
    pub async fn renew_contract(&self, farmer: &Contact, data_hash: &str, new_contract: Contract) -> ProtocolResult<Contract> {
        let params = serde_json::to_value(RenewParams {
            data_hash: data_hash.to_string(),
            new_contract,
        })?;
        let result: RenewResult = into_protocol_result(self.dht.send(farmer, "RENEW", params).await)?;
        Ok(result.contract)
    }

    /// Publish this node's contact and the shard's topic to `bootstrap` so
    /// peers searching that topic can discover us as a holder (spec §4.I:
    /// the DHT library's own `store`/`announce` primitive, scoped to this
    /// crate's interface as a `send` against a node that answers PUBLISH).
    pub async fn publish_shard_descriptor(&self, bootstrap: &Contact, topic: &str, contact: &Contact) -> ProtocolResult<()> {
        let params = serde_json::json!({ "topic": topic, "contact": contact });
        self.dht
            .send(bootstrap, "PUBLISH", params)
            .await
            .map_err(|e| ProtocolError::Unexpected(e.message))?;
        Ok(())
    }

    /// Subscribe to a topic, registering `on_descriptor` against the DHT's
    /// pub/sub primitive so future publishes on that topic are delivered to
    /// our own handler table instead of returned synchronously here.
    pub fn subscribe_shard_descriptor(&self, topic: &str, handler: std::sync::Arc<dyn lib_dht::rpc::RpcHandler>) {
        self.dht.use_method(&format!("TOPIC:{topic}"), handler);
    }
}
