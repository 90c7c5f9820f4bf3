//! The ten RPC methods a node answers on behalf of its counterparties
//! (spec §4.G), wired to storage, the token table, and the offer streams a
//! local publisher is waiting on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use lib_contract::{Contract, Role};
use lib_crypto::Identity;
use lib_dht::rpc::{RpcHandler, RpcResult};
use lib_dht::Contact;
use lib_proofs::{compute_leaf, respond_with_tree};
use lib_storage::{StorageAdapter, TokenOperation, TokenTable};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::constants::MAX_FIND_TUNNEL_RELAYS;
use crate::error::{ProtocolError, ProtocolResult};
use crate::offer::OfferStream;
use crate::tunnel::TunnelPool;
use crate::types::{
    AuditParams, AuditResult, ConsignParams, ConsignResult, FindTunnelParams, FindTunnelResult,
    MirrorParams, MirrorResult, OfferParams, OfferResult, OpenTunnelParams, OpenTunnelResult,
    ProbeParams, ProbeResult, RenewParams, RenewResult, RetrieveParams, RetrieveResult,
    TriggerParams, TriggerResult, TunnelAlias,
};

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn params_of<T: serde::de::DeserializeOwned>(value: Value) -> ProtocolResult<T> {
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
}

/// A behavior registered for TRIGGER, keyed by `(behavior name, requester id)`.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> ProtocolResult<Value>;
}

/// Shared state behind every RPC method this node answers.
pub struct ProtocolHandlers {
    identity: Arc<Identity>,
    local_contact: Contact,
    storage: Arc<dyn StorageAdapter>,
    tokens: Arc<TokenTable>,
    tunnels: Arc<dyn TunnelPool>,
    /// Contracts a local renter has drafted and is waiting on farmer offers
    /// for, keyed by `data_hash`. OFFER looks a contract up here before
    /// accepting a farmer's countersignature.
    pending_contracts: Mutex<HashMap<String, Contract>>,
    /// The offer stream a publisher is draining for each `data_hash`, kept
    /// in step with `pending_contracts`.
    offer_streams: Mutex<HashMap<String, Arc<OfferStream>>>,
    /// Tunnels volunteered to relay for others, reported back by FIND_TUNNEL.
    volunteer_relays: RwLock<Vec<Contact>>,
    triggers: RwLock<HashMap<(String, String), Arc<dyn TriggerHandler>>>,
}

impl ProtocolHandlers {
    pub fn new(
        identity: Arc<Identity>,
        local_contact: Contact,
        storage: Arc<dyn StorageAdapter>,
        tokens: Arc<TokenTable>,
        tunnels: Arc<dyn TunnelPool>,
    ) -> Self {
        Self {
            identity,
            local_contact,
            storage,
            tokens,
            tunnels,
            pending_contracts: Mutex::new(HashMap::new()),
            offer_streams: Mutex::new(HashMap::new()),
            volunteer_relays: RwLock::new(Vec::new()),
            triggers: RwLock::new(HashMap::new()),
        }
    }

    /// Open a `data_hash` to farmer offers: a renter calls this before
    /// publishing a shard descriptor so an incoming OFFER has somewhere to
    /// land. Returns the stream the caller should drain for offers.
    pub async fn open_for_offers(&self, draft: Contract, max_offers: usize) -> ProtocolResult<Arc<OfferStream>> {
        let data_hash = draft
            .data_hash
            .clone()
            .ok_or_else(|| ProtocolError::InvalidContract("draft contract missing data_hash".into()))?;
        let stream = Arc::new(OfferStream::new(max_offers));
        self.pending_contracts.lock().await.insert(data_hash.clone(), draft);
        self.offer_streams.lock().await.insert(data_hash, stream.clone());
        Ok(stream)
    }

    /// Stop accepting offers for `data_hash` (publish window elapsed, or the
    /// renter found enough farmers already).
    pub async fn close_for_offers(&self, data_hash: &str) {
        self.pending_contracts.lock().await.remove(data_hash);
        if let Some(stream) = self.offer_streams.lock().await.remove(data_hash) {
            stream.destroy();
        }
    }

    pub async fn register_trigger(&self, behavior: impl Into<String>, requester_id: impl Into<String>, handler: Arc<dyn TriggerHandler>) {
        self.triggers.write().await.insert((behavior.into(), requester_id.into()), handler);
    }

    pub async fn add_volunteer_relay(&self, contact: Contact) {
        self.volunteer_relays.write().await.push(contact);
    }

    // ---- OFFER: farmer -> renter ------------------------------------

    async fn offer(&self, params: Value, caller: Contact) -> ProtocolResult<Value> {
        let params: OfferParams = params_of(params)?;
        let mut contract = params.contract;
        let data_hash = contract
            .data_hash
            .clone()
            .ok_or_else(|| ProtocolError::InvalidContract("offer missing data_hash".into()))?;

        if !contract.verify(Role::Farmer).unwrap_or(false) {
            return Err(ProtocolError::InvalidContract("farmer signature does not verify".into()));
        }

        let mut pending = self.pending_contracts.lock().await;
        let draft = pending
            .get(&data_hash)
            .ok_or_else(|| ProtocolError::InvalidOperation("contract no longer open to offers".into()))?;

        for field in Contract::diff(draft, &contract) {
            if field == "farmer_id" || field == "farmer_hd_key" || field == "farmer_hd_index" || field == "farmer_signature" {
                continue;
            }
            return Err(ProtocolError::InvalidContract(format!("farmer altered non-farmer field {field}")));
        }

        contract
            .sign_with_identity(Role::Renter, &self.identity)
            .map_err(|e| ProtocolError::Unexpected(e.to_string()))?;

        if !contract.is_complete() {
            return Err(ProtocolError::InvalidContract("contract incomplete after countersignature".into()));
        }
        pending.remove(&data_hash);
        drop(pending);

        let streams = self.offer_streams.lock().await;
        if let Some(stream) = streams.get(&data_hash) {
            let farmer_contact = Contact::new(
                contract.farmer_id.clone().unwrap_or_default(),
                caller.address.clone(),
                caller.port,
            );
            if !stream.add_offer_to_queue(farmer_contact, contract.clone()) {
                return Err(ProtocolError::InvalidOperation("offer rejected by stream (duplicate farmer or closed)".into()));
            }
        }

        Ok(serde_json::to_value(OfferResult { contract })?)
    }

    // ---- CONSIGN: renter -> farmer -----------------------------------

    async fn consign(&self, params: Value, caller: Contact) -> ProtocolResult<Value> {
        let params: ConsignParams = params_of(params)?;
        let item = self
            .storage
            .peek(&params.data_hash)
            .await?
            .ok_or_else(|| ProtocolError::InvalidContract("unknown shard hash".into()))?;

        let renter_id = lib_crypto::node_id_from_hex(&caller.node_id).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
        let contract = item
            .contracts
            .get(&renter_id)
            .ok_or_else(|| ProtocolError::InvalidContract("no contract on file for this renter".into()))?;

        let (begin, end) = (
            contract.store_begin.ok_or_else(|| ProtocolError::InvalidContract("contract missing store_begin".into()))?,
            contract.store_end.ok_or_else(|| ProtocolError::InvalidContract("contract missing store_end".into()))?,
        );
        let now = now_ms();
        if now < begin || now > end {
            return Err(ProtocolError::InvalidOperation("consignment window is not currently open".into()));
        }

        let leaves = params
            .audit_tree
            .iter()
            .map(|h| {
                let bytes = hex::decode(h).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
                bytes.try_into().map_err(|_| ProtocolError::InvalidMessage("audit tree leaf must be 20 bytes".into()))
            })
            .collect::<ProtocolResult<Vec<[u8; 20]>>>()?;

        let mut item = item;
        item.trees.insert(renter_id, leaves);
        self.storage.put(&params.data_hash, item).await?;

        let token = self.tokens.accept(&params.data_hash, &caller.node_id, TokenOperation::Upload).await;
        Ok(serde_json::to_value(ConsignResult { token })?)
    }

    // ---- RETRIEVE: renter -> farmer ----------------------------------

    async fn retrieve(&self, params: Value, caller: Contact) -> ProtocolResult<Value> {
        let params: RetrieveParams = params_of(params)?;
        let item = self
            .storage
            .peek(&params.data_hash)
            .await?
            .ok_or_else(|| ProtocolError::InvalidContract("unknown shard hash".into()))?;
        if !item.shard_present {
            return Err(ProtocolError::InvalidOperation("shard has not been stored yet".into()));
        }
        let token = self.tokens.accept(&params.data_hash, &caller.node_id, TokenOperation::Download).await;
        Ok(serde_json::to_value(RetrieveResult { token })?)
    }

    // ---- MIRROR: farmer -> farmer --------------------------------------

    async fn mirror(&self, params: Value, _caller: Contact) -> ProtocolResult<Value> {
        let params: MirrorParams = params_of(params)?;
        let url = format!(
            "{}/shards/{}?token={}",
            params.source_contact.base_url(),
            params.data_hash,
            params.source_token
        );

        let response = reqwest::get(&url).await.map_err(|e| ProtocolError::Unexpected(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProtocolError::FailedIntegrity(format!("mirror source returned {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(|e| ProtocolError::Unexpected(e.to_string()))?;

        let mut hasher = lib_crypto::StreamingHash160::default();
        hasher.update(&bytes);
        let digest = hasher.finalize();
        if hex::encode(digest) != params.data_hash {
            return Err(ProtocolError::FailedIntegrity("mirrored bytes do not hash to the expected data_hash".into()));
        }

        let mut writer = self.storage.create_write_stream(&params.data_hash).await?;
        use tokio::io::AsyncWriteExt;
        writer.write_all(&bytes).await.map_err(|e| ProtocolError::Unexpected(e.to_string()))?;
        writer.flush().await.map_err(|e| ProtocolError::Unexpected(e.to_string()))?;
        self.storage.finalize_write(&params.data_hash).await?;

        Ok(serde_json::to_value(MirrorResult { mirrored: true })?)
    }

    // ---- AUDIT: renter -> farmer --------------------------------------

    async fn audit(&self, params: Value, caller: Contact) -> ProtocolResult<Value> {
        let params: AuditParams = params_of(params)?;
        let renter_id = lib_crypto::node_id_from_hex(&caller.node_id).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
        let mut responses = Vec::with_capacity(params.challenges.len());

        for challenge in params.challenges {
            let (item, reader) = self
                .storage
                .get(&challenge.data_hash)
                .await?
                .ok_or_else(|| ProtocolError::InvalidContract("unknown shard hash".into()))?;
            let mut reader = reader.ok_or_else(|| ProtocolError::InvalidOperation("shard has no bytes to audit".into()))?;

            let mut shard = Vec::new();
            use tokio::io::AsyncReadExt;
            reader.read_to_end(&mut shard).await.map_err(|e| ProtocolError::Unexpected(e.to_string()))?;

            let challenge_bytes = hex::decode(&challenge.challenge_hex).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
            let fresh_leaf = compute_leaf(&challenge_bytes, &shard);

            let mut leaves = item
                .trees
                .get(&renter_id)
                .cloned()
                .ok_or_else(|| ProtocolError::InvalidContract("no audit tree installed for this renter".into()))?;
            if challenge.index >= leaves.len() {
                return Err(ProtocolError::InvalidMessage("challenge index out of range".into()));
            }
            leaves[challenge.index] = fresh_leaf;

            let response = respond_with_tree(&leaves, challenge.index).map_err(|e| ProtocolError::Unexpected(e.to_string()))?;
            responses.push(response);
        }

        Ok(serde_json::to_value(AuditResult { responses })?)
    }

    // ---- PROBE: anyone -> self ------------------------------------------

    async fn probe(&self, params: Value, _caller: Contact) -> ProtocolResult<Value> {
        let params: ProbeParams = params_of(params)?;
        let reachable = params.contact.node_id == self.local_contact.node_id;
        Ok(serde_json::to_value(ProbeResult { reachable })?)
    }

    // ---- FIND_TUNNEL: anyone -> self -------------------------------------

    async fn find_tunnel(&self, params: Value, _caller: Contact) -> ProtocolResult<Value> {
        let _params: FindTunnelParams = params_of(params)?;
        let relays = self.volunteer_relays.read().await;
        let volunteer_relays = relays.iter().take(MAX_FIND_TUNNEL_RELAYS).cloned().collect();
        Ok(serde_json::to_value(FindTunnelResult {
            self_contact: self.local_contact.clone(),
            volunteer_relays,
        })?)
    }

    // ---- OPEN_TUNNEL: anyone -> self -------------------------------------

    async fn open_tunnel(&self, params: Value, _caller: Contact) -> ProtocolResult<Value> {
        let _params: OpenTunnelParams = params_of(params)?;
        let lease = self
            .tunnels
            .allocate_gateway()
            .await
            .ok_or_else(|| ProtocolError::InvalidOperation("no free tunnel gateway slots".into()))?;
        Ok(serde_json::to_value(OpenTunnelResult {
            tunnel: lease.ws_url,
            alias: TunnelAlias {
                address: lease.address,
                port: lease.port,
            },
        })?)
    }

    // ---- RENEW: renter -> farmer ----------------------------------------

    async fn renew(&self, params: Value, caller: Contact) -> ProtocolResult<Value> {
        let params: RenewParams = params_of(params)?;
        let mut item = self
            .storage
            .peek(&params.data_hash)
            .await?
            .ok_or_else(|| ProtocolError::InvalidContract("unknown shard hash".into()))?;

        let renter_id = lib_crypto::node_id_from_hex(&caller.node_id).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
        let existing = item
            .contracts
            .get(&renter_id)
            .ok_or_else(|| ProtocolError::InvalidContract("no existing contract to renew".into()))?;

        let mut new_contract = params.new_contract;
        if new_contract.data_hash.as_deref() != Some(params.data_hash.as_str()) {
            return Err(ProtocolError::InvalidContract("renewal data_hash does not match target shard".into()));
        }
        if new_contract.farmer_id != existing.farmer_id || new_contract.renter_id != existing.renter_id {
            return Err(ProtocolError::InvalidContract("renewal changes contract counterparties".into()));
        }
        if !new_contract.verify(Role::Renter).unwrap_or(false) {
            return Err(ProtocolError::InvalidContract("renter signature on renewal does not verify".into()));
        }

        new_contract
            .sign_with_identity(Role::Farmer, &self.identity)
            .map_err(|e| ProtocolError::Unexpected(e.to_string()))?;
        if !new_contract.is_complete() {
            return Err(ProtocolError::InvalidContract("renewed contract incomplete after countersignature".into()));
        }

        item.contracts.insert(renter_id, new_contract.clone());
        self.storage.put(&params.data_hash, item).await?;

        Ok(serde_json::to_value(RenewResult { contract: new_contract })?)
    }

    // ---- TRIGGER: application-defined behaviors --------------------------

    async fn trigger(&self, params: Value, _caller: Contact) -> ProtocolResult<Value> {
        let params: TriggerParams = params_of(params)?;
        let key = (params.behavior.clone(), params.requester_id.clone());
        let handler = self
            .triggers
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| ProtocolError::InvalidOperation(format!("no trigger registered for {}/{}", params.behavior, params.requester_id)))?;
        let reply = handler.handle(params.payload).await?;
        Ok(serde_json::to_value(TriggerResult { reply })?)
    }

    /// Register all ten methods on a DHT node's dispatch table.
    pub fn register_all(self: &Arc<Self>, dht: &dyn lib_dht::DhtNode) {
        dht.use_method("OFFER", Arc::new(MethodHandler { state: self.clone(), method: Method::Offer }));
        dht.use_method("CONSIGN", Arc::new(MethodHandler { state: self.clone(), method: Method::Consign }));
        dht.use_method("RETRIEVE", Arc::new(MethodHandler { state: self.clone(), method: Method::Retrieve }));
        dht.use_method("MIRROR", Arc::new(MethodHandler { state: self.clone(), method: Method::Mirror }));
        dht.use_method("AUDIT", Arc::new(MethodHandler { state: self.clone(), method: Method::Audit }));
        dht.use_method("PROBE", Arc::new(MethodHandler { state: self.clone(), method: Method::Probe }));
        dht.use_method("FIND_TUNNEL", Arc::new(MethodHandler { state: self.clone(), method: Method::FindTunnel }));
        dht.use_method("OPEN_TUNNEL", Arc::new(MethodHandler { state: self.clone(), method: Method::OpenTunnel }));
        dht.use_method("RENEW", Arc::new(MethodHandler { state: self.clone(), method: Method::Renew }));
        dht.use_method("TRIGGER", Arc::new(MethodHandler { state: self.clone(), method: Method::Trigger }));
    }
}

#[derive(Clone, Copy)]
enum Method {
    Offer,
    Consign,
    Retrieve,
    Mirror,
    Audit,
    Probe,
    FindTunnel,
    OpenTunnel,
    Renew,
    Trigger,
}

/// One thin adapter per registered method name, dispatching into
/// `ProtocolHandlers` and translating `ProtocolError` into `RpcError` at the
/// transport boundary.
struct MethodHandler {
    state: Arc<ProtocolHandlers>,
    method: Method,
}

#[async_trait]
impl RpcHandler for MethodHandler {
    async fn handle(&self, params: Value, contact: Contact) -> RpcResult<Value> {
        let result = match self.method {
            Method::Offer => self.state.offer(params, contact).await,
            Method::Consign => self.state.consign(params, contact).await,
            Method::Retrieve => self.state.retrieve(params, contact).await,
            Method::Mirror => self.state.mirror(params, contact).await,
            Method::Audit => self.state.audit(params, contact).await,
            Method::Probe => self.state.probe(params, contact).await,
            Method::FindTunnel => self.state.find_tunnel(params, contact).await,
            Method::OpenTunnel => self.state.open_tunnel(params, contact).await,
            Method::Renew => self.state.renew(params, contact).await,
            Method::Trigger => self.state.trigger(params, contact).await,
        };
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_storage::MemoryAdapter;
    use rand::rngs::OsRng;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    struct NoGateway;

    #[async_trait]
    impl TunnelPool for NoGateway {
        async fn allocate_gateway(&self) -> Option<crate::tunnel::GatewayLease> {
            None
        }
        async fn has_free_gateway(&self) -> bool {
            false
        }
    }

    fn keypair() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(&mut OsRng);
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    fn handlers_with_identity() -> (Arc<ProtocolHandlers>, Identity) {
        let identity = Identity::new(None).unwrap();
        let contact = Contact::new(identity.node_id_hex(), "127.0.0.1", 9000);
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
        let tokens = Arc::new(TokenTable::new());
        let tunnels: Arc<dyn TunnelPool> = Arc::new(NoGateway);
        let handlers = Arc::new(ProtocolHandlers::new(Arc::new(identity.clone()), contact, storage, tokens, tunnels));
        (handlers, identity)
    }

    #[tokio::test]
    async fn probe_reports_reachable_for_own_contact() {
        let (handlers, _identity) = handlers_with_identity();
        let params = serde_json::to_value(ProbeParams { contact: handlers.local_contact.clone() }).unwrap();
        let result: ProbeResult = serde_json::from_value(handlers.probe(params, handlers.local_contact.clone()).await.unwrap()).unwrap();
        assert!(result.reachable);
    }

    #[tokio::test]
    async fn offer_rejects_when_no_pending_contract_is_open() {
        let (handlers, _renter_identity) = handlers_with_identity();
        let (farmer_sk, farmer_pk) = keypair();
        let farmer_id = hex::encode(lib_crypto::node_id_from_pubkey(&farmer_pk));
        let fields = serde_json::json!({
            "renter_id": handlers.identity.node_id_hex(),
            "farmer_id": farmer_id,
            "payment_source": "addr-r",
            "payment_destination": "addr-f",
            "payment_download_price": 1,
            "payment_storage_price": 1,
            "payment_amount": 1,
            "data_hash": "a".repeat(40),
            "data_size": 10,
            "store_begin": 0,
            "store_end": 1000,
            "audit_count": 0,
        })
        .as_object()
        .unwrap()
        .clone();
        let mut contract = Contract::create(fields).unwrap();
        contract.sign(Role::Farmer, &farmer_sk).unwrap();

        let caller = Contact::new(farmer_id, "127.0.0.1", 9001);
        let params = serde_json::to_value(OfferParams { contract }).unwrap();
        let err = handlers.offer(params, caller).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn offer_succeeds_against_an_open_pending_contract() {
        let (handlers, _renter_identity) = handlers_with_identity();
        let (farmer_sk, farmer_pk) = keypair();
        let farmer_id = hex::encode(lib_crypto::node_id_from_pubkey(&farmer_pk));
        let data_hash = "b".repeat(40);

        let draft_fields = serde_json::json!({
            "renter_id": handlers.identity.node_id_hex(),
            "farmer_id": farmer_id,
            "payment_source": "addr-r",
            "payment_destination": "addr-f",
            "payment_download_price": 1,
            "payment_storage_price": 1,
            "payment_amount": 1,
            "data_hash": data_hash,
            "data_size": 10,
            "store_begin": 0,
            "store_end": 1000,
            "audit_count": 0,
        })
        .as_object()
        .unwrap()
        .clone();
        let draft = Contract::create(draft_fields).unwrap();
        handlers.open_for_offers(draft.clone(), 3).await.unwrap();

        let mut contract = draft;
        contract.sign(Role::Farmer, &farmer_sk).unwrap();
        let caller = Contact::new(farmer_id, "127.0.0.1", 9001);
        let params = serde_json::to_value(OfferParams { contract }).unwrap();
        let result: OfferResult = serde_json::from_value(handlers.offer(params, caller).await.unwrap()).unwrap();
        assert!(result.contract.is_complete());
    }
}
