//! Parameter and result shapes for the ten RPC methods (spec §4.G, §6.3).

use lib_contract::Contract;
use lib_proofs::AuditResponse;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferParams {
    pub contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResult {
    pub contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsignParams {
    pub data_hash: String,
    /// The renter's full audit leaf list for this hash (hex-encoded), built
    /// at contract creation (§4.C) and installed on the farmer so AUDIT can
    /// answer without the renter resending it each time.
    pub audit_tree: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsignResult {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveParams {
    pub data_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResult {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorParams {
    pub data_hash: String,
    pub source_contact: lib_dht::Contact,
    pub source_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorResult {
    pub mirrored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditChallenge {
    pub data_hash: String,
    pub challenge_hex: String,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditParams {
    pub challenges: Vec<AuditChallenge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub responses: Vec<AuditResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeParams {
    pub contact: lib_dht::Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub reachable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindTunnelParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindTunnelResult {
    pub self_contact: lib_dht::Contact,
    pub volunteer_relays: Vec<lib_dht::Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTunnelParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelAlias {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTunnelResult {
    pub tunnel: String,
    pub alias: TunnelAlias,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewParams {
    pub data_hash: String,
    pub new_contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewResult {
    pub contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerParams {
    pub behavior: String,
    pub requester_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResult {
    pub reply: serde_json::Value,
}
