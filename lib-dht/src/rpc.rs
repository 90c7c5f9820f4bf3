//! JSON-RPC 2.0 envelope and handler trait, as the DHT library exposes them
//! to every method registered via `DhtNode::use_method`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contact::Contact;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not registered: {method}"))
    }

    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, reason.into())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// A handler registered against one method name. `contact` is the caller,
/// as the DHT's transport layer observed it (used by handlers like OFFER
/// and MIRROR that need to know who is asking).
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, params: Value, contact: Contact) -> RpcResult<Value>;
}

/// JSON-RPC 2.0 request envelope, as carried over the tunnel's `0x0c` RPC
/// frames and (implicitly) the DHT's own wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> RpcResult<Value> {
        match (self.result, self.error) {
            (Some(v), _) => Ok(v),
            (None, Some(e)) => Err(e),
            (None, None) => Err(RpcError::internal("empty rpc response")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_round_trips_through_json() {
        let resp = RpcResponse::ok(Value::from(1), serde_json::json!({"token": "abc"}));
        let text = serde_json::to_string(&resp).unwrap();
        let parsed: RpcResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.into_result().unwrap(), serde_json::json!({"token": "abc"}));
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let resp = RpcResponse::err(Value::from(2), RpcError::method_not_found("OFFER"));
        assert!(resp.into_result().is_err());
    }
}
