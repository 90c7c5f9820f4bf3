//! Protocol-level error kinds (spec §7), independent of transport. Every
//! handler returns one of these; the RPC dispatch shell at the edge maps
//! them onto `lib_dht::RpcError` JSON-RPC codes.

use lib_dht::rpc::{RpcError, INTERNAL_ERROR, INVALID_PARAMS};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid contract: {0}")]
    InvalidContract(String),
    #[error("unauthorized token: {0}")]
    UnauthorizedToken(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("failed integrity: {0}")]
    FailedIntegrity(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

const CODE_INVALID_CONTRACT: i64 = -32001;
const CODE_UNAUTHORIZED_TOKEN: i64 = -32002;
const CODE_FAILED_INTEGRITY: i64 = -32003;
const CODE_INVALID_OPERATION: i64 = -32004;

impl From<ProtocolError> for RpcError {
    fn from(err: ProtocolError) -> Self {
        let (code, message) = match &err {
            ProtocolError::InvalidContract(m) => (CODE_INVALID_CONTRACT, m.clone()),
            ProtocolError::UnauthorizedToken(m) => (CODE_UNAUTHORIZED_TOKEN, m.clone()),
            ProtocolError::InvalidMessage(m) => (INVALID_PARAMS, m.clone()),
            ProtocolError::FailedIntegrity(m) => (CODE_FAILED_INTEGRITY, m.clone()),
            ProtocolError::InvalidOperation(m) => (CODE_INVALID_OPERATION, m.clone()),
            ProtocolError::Unexpected(m) => (INTERNAL_ERROR, m.clone()),
        };
        RpcError::new(code, message)
    }
}

impl From<anyhow::Error> for ProtocolError {
    fn from(err: anyhow::Error) -> Self {
        ProtocolError::Unexpected(err.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidMessage(err.to_string())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
