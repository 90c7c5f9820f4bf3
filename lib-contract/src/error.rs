use thiserror::Error;

/// Contract-layer error kinds. These map onto the overlay's shared error
/// kinds (`InvalidContract`, signature mismatch) rather than being a closed
/// set of Rust types callers match exhaustively against.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("invalid contract: {0}")]
    InvalidContract(String),
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),
}
