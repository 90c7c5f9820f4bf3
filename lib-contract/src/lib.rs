//! Storage contract: schema, canonical signing digest, and topic opcode.

pub mod contract;
pub mod error;
pub mod topic;

pub use contract::{Contract, Role, CONTRACT_VERSION};
pub use error::ContractError;
