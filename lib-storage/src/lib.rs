//! Content-addressed storage adapter, token authorization table, and the
//! shard transfer HTTP server (spec §4.D, §4.E, §4.F).

pub mod adapter;
pub mod server;
pub mod token;

pub use adapter::{BoxedReader, BoxedWriter, FsAdapter, MemoryAdapter, StorageAdapter, StorageItem};
pub use server::{ShardServer, ShardServerConfig};
pub use token::{spawn_reaper, TokenOperation, TokenTable, TOKEN_EXPIRE};
