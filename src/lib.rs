//! merklekv - a persistent, content-addressed Merkle Patricia Trie
//!
//! Maps arbitrary byte keys to arbitrary byte values. Every mutation yields a
//! new root hash that cryptographically commits to the entire key/value set,
//! and any previously observed root hash reopens that exact state from
//! persistent storage.
//!
//! The crate is built on RocksDB, with a modular design:
//!
//! - `kv_store`: low-level key-value store interface and RocksDB implementation
//! - `node_store`: content-addressed persistence for encoded trie nodes
//! - `value_store`: content-addressed persistence for raw user values
//! - `trie`: the Merkle Patricia Trie itself (path codec, node model, engine)

pub mod kv_store;
pub mod node_store;
pub mod trie;
pub mod value_store;

// Re-export common types
pub use kv_store::{Hash, KVStore, KVStoreError, RocksDbStore};
pub use node_store::{NodeStore, NodeStoreError};
pub use trie::encode::{
    bytes_to_nibbles, common_prefix_len, hex_to_nibbles, nibbles_to_bytes, nibbles_to_hex,
    PathError,
};
pub use trie::node::{Node, NodeError, EMPTY_TREE_ROOT_HASH};
pub use trie::{MerklePatriciaTrie, TrieError, TrieResult};
pub use value_store::{ValueStore, ValueStoreError};

/// Initialize logging
pub fn init_logger() {
    env_logger::init();
}
