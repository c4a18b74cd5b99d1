//! Merkle Patricia Trie implementation
//!
//! This module provides the trie itself: the hex-path codec, the three node
//! variants with their canonical binary encoding, and the engine that walks,
//! splits, and rehashes nodes on the mutation path.
//!
//! Nodes reference each other by the SHA-256 of their encoding, so the
//! structure is a DAG shared across successive roots; see the `node_store`
//! and `value_store` modules for the persistence side.

pub mod encode;
pub mod mpt;
pub mod node;

// Re-export main components
pub use mpt::{MerklePatriciaTrie, TrieError, TrieResult};
pub use node::{Node, NodeError, EMPTY_TREE_ROOT_HASH};
