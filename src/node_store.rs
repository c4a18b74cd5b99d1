use std::path::Path;

use log::trace;
use thiserror::Error;

use crate::kv_store::{Hash, KVStore, KVStoreError, RocksDbStore};
use crate::trie::node::{Node, NodeError};

/// Error type for NodeStore operations
#[derive(Debug, Error)]
pub enum NodeStoreError {
    /// KVStore error
    #[error("KVStore error: {0}")]
    Store(#[from] KVStoreError),

    /// Stored bytes failed node decoding
    #[error("node error: {0}")]
    Node(#[from] NodeError),
}

/// Store for trie nodes, keyed by the SHA-256 of their canonical encoding
///
/// Content addressing makes nodes write-once: identical subtrees produced by
/// successive roots land on the same keys and are stored once.
pub struct NodeStore {
    store: Box<dyn KVStore>,
}

impl NodeStore {
    /// Open (or create) a node store at the given path
    pub fn open(path: &Path) -> Result<Self, NodeStoreError> {
        Ok(Self {
            store: Box::new(RocksDbStore::open(path)?),
        })
    }

    /// Create a node store over an existing KVStore backend
    pub fn new(store: Box<dyn KVStore>) -> Self {
        Self { store }
    }

    /// Encode and store a node, returning its hash
    pub fn put(&self, node: &Node) -> Result<Hash, NodeStoreError> {
        let bytes = node.encode();
        let hash = node.hash();
        self.store.put(&hash, &bytes)?;
        trace!("stored {} node {}", node.node_type(), hex::encode(hash));
        Ok(hash)
    }

    /// Load and decode a node by hash
    pub fn get(&self, hash: &Hash) -> Result<Option<Node>, NodeStoreError> {
        match self.store.get(hash)? {
            Some(bytes) => Ok(Some(Node::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether a node is present
    pub fn contains(&self, hash: &Hash) -> Result<bool, NodeStoreError> {
        Ok(self.store.exists(hash)?)
    }

    /// Flush and release the backend handle; idempotent
    pub fn close(&self) -> Result<(), NodeStoreError> {
        Ok(self.store.close()?)
    }
}
