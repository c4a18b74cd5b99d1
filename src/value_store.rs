use std::path::Path;

use log::trace;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::kv_store::{Hash, KVStore, KVStoreError, RocksDbStore};

/// Error type for ValueStore operations
#[derive(Debug, Error)]
pub enum ValueStoreError {
    /// KVStore error
    #[error("KVStore error: {0}")]
    Store(#[from] KVStoreError),
}

/// Store for user values, keyed by the SHA-256 of the value bytes
pub struct ValueStore {
    store: Box<dyn KVStore>,
}

impl ValueStore {
    /// Open (or create) a value store at the given path
    pub fn open(path: &Path) -> Result<Self, ValueStoreError> {
        Ok(Self {
            store: Box::new(RocksDbStore::open(path)?),
        })
    }

    /// Create a value store over an existing KVStore backend
    pub fn new(store: Box<dyn KVStore>) -> Self {
        Self { store }
    }

    /// Store a value and return its content hash
    pub fn put(&self, value: &[u8]) -> Result<Hash, ValueStoreError> {
        let hash: Hash = Sha256::digest(value).into();
        self.store.put(&hash, value)?;
        trace!("stored value {} ({} bytes)", hex::encode(hash), value.len());
        Ok(hash)
    }

    /// Get a value by its content hash
    pub fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, ValueStoreError> {
        Ok(self.store.get(hash)?)
    }

    /// Check whether a value is present
    pub fn contains(&self, hash: &Hash) -> Result<bool, ValueStoreError> {
        Ok(self.store.exists(hash)?)
    }

    /// Flush and release the backend handle; idempotent
    pub fn close(&self) -> Result<(), ValueStoreError> {
        Ok(self.store.close()?)
    }
}
