use std::path::Path;
use std::sync::RwLock;

use log::{debug, error};
use rocksdb::{Options, DB};
use thiserror::Error;

/// Type alias for a 32-byte content hash
pub type Hash = [u8; 32];

/// Error type for KVStore operations
#[derive(Debug, Error)]
pub enum KVStoreError {
    /// Backend (RocksDB) error
    #[error("backend error: {0}")]
    Backend(String),

    /// A key was re-written with different bytes
    #[error("store corruption: conflicting bytes for existing key {0}")]
    Corruption(String),

    /// Operation attempted after the store was closed
    #[error("store is closed")]
    Closed,
}

/// Key-value store trait for content-addressed persistence
///
/// Keys are content hashes, which makes entries immutable: a `put` under an
/// existing key must carry byte-identical data.
pub trait KVStore: Send + Sync {
    /// Put a key-value pair
    ///
    /// Idempotent. If the key is already present the new bytes must equal
    /// the existing bytes; a conflicting re-put fails with `Corruption`.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError>;

    /// Flush any pending writes to disk
    fn flush(&self) -> Result<(), KVStoreError>;

    /// Flush and release the backend handle
    ///
    /// Idempotent. All subsequent operations fail with `Closed`.
    fn close(&self) -> Result<(), KVStoreError>;
}

/// RocksDB implementation of KVStore
///
/// The handle lives behind a lock so `close` can release it through a shared
/// reference; closed stores keep answering with `Closed` instead of panicking.
pub struct RocksDbStore {
    db: RwLock<Option<DB>>,
}

impl RocksDbStore {
    /// Open (or create) a RocksDB store at the given path
    pub fn open(path: &Path) -> Result<Self, KVStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        Self::with_options(path, opts)
    }

    /// Open a RocksDB store with custom options
    pub fn with_options(path: &Path, options: Options) -> Result<Self, KVStoreError> {
        let db = DB::open(&options, path).map_err(|e| {
            error!("failed to open RocksDB at {}: {}", path.display(), e);
            KVStoreError::Backend(format!("failed to open RocksDB at {}: {}", path.display(), e))
        })?;
        debug!("opened RocksDB store at {}", path.display());
        Ok(Self {
            db: RwLock::new(Some(db)),
        })
    }
}

impl KVStore for RocksDbStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        let guard = self.db.read().unwrap();
        let db = guard.as_ref().ok_or(KVStoreError::Closed)?;

        // Content-addressed keys are write-once: a re-put must be a no-op.
        if let Some(existing) = db
            .get(key)
            .map_err(|e| KVStoreError::Backend(e.to_string()))?
        {
            if existing != value {
                error!("conflicting re-put for key {}", hex::encode(key));
                return Err(KVStoreError::Corruption(hex::encode(key)));
            }
            return Ok(());
        }

        db.put(key, value)
            .map_err(|e| KVStoreError::Backend(e.to_string()))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        let guard = self.db.read().unwrap();
        let db = guard.as_ref().ok_or(KVStoreError::Closed)?;
        db.get(key)
            .map_err(|e| KVStoreError::Backend(e.to_string()))
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        match self.get(key)? {
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        let guard = self.db.read().unwrap();
        let db = guard.as_ref().ok_or(KVStoreError::Closed)?;
        db.flush()
            .map_err(|e| KVStoreError::Backend(e.to_string()))
    }

    fn close(&self) -> Result<(), KVStoreError> {
        let mut guard = self.db.write().unwrap();
        if let Some(db) = guard.take() {
            db.flush()
                .map_err(|e| KVStoreError::Backend(e.to_string()))?;
            debug!("closed RocksDB store");
        }
        Ok(())
    }
}
