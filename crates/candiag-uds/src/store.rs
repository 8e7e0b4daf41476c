//! DID-keyed parameter store
//!
//! The invariant that matters: a DID absent from the map means
//! "not supported" and must surface as RequestOutOfRange, never as an
//! empty positive response. An empty payload is a legal stored value
//! and means something different.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Mapping from 16-bit data identifier to opaque payload bytes.
/// Shared between the dispatcher (reads, 0x2E writes) and the process
/// boundary (load at startup, save at shutdown).
#[derive(Debug, Default)]
pub struct ParameterStore {
    entries: RwLock<BTreeMap<u16, Vec<u8>>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<u16, Vec<u8>>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn get(&self, did: u16) -> Option<Vec<u8>> {
        self.entries.read().get(&did).cloned()
    }

    /// Unconditional overwrite.
    pub fn set(&self, did: u16, payload: Vec<u8>) {
        self.entries.write().insert(did, payload);
    }

    pub fn contains(&self, did: u16) -> bool {
        self.entries.read().contains_key(&did)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of the current mapping, ordered by DID.
    pub fn snapshot(&self) -> BTreeMap<u16, Vec<u8>> {
        self.entries.read().clone()
    }

    /// Load a store from its JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let entries: BTreeMap<u16, Vec<u8>> = serde_json::from_str(&text)?;
        info!(
            path = %path.as_ref().display(),
            dids = entries.len(),
            "Parameter store loaded"
        );
        Ok(Self::from_entries(entries))
    }

    /// Persist the store as JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let entries = self.entries.read();
        let text = serde_json::to_string_pretty(&*entries)?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), dids = entries.len(), "Parameter store saved");
        Ok(())
    }
}
