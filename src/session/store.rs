//! Persisted session records.
//!
//! One record per backend kind. Records are opaque JSON to the store; each
//! adapter owns the shape of its own record.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::provider::types::BackendKind;

/// Errors raised by a session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session store: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Storage for the persisted session record of each backend.
pub trait SessionStore: Send + Sync {
    fn load(&self, kind: BackendKind) -> Result<Option<Value>, StoreError>;
    fn save(&self, kind: BackendKind, record: Value) -> Result<(), StoreError>;
    fn clear(&self, kind: BackendKind) -> Result<(), StoreError>;
}

/// Non-persistent store. Used for ephemeral runs and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: DashMap<BackendKind, Value>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, kind: BackendKind) -> Result<Option<Value>, StoreError> {
        Ok(self.records.get(&kind).map(|r| r.value().clone()))
    }

    fn save(&self, kind: BackendKind, record: Value) -> Result<(), StoreError> {
        self.records.insert(kind, record);
        Ok(())
    }

    fn clear(&self, kind: BackendKind) -> Result<(), StoreError> {
        self.records.remove(&kind);
        Ok(())
    }
}

/// JSON file holding a map of backend kind to record.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<BackendKind, Value>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Read for modification; a corrupt file is replaced rather than blocking writes.
    fn read_for_update(&self) -> Result<HashMap<BackendKind, Value>, StoreError> {
        match self.read_all() {
            Err(StoreError::Corrupt(e)) => {
                tracing::warn!(path = ?self.path, error = %e, "Discarding corrupt session store");
                Ok(HashMap::new())
            }
            other => other,
        }
    }

    fn write_all(&self, records: &HashMap<BackendKind, Value>) -> Result<(), StoreError> {
        if records.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(e) if e.kind() != IoErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        let tmp = self.path.with_extension("tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(writer, records)?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, kind: BackendKind) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.remove(&kind))
    }

    fn save(&self, kind: BackendKind, record: Value) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read_for_update()?;
        records.insert(kind, record);
        self.write_all(&records)?;
        tracing::debug!(path = ?self.path, backend = %kind, "Saved session record");
        Ok(())
    }

    fn clear(&self, kind: BackendKind) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read_for_update()?;
        if records.remove(&kind).is_some() {
            tracing::debug!(path = ?self.path, backend = %kind, "Cleared session record");
        }
        self.write_all(&records)
    }
}
