//! Ledger Backends
//!
//! Durable storage behind the rating store. The store keeps the live map
//! in memory and hands the full snapshot to the backend after every
//! write, so a failed write heals on the next successful one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Serialize, Deserialize};

use crate::core::ids::ParticipantId;
use crate::rating::store::RatingRecord;

/// Ledger file format version.
pub const LEDGER_VERSION: u32 = 1;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum RatingError {
    /// Filesystem failure.
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding failure.
    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ledger written by an unknown version.
    #[error("Unsupported ledger version {0}")]
    UnsupportedVersion(u32),

    /// The blocking writer task panicked or was cancelled.
    #[error("Ledger writer failed: {0}")]
    Writer(String),
}

/// Durable storage for rating records.
pub trait LedgerBackend: Send + Sync {
    /// Load every stored record.
    fn load(&self) -> Result<Vec<RatingRecord>, RatingError>;

    /// Replace the stored snapshot.
    fn save(&self, records: &BTreeMap<ParticipantId, RatingRecord>) -> Result<(), RatingError>;
}

/// In-process ledger; keeps the last saved snapshot.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    snapshot: Mutex<Vec<RatingRecord>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger pre-seeded with records.
    pub fn with_records(records: Vec<RatingRecord>) -> Self {
        Self { snapshot: Mutex::new(records) }
    }

    /// Copy of the last saved snapshot.
    pub fn snapshot(&self) -> Vec<RatingRecord> {
        self.snapshot.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl LedgerBackend for MemoryLedger {
    fn load(&self) -> Result<Vec<RatingRecord>, RatingError> {
        Ok(self.snapshot())
    }

    fn save(&self, records: &BTreeMap<ParticipantId, RatingRecord>) -> Result<(), RatingError> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        *snapshot = records.values().cloned().collect();
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    records: Vec<RatingRecord>,
}

/// Ledger stored as one JSON document.
///
/// Writes go to a sibling temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileLedger {
    path: PathBuf,
}

impl JsonFileLedger {
    /// Ledger at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LedgerBackend for JsonFileLedger {
    fn load(&self) -> Result<Vec<RatingRecord>, RatingError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path)?;
        let file: LedgerFile = serde_json::from_slice(&bytes)?;
        if file.version != LEDGER_VERSION {
            return Err(RatingError::UnsupportedVersion(file.version));
        }
        Ok(file.records)
    }

    fn save(&self, records: &BTreeMap<ParticipantId, RatingRecord>) -> Result<(), RatingError> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            records: records.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
