//! Merge ledger: successful mux results persisted per output directory.
//!
//! The ledger is what lets a re-run over an unchanged cache be a no-op: the
//! duplicate classifier matches the current input pair against a recorded
//! result instead of re-muxing. A missing or unreadable ledger is never an
//! error, it just means no duplicate verdicts.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;
use crate::mux::{BackendKind, MuxResult};

/// Ledger file name, kept inside the output directory.
pub const LEDGER_FILE: &str = ".cachemux-ledger.json";

/// One recorded successful merge, keyed by the content identity of its
/// input pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    pub input_key: String,
    /// Output file name relative to the ledger's directory.
    pub output_name: String,
    pub output_size: u64,
    pub output_sha256: String,
    pub backend: BackendKind,
    pub merged_at: DateTime<Utc>,
}

impl MergeRecord {
    pub fn from_result(input_key: String, result: &MuxResult, output_sha256: String) -> Self {
        Self {
            input_key,
            output_name: result
                .output
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            output_size: result.size_bytes,
            output_sha256,
            backend: result.backend,
            merged_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeLedger {
    records: HashMap<String, MergeRecord>,
}

impl MergeLedger {
    /// Load the ledger from an output directory. Absent or corrupt files
    /// yield an empty ledger (a corrupt one is warn-logged).
    pub async fn load(dir: &Path) -> Self {
        let path = dir.join(LEDGER_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(ledger) => ledger,
                Err(e) => {
                    warn!("Ignoring corrupt ledger {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the ledger into `dir`.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(LEDGER_FILE);
        let text = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, text).await?;
        Ok(())
    }

    pub fn find(&self, input_key: &str) -> Option<&MergeRecord> {
        self.records.get(input_key)
    }

    pub fn insert(&mut self, record: MergeRecord) {
        self.records.insert(record.input_key.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(key: &str) -> MergeRecord {
        MergeRecord::from_result(
            key.to_string(),
            &MuxResult {
                backend: BackendKind::Mp4box,
                output: PathBuf::from("/out/title.mp4"),
                size_bytes: 42,
                elapsed_secs: 1.0,
            },
            "abc123".to_string(),
        )
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();

        let mut ledger = MergeLedger::default();
        ledger.insert(record("k1"));
        ledger.save(dir.path()).await.unwrap();

        let loaded = MergeLedger::load(dir.path()).await;
        let found = loaded.find("k1").unwrap();
        assert_eq!(found.output_name, "title.mp4");
        assert_eq!(found.output_size, 42);
        assert_eq!(found.backend, BackendKind::Mp4box);
    }

    #[tokio::test]
    async fn missing_ledger_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MergeLedger::load(dir.path()).await;
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn corrupt_ledger_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(LEDGER_FILE), "not json")
            .await
            .unwrap();
        let ledger = MergeLedger::load(dir.path()).await;
        assert!(ledger.is_empty());
    }

    #[test]
    fn insert_replaces_same_key() {
        let mut ledger = MergeLedger::default();
        ledger.insert(record("k"));
        ledger.insert(record("k"));
        assert_eq!(ledger.len(), 1);
    }
}
