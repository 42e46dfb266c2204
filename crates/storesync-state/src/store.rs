use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use storesync_common::error::{SyncError, SyncResult};

use crate::checkpoint::{Checkpoint, CheckpointPatch};

/// File-backed checkpoint store.
///
/// Writes are read-merge-replace: the current document is re-read, the
/// patch applied on top, and the result written to a sibling temp file
/// that is renamed over the original. A crash mid-write leaves the old
/// document intact.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted checkpoint. A missing or unreadable file
    /// degrades to defaults instead of failing the caller.
    pub fn read(&self) -> Checkpoint {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Checkpoint::default(),
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read checkpoint, using defaults"
                );
                return Checkpoint::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(cp) => cp,
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "checkpoint file is corrupt, using defaults"
                );
                Checkpoint::default()
            }
        }
    }

    /// Merge `patch` onto the persisted state and replace the file
    /// atomically. Also stamps `last_run_date`.
    pub fn write(&self, patch: CheckpointPatch) -> SyncResult<()> {
        let mut state = self.read();
        state.apply(patch);
        state.last_run_date = Some(Utc::now());

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .map_err(|e| SyncError::State(format!("create state dir: {e}")))?;
            }
        }

        let body = serde_json::to_vec_pretty(&state)
            .map_err(|e| SyncError::State(format!("serialize checkpoint: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| SyncError::State(format!("write checkpoint: {e}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| SyncError::State(format!("replace checkpoint: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::SyncStatus;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("checkpoint.json"))
    }

    #[test]
    fn read_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let cp = store.read();
        assert_eq!(cp, Checkpoint::default());
    }

    #[test]
    fn read_corrupt_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), b"{not json").unwrap();

        let cp = store.read();
        assert_eq!(cp.status, SyncStatus::Idle);
        assert_eq!(cp.last_processed_timestamp, 0);
    }

    #[test]
    fn write_merges_with_existing_fields() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store
            .write(CheckpointPatch {
                last_processed_timestamp: Some(1000),
                ..Default::default()
            })
            .unwrap();
        store
            .write(CheckpointPatch {
                total_processed: Some(25),
                cursor: Some(Some("page-2".to_owned())),
                ..Default::default()
            })
            .unwrap();

        let cp = store.read();
        assert_eq!(cp.last_processed_timestamp, 1000);
        assert_eq!(cp.total_processed, 25);
        assert_eq!(cp.cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn write_clears_fields_with_explicit_null() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store
            .write(CheckpointPatch {
                status: Some(SyncStatus::Error),
                error_message: Some(Some("boom".to_owned())),
                cursor: Some(Some("page-9".to_owned())),
                ..Default::default()
            })
            .unwrap();
        store
            .write(CheckpointPatch {
                status: Some(SyncStatus::Idle),
                error_message: Some(None),
                cursor: Some(None),
                ..Default::default()
            })
            .unwrap();

        let cp = store.read();
        assert_eq!(cp.status, SyncStatus::Idle);
        assert_eq!(cp.error_message, None);
        assert_eq!(cp.cursor, None);
    }

    #[test]
    fn write_stamps_last_run_date() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let before = Utc::now();
        store.write(CheckpointPatch::default()).unwrap();
        let cp = store.read();

        let stamped = cp.last_run_date.expect("last_run_date set");
        assert!(stamped >= before);
    }

    #[test]
    fn write_creates_missing_parent_dir() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("states/nested/checkpoint.json"));

        store
            .write(CheckpointPatch {
                total_processed: Some(1),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.read().total_processed, 1);
    }

    #[test]
    fn stale_temp_file_does_not_shadow_the_document() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store
            .write(CheckpointPatch {
                last_processed_timestamp: Some(500),
                ..Default::default()
            })
            .unwrap();
        // Simulate a crash that left a half-written temp file behind.
        fs::write(store.path().with_extension("json.tmp"), b"garbage").unwrap();

        assert_eq!(store.read().last_processed_timestamp, 500);

        // The next write replaces the stale temp file and succeeds.
        store
            .write(CheckpointPatch {
                last_processed_timestamp: Some(600),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.read().last_processed_timestamp, 600);
        assert!(!store.path().with_extension("json.tmp").exists());
    }
}
