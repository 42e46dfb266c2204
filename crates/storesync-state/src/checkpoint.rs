use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the long-running jobs as persisted in the checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

/// The single durable document shared by every job. Unknown states
/// (missing file, unreadable JSON) degrade to `Default`, so every field
/// must carry a serde default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub status: SyncStatus,
    /// Opaque resume cursor for the backfill scan.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Profile cycle watermark, epoch milliseconds. Zero means never ran.
    #[serde(default)]
    pub last_processed_timestamp: i64,
    /// Order cycle watermark, epoch milliseconds.
    #[serde(default)]
    pub last_order_sync_timestamp: Option<i64>,
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub last_processed_email: Option<String>,
    /// Creation timestamp of the last backfilled record, epoch ms.
    #[serde(default)]
    pub last_processed_date: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Human-readable note set when a backfill reaches a terminal state.
    #[serde(default)]
    pub message: Option<String>,
    /// Stamped on every write.
    #[serde(default)]
    pub last_run_date: Option<DateTime<Utc>>,
}

/// Partial update merged onto the persisted checkpoint. Outer `None`
/// leaves a field untouched; `Some(None)` on the nullable fields clears
/// them explicitly.
#[derive(Debug, Clone, Default)]
pub struct CheckpointPatch {
    pub status: Option<SyncStatus>,
    pub cursor: Option<Option<String>>,
    pub last_processed_timestamp: Option<i64>,
    pub last_order_sync_timestamp: Option<i64>,
    pub total_processed: Option<u64>,
    pub last_processed_email: Option<Option<String>>,
    pub last_processed_date: Option<Option<i64>>,
    pub error_message: Option<Option<String>>,
    pub message: Option<Option<String>>,
}

impl Checkpoint {
    pub fn apply(&mut self, patch: CheckpointPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(cursor) = patch.cursor {
            self.cursor = cursor;
        }
        if let Some(ts) = patch.last_processed_timestamp {
            self.last_processed_timestamp = ts;
        }
        if let Some(ts) = patch.last_order_sync_timestamp {
            self.last_order_sync_timestamp = Some(ts);
        }
        if let Some(total) = patch.total_processed {
            self.total_processed = total;
        }
        if let Some(email) = patch.last_processed_email {
            self.last_processed_email = email;
        }
        if let Some(date) = patch.last_processed_date {
            self.last_processed_date = date;
        }
        if let Some(error) = patch.error_message {
            self.error_message = error;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::Running).unwrap(),
            "\"RUNNING\""
        );
        let parsed: SyncStatus = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert_eq!(parsed, SyncStatus::Completed);
    }

    #[test]
    fn apply_merges_only_set_fields() {
        let mut cp = Checkpoint {
            cursor: Some("abc".to_owned()),
            last_processed_timestamp: 42,
            ..Default::default()
        };

        cp.apply(CheckpointPatch {
            total_processed: Some(7),
            ..Default::default()
        });

        assert_eq!(cp.cursor.as_deref(), Some("abc"));
        assert_eq!(cp.last_processed_timestamp, 42);
        assert_eq!(cp.total_processed, 7);
    }

    #[test]
    fn apply_clears_nullable_fields_with_explicit_null() {
        let mut cp = Checkpoint {
            cursor: Some("abc".to_owned()),
            error_message: Some("boom".to_owned()),
            ..Default::default()
        };

        cp.apply(CheckpointPatch {
            cursor: Some(None),
            error_message: Some(None),
            ..Default::default()
        });

        assert_eq!(cp.cursor, None);
        assert_eq!(cp.error_message, None);
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let cp: Checkpoint = serde_json::from_str("{}").unwrap();
        assert_eq!(cp.status, SyncStatus::Idle);
        assert_eq!(cp.last_processed_timestamp, 0);
        assert_eq!(cp.cursor, None);
        assert_eq!(cp.last_run_date, None);
    }
}
