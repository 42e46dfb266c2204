pub mod backfill;
pub mod contact_orders;
pub mod order_sync;
pub mod profile_sync;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use storesync_state::CheckpointStore;

use crate::commerce::client::CommerceClient;
use crate::crm::reconcile::Reconciler;

/// Summary of one job invocation, shaped for the scheduler's logs.
#[derive(Debug)]
pub struct CycleReport {
    pub source: &'static str,
    pub processed: usize,
    pub errors: usize,
}

impl CycleReport {
    pub fn empty(source: &'static str) -> Self {
        Self {
            source,
            processed: 0,
            errors: 0,
        }
    }
}

/// Process-wide mutable state shared by the jobs: the profile cycle's
/// in-memory watermark (loaded once per process) and one single-flight
/// guard per job. A second invocation while a guard is held skips
/// instead of queueing.
pub struct SyncRuntime {
    profile_watermark: Mutex<Option<i64>>,
    profile_running: AtomicBool,
    orders_running: AtomicBool,
    backfill_running: AtomicBool,
}

impl SyncRuntime {
    pub fn new() -> Self {
        Self {
            profile_watermark: Mutex::new(None),
            profile_running: AtomicBool::new(false),
            orders_running: AtomicBool::new(false),
            backfill_running: AtomicBool::new(false),
        }
    }

    pub fn try_begin_profile(&self) -> Option<RunGuard<'_>> {
        RunGuard::acquire(&self.profile_running)
    }

    pub fn try_begin_orders(&self) -> Option<RunGuard<'_>> {
        RunGuard::acquire(&self.orders_running)
    }

    pub fn try_begin_backfill(&self) -> Option<RunGuard<'_>> {
        RunGuard::acquire(&self.backfill_running)
    }

    pub fn profile_watermark(&self) -> Option<i64> {
        *self
            .profile_watermark
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_profile_watermark(&self, watermark_ms: i64) {
        *self
            .profile_watermark
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(watermark_ms);
    }
}

impl Default for SyncRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the job's single-flight flag when dropped.
pub struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Everything a job needs to run. One instance per process, behind an
/// `Arc` shared by the scheduler and the HTTP surface.
pub struct SyncContext {
    pub commerce: CommerceClient,
    pub reconciler: Reconciler,
    pub store: CheckpointStore,
    pub runtime: SyncRuntime,
    pub pipeline_id: String,
    pub deal_stage: String,
    pub backfill_cutoff: DateTime<Utc>,
    /// Delay inserted after every backfilled record.
    pub record_pacing: Duration,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::commerce::client::CommerceClientConfig;
    use crate::crm::client::{CrmClient, CrmClientConfig};
    use std::path::Path;

    pub fn test_context(
        commerce_base: &str,
        crm_base: &str,
        state_dir: &Path,
        backfill_cutoff: &str,
    ) -> SyncContext {
        let commerce = CommerceClient::new(CommerceClientConfig {
            base_url: commerce_base.to_owned(),
            api_key: "test-key".to_owned(),
            max_retries: 1,
            timeout_secs: 5,
        })
        .expect("commerce client should build");
        let crm = CrmClient::new(CrmClientConfig {
            base_url: crm_base.to_owned(),
            access_token: "test-token".to_owned(),
            max_retries: 1,
            timeout_secs: 5,
        })
        .expect("crm client should build");

        SyncContext {
            commerce,
            reconciler: Reconciler::new(crm),
            store: CheckpointStore::new(state_dir.join("checkpoint.json")),
            runtime: SyncRuntime::new(),
            pipeline_id: "pipe-test".to_owned(),
            deal_stage: "stage-test".to_owned(),
            backfill_cutoff: backfill_cutoff.parse().expect("valid cutoff"),
            record_pacing: Duration::ZERO,
        }
    }
}
