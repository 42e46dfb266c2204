//! Historical backfill: walks the full profile stream newest-first and
//! reconciles every customer until the cutoff date is reached, the
//! stream ends, or something fatal happens. Resumable via the persisted
//! cursor.

use storesync_common::error::SyncError;
use storesync_state::{CheckpointPatch, SyncStatus};

use crate::jobs::{contact_orders, CycleReport, SyncContext};
use crate::mapping::contact::{map_profile, MappedContact};

const SOURCE_NAME: &str = "backfill";

const PROGRESS_LOG_EVERY: u64 = 50;

enum Step {
    /// Cutoff reached; abandon the rest of the stream.
    Stop,
    /// Not a customer (or no usable email); not counted.
    Skipped,
    /// A customer record was reconciled (or attempted) and counted.
    Processed,
}

pub async fn run(ctx: &SyncContext) -> Result<CycleReport, SyncError> {
    let _guard = match ctx.runtime.try_begin_backfill() {
        Some(guard) => guard,
        None => {
            tracing::info!("backfill already running, skipping");
            return Ok(CycleReport::empty(SOURCE_NAME));
        }
    };

    tracing::info!(cutoff = %ctx.backfill_cutoff, "starting backfill");

    let saved = ctx.store.read();
    let mut cursor = saved.cursor.clone();
    let mut total = saved.total_processed;
    if cursor.is_some() {
        tracing::info!(total, "resuming backfill from saved cursor");
    }

    ctx.store.write(CheckpointPatch {
        status: Some(SyncStatus::Running),
        error_message: Some(None),
        ..Default::default()
    })?;

    let mut report = CycleReport::empty(SOURCE_NAME);
    match scan(ctx, &mut cursor, &mut total, &mut report).await {
        Ok(reached_cutoff) => {
            let message = if reached_cutoff {
                format!("target date reached ({})", ctx.backfill_cutoff)
            } else {
                "end of stream reached".to_owned()
            };
            ctx.store.write(CheckpointPatch {
                status: Some(SyncStatus::Completed),
                cursor: Some(None),
                error_message: Some(None),
                message: Some(Some(message.clone())),
                total_processed: Some(total),
                ..Default::default()
            })?;
            tracing::info!(total, %message, "backfill completed");
            Ok(report)
        }
        Err(e) => {
            tracing::error!(error = %e, "backfill failed");
            if let Err(persist_err) = ctx.store.write(CheckpointPatch {
                status: Some(SyncStatus::Error),
                error_message: Some(Some(e.to_string())),
                ..Default::default()
            }) {
                tracing::error!(error = %persist_err, "failed to persist backfill error state");
            }
            Err(e)
        }
    }
}

/// Walk pages until the cutoff or the end of the stream. Returns whether
/// the cutoff was the reason for stopping. The checkpoint is advanced
/// only after a page is fully processed, so a crash re-scans at most one
/// page on resume.
async fn scan(
    ctx: &SyncContext,
    cursor: &mut Option<String>,
    total: &mut u64,
    report: &mut CycleReport,
) -> Result<bool, SyncError> {
    let cutoff_ms = ctx.backfill_cutoff.timestamp_millis();

    loop {
        let page = match ctx.commerce.profiles_page(cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "profile page fetch failed, treating as end of stream");
                return Ok(false);
            }
        };

        if page.profiles.is_empty() {
            match page.pagination.next_cursor() {
                Some(next) => {
                    *cursor = Some(next.clone());
                    ctx.store.write(CheckpointPatch {
                        cursor: Some(Some(next)),
                        status: Some(SyncStatus::Running),
                        ..Default::default()
                    })?;
                    continue;
                }
                None => return Ok(false),
            }
        }

        let mut mapped: Vec<MappedContact> = page.profiles.iter().map(map_profile).collect();
        // The API claims newest-first; enforce it so the stop condition
        // cannot fire before newer records on the same page are handled.
        mapped.sort_by(|a, b| b.created_on_ms.cmp(&a.created_on_ms));

        for contact in &mapped {
            match process_contact(ctx, contact, cutoff_ms).await {
                Step::Stop => return Ok(true),
                Step::Skipped => {}
                Step::Processed => {
                    *total += 1;
                    report.processed += 1;
                    if *total % PROGRESS_LOG_EVERY == 0 {
                        tracing::info!(total = *total, "backfill progress");
                    }
                }
            }
        }

        let last = mapped.last();
        match page.pagination.next_cursor() {
            Some(next) => {
                *cursor = Some(next.clone());
                ctx.store.write(CheckpointPatch {
                    cursor: Some(Some(next)),
                    status: Some(SyncStatus::Running),
                    total_processed: Some(*total),
                    last_processed_email: Some(last.and_then(|c| c.email.clone())),
                    last_processed_date: Some(last.map(|c| c.created_on_ms)),
                    ..Default::default()
                })?;
            }
            None => return Ok(false),
        }
    }
}

async fn process_contact(ctx: &SyncContext, contact: &MappedContact, cutoff_ms: i64) -> Step {
    if contact.created_on_ms > 0 && contact.created_on_ms < cutoff_ms {
        return Step::Stop;
    }

    let Some(email) = contact.normalized_email() else {
        return Step::Skipped;
    };
    if !contact.is_customer {
        return Step::Skipped;
    }

    match ctx
        .reconciler
        .upsert("contacts", "email", &email, contact.properties.clone(), &[])
        .await
    {
        Ok(outcome) => {
            contact_orders::sync(ctx, &email, &outcome.id, contact.first_order_ms).await;
        }
        Err(e) => {
            tracing::error!(email = %email, error = %e, "backfill contact reconciliation failed");
        }
    }

    tokio::time::sleep(ctx.record_pacing).await;
    Step::Processed
}
