//! Incremental profile sync: walks the full profile stream page by page,
//! filters on the activity watermark, reconciles customers into the CRM
//! and fans out into the per-contact order sub-sync.

use storesync_common::error::SyncError;
use storesync_state::CheckpointPatch;

use crate::commerce::client::API_PAGE_DELAY;
use crate::jobs::{contact_orders, now_ms, CycleReport, SyncContext};
use crate::mapping::contact::{map_profile, MappedContact};

const SOURCE_NAME: &str = "profiles";

const ONE_DAY_MS: i64 = 86_400_000;

pub async fn run(ctx: &SyncContext) -> Result<CycleReport, SyncError> {
    let _guard = match ctx.runtime.try_begin_profile() {
        Some(guard) => guard,
        None => {
            tracing::info!("profile sync already running, skipping this cycle");
            return Ok(CycleReport::empty(SOURCE_NAME));
        }
    };

    initialize_watermark(ctx).await?;

    let mut report = CycleReport::empty(SOURCE_NAME);
    let mut cursor: Option<String> = None;

    loop {
        let page = match ctx.commerce.profiles_page(cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "profile page fetch failed, ending cycle early");
                break;
            }
        };

        if !page.profiles.is_empty() {
            let mapped: Vec<MappedContact> = page.profiles.iter().map(map_profile).collect();
            process_batch(ctx, mapped, &mut report).await?;
        }

        match page.pagination.next_cursor() {
            Some(next) => {
                cursor = Some(next);
                tokio::time::sleep(API_PAGE_DELAY).await;
            }
            None => break,
        }
    }

    if report.processed > 0 || report.errors > 0 {
        tracing::info!(
            processed = report.processed,
            errors = report.errors,
            "profile sync cycle finished"
        );
    }
    Ok(report)
}

/// Load the watermark once per process: prefer the persisted value, and
/// on a true first run probe the source. A reachable source starts from
/// zero (sync everything); an unreachable one gets a one-day lookback
/// kept in memory only.
async fn initialize_watermark(ctx: &SyncContext) -> Result<(), SyncError> {
    if ctx.runtime.profile_watermark().is_some() {
        return Ok(());
    }

    let checkpoint = ctx.store.read();
    if checkpoint.last_processed_timestamp > 0 {
        ctx.runtime
            .set_profile_watermark(checkpoint.last_processed_timestamp);
        return Ok(());
    }

    match ctx.commerce.profiles_page(None).await {
        Ok(_) => {
            ctx.store.write(CheckpointPatch {
                last_processed_timestamp: Some(0),
                ..Default::default()
            })?;
            ctx.runtime.set_profile_watermark(0);
        }
        Err(e) => {
            tracing::warn!(error = %e, "source probe failed, seeding watermark with one-day lookback");
            ctx.runtime.set_profile_watermark(now_ms() - ONE_DAY_MS);
        }
    }
    Ok(())
}

/// Reconcile one page worth of profiles. The watermark only moves (in
/// memory and on disk) when at least one profile on the page qualified.
async fn process_batch(
    ctx: &SyncContext,
    batch: Vec<MappedContact>,
    report: &mut CycleReport,
) -> Result<(), SyncError> {
    let watermark = ctx.runtime.profile_watermark().unwrap_or(0);

    let mut fresh: Vec<MappedContact> = batch
        .into_iter()
        .filter(|contact| contact.activity_ms() > watermark)
        .collect();
    if fresh.is_empty() {
        return Ok(());
    }

    // Oldest first so a mid-page failure never skips records on retry;
    // creation time breaks activity ties.
    fresh.sort_by_key(|contact| (contact.activity_ms(), contact.created_on_ms));

    let mut batch_max = watermark;

    for contact in &fresh {
        let Some(email) = contact.normalized_email() else {
            continue;
        };
        let activity = contact.activity_ms();

        if !contact.is_customer {
            // Non-customers advance the watermark without touching the CRM.
            batch_max = batch_max.max(activity);
            continue;
        }

        let outcome = match ctx
            .reconciler
            .upsert("contacts", "email", &email, contact.properties.clone(), &[])
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(email = %email, error = %e, "contact reconciliation failed");
                report.errors += 1;
                continue;
            }
        };

        contact_orders::sync(ctx, &email, &outcome.id, contact.first_order_ms).await;

        batch_max = batch_max.max(activity);
        report.processed += 1;
    }

    if batch_max > watermark {
        ctx.runtime.set_profile_watermark(batch_max);
        ctx.store.write(CheckpointPatch {
            last_processed_timestamp: Some(batch_max),
            ..Default::default()
        })?;
    }
    Ok(())
}
