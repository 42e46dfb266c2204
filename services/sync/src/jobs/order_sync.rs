//! Standalone order sync: walks orders modified in the lookback window
//! regardless of profile activity, resolving (or creating) the owning
//! contact on the fly. Line items hang off the deal here.

use chrono::Utc;
use serde_json::json;
use storesync_common::error::SyncError;
use storesync_state::CheckpointPatch;

use crate::commerce::client::{DateWindow, API_PAGE_DELAY};
use crate::commerce::models::Order;
use crate::jobs::{ms_to_utc, now_ms, CycleReport, SyncContext};
use crate::mapping::contact::map_profile;
use crate::mapping::order::map_order;

const SOURCE_NAME: &str = "orders";

const LOOKBACK_MS: i64 = 86_400_000;

/// CRM-defined association type: line item belongs to deal.
const DEAL_LINE_ITEM_TYPE: u32 = 19;

pub async fn run(ctx: &SyncContext) -> Result<CycleReport, SyncError> {
    let _guard = match ctx.runtime.try_begin_orders() {
        Some(guard) => guard,
        None => {
            tracing::info!("order sync already running, skipping this cycle");
            return Ok(CycleReport::empty(SOURCE_NAME));
        }
    };

    let checkpoint = ctx.store.read();
    let start_ms = match checkpoint.last_order_sync_timestamp {
        Some(ts) if ts > 0 => ts,
        _ => now_ms() - LOOKBACK_MS,
    };
    let end = Utc::now();
    let window = DateWindow::new(ms_to_utc(start_ms), end);

    let mut report = CycleReport::empty(SOURCE_NAME);
    let mut cursor: Option<String> = None;

    loop {
        let page = match ctx.commerce.orders_page(&window, cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "order page fetch failed, ending cycle early");
                break;
            }
        };

        for order in &page.result {
            match process_order(ctx, order).await {
                Ok(true) => report.processed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        order = order.order_number.as_deref().unwrap_or(&order.id),
                        error = %e,
                        "order sync failed"
                    );
                    report.errors += 1;
                }
            }
        }

        match page.pagination.next_cursor() {
            Some(next) => {
                cursor = Some(next);
                tokio::time::sleep(API_PAGE_DELAY).await;
            }
            None => break,
        }
    }

    // The watermark moves to the window end even on an empty run, so
    // quiet periods are never re-scanned.
    ctx.store.write(CheckpointPatch {
        last_order_sync_timestamp: Some(end.timestamp_millis()),
        ..Default::default()
    })?;

    if report.processed > 0 || report.errors > 0 {
        tracing::info!(
            processed = report.processed,
            errors = report.errors,
            "order sync cycle finished"
        );
    }
    Ok(report)
}

/// Returns `Ok(true)` when the order was reconciled, `Ok(false)` when it
/// was skipped (no email, no resolvable contact).
async fn process_order(ctx: &SyncContext, order: &Order) -> Result<bool, SyncError> {
    let Some(email) = order
        .customer_email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
    else {
        return Ok(false);
    };

    let Some(contact_id) = resolve_contact(ctx, email).await? else {
        tracing::warn!(email, "no contact and no source profile, skipping order");
        return Ok(false);
    };

    let mapped = map_order(order, &ctx.pipeline_id, &ctx.deal_stage);

    let order_outcome = ctx
        .reconciler
        .upsert(
            "orders",
            "hs_external_order_id",
            &mapped.external_order_id,
            mapped.order.clone(),
            &[],
        )
        .await
        .map_err(SyncError::from)?;

    if let Err(e) = ctx
        .reconciler
        .associate("contacts", &contact_id, "orders", &order_outcome.id)
        .await
    {
        tracing::error!(contact = %contact_id, order = %order_outcome.id, error = %e, "contact-order association failed");
    }

    let deal = ctx
        .reconciler
        .upsert(
            "deals",
            "dealname",
            &mapped.deal_name,
            mapped.deal.clone(),
            &[],
        )
        .await
        .map_err(SyncError::from)?;

    if let Err(e) = ctx
        .reconciler
        .associate("contacts", &contact_id, "deals", &deal.id)
        .await
    {
        tracing::error!(contact = %contact_id, deal = %deal.id, error = %e, "contact-deal association failed");
    }
    if let Err(e) = ctx
        .reconciler
        .associate("orders", &order_outcome.id, "deals", &deal.id)
        .await
    {
        tracing::error!(order = %order_outcome.id, deal = %deal.id, error = %e, "order-deal association failed");
    }

    // Unlike the per-contact sub-sync this is not gated on newness; the
    // deal-side line items are replayed on every pass.
    if !mapped.line_items.is_empty() {
        let association = json!({
            "to": { "id": deal.id },
            "types": [{
                "associationCategory": "HUBSPOT_DEFINED",
                "associationTypeId": DEAL_LINE_ITEM_TYPE,
            }],
        });
        if let Err(e) = ctx
            .reconciler
            .create_line_items(&mapped.line_items, association)
            .await
        {
            tracing::error!(deal = %deal.id, error = %e, "line item creation failed");
        }
    }

    Ok(true)
}

/// Find the CRM contact for an order's email, creating one from the
/// source profile when the CRM has never seen it. `None` when the email
/// is unknown on both sides.
async fn resolve_contact(ctx: &SyncContext, email: &str) -> Result<Option<String>, SyncError> {
    let found = ctx
        .reconciler
        .crm()
        .search_by_property("contacts", "email", &[email.to_owned()], &["email"])
        .await
        .map_err(SyncError::from)?;
    if let Some(existing) = found.first() {
        return Ok(Some(existing.id.clone()));
    }

    let page = ctx.commerce.profile_by_email(email).await?;
    let Some(profile) = page.profiles.first() else {
        return Ok(None);
    };

    let mapped = map_profile(profile);
    let input = json!({ "properties": mapped.properties });
    let created = ctx
        .reconciler
        .crm()
        .batch_create("contacts", vec![input])
        .await
        .map_err(SyncError::from)?;
    Ok(created.into_iter().next().map(|record| record.id))
}
