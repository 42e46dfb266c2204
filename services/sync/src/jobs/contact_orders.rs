//! Per-contact order sub-sync: scans the order window opened by the
//! contact's first purchase, correlates payment transactions, and builds
//! the order/deal/line-item graph in the CRM.

use chrono::Utc;
use serde_json::{json, Value};
use storesync_common::error::SyncError;

use crate::commerce::client::DateWindow;
use crate::commerce::models::Order;
use crate::jobs::{ms_to_utc, SyncContext};
use crate::mapping::order::{map_order, MappedOrder};
use crate::mapping::transaction::{map_transaction, MappedPayment};

/// Slack subtracted from the first recorded order so boundary rounding
/// on the source side never hides it from the window.
const WINDOW_SLACK_MS: i64 = 3_600_000;

/// CRM-defined association type: line item belongs to order.
const ORDER_LINE_ITEM_TYPE: u32 = 514;

/// Sync every order belonging to `email` since the contact's first
/// purchase. Returns how many orders were reconciled. A failing order
/// is logged and skipped, the rest of the batch continues, so the
/// sub-sync itself never fails.
pub async fn sync(
    ctx: &SyncContext,
    email: &str,
    contact_id: &str,
    first_order_ms: Option<i64>,
) -> usize {
    let Some(first_order) = first_order_ms else {
        return 0;
    };

    let window = DateWindow::new(ms_to_utc(first_order - WINDOW_SLACK_MS), Utc::now());

    let scan = ctx.commerce.scan_orders(&window).await;
    if !scan.complete {
        tracing::warn!(email, "order scan ended early, window may be incomplete");
    }

    let matches: Vec<&Order> = scan
        .orders
        .iter()
        .filter(|order| {
            order
                .customer_email
                .as_deref()
                .map(|e| e.trim().eq_ignore_ascii_case(email))
                .unwrap_or(false)
        })
        .collect();
    if matches.is_empty() {
        return 0;
    }

    let payments: Vec<MappedPayment> = match ctx.commerce.transactions(&window).await {
        Ok(page) => page.documents.iter().map(map_transaction).collect(),
        Err(e) => {
            tracing::warn!(email, error = %e, "payment fetch failed, syncing orders without payment fields");
            Vec::new()
        }
    };

    let mut synced = 0;
    for order in matches {
        let mut mapped = map_order(order, &ctx.pipeline_id, &ctx.deal_stage);
        apply_payment(&mut mapped, &payments);

        match sync_one(ctx, contact_id, &mapped).await {
            Ok(()) => synced += 1,
            Err(e) => {
                tracing::error!(
                    email,
                    order = %mapped.external_order_id,
                    error = %e,
                    "order reconciliation failed"
                );
            }
        }
    }
    synced
}

/// First payment whose related order matches wins; no match leaves the
/// payment fields off the order entirely.
fn apply_payment(mapped: &mut MappedOrder, payments: &[MappedPayment]) {
    let matched = payments
        .iter()
        .find(|p| p.related_order_id.as_deref() == Some(mapped.temporary_id.as_str()));
    if let Some(payment) = matched {
        mapped.order.insert(
            "hs_payment_processing_method".to_owned(),
            Value::String(payment.processing_method.clone()),
        );
        mapped.order.insert(
            "payment_reference".to_owned(),
            Value::String(payment.payment_reference.clone()),
        );
    }
}

/// One order's graph. The order and deal upserts are anchors: if either
/// fails the record is abandoned. Association edges and line items are
/// best effort on top.
async fn sync_one(ctx: &SyncContext, contact_id: &str, mapped: &MappedOrder) -> Result<(), SyncError> {
    let order = ctx
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
        .associate("contacts", contact_id, "orders", &order.id)
        .await
    {
        tracing::error!(contact = contact_id, order = %order.id, error = %e, "contact-order association failed");
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
        .associate("contacts", contact_id, "deals", &deal.id)
        .await
    {
        tracing::error!(contact = contact_id, deal = %deal.id, error = %e, "contact-deal association failed");
    }
    if let Err(e) = ctx
        .reconciler
        .associate("orders", &order.id, "deals", &deal.id)
        .await
    {
        tracing::error!(order = %order.id, deal = %deal.id, error = %e, "order-deal association failed");
    }

    // Line items only on first creation; re-running an already-synced
    // order must not duplicate them.
    if order.is_new && !mapped.line_items.is_empty() {
        let association = json!({
            "to": { "id": order.id },
            "types": [{
                "associationCategory": "HUBSPOT_DEFINED",
                "associationTypeId": ORDER_LINE_ITEM_TYPE,
            }],
        });
        if let Err(e) = ctx
            .reconciler
            .create_line_items(&mapped.line_items, association)
            .await
        {
            tracing::error!(order = %order.id, error = %e, "line item creation failed");
        }
    }

    Ok(())
}
