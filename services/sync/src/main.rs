mod commerce;
mod crm;
mod http;
mod jobs;
mod mapping;
mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use storesync_config::{init_tracing, AppConfig};
use storesync_state::CheckpointStore;

use crate::commerce::client::{CommerceClient, CommerceClientConfig};
use crate::crm::client::{CrmClient, CrmClientConfig};
use crate::crm::reconcile::Reconciler;
use crate::http::{build_router, AppState};
use crate::jobs::{SyncContext, SyncRuntime};

/// Delay inserted after every backfilled record to stay clear of the
/// CRM's burst limits.
const BACKFILL_RECORD_PACING: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);
    tracing::info!(service = "storesync", "starting");

    let commerce = CommerceClient::new(CommerceClientConfig {
        base_url: config.commerce_base_url.clone(),
        api_key: config.commerce_api_key.clone(),
        max_retries: config.max_retries,
        timeout_secs: config.timeout_secs,
    })
    .expect("failed to build commerce client");

    let crm = CrmClient::new(CrmClientConfig {
        base_url: config.crm_base_url.clone(),
        access_token: config.crm_access_token.clone(),
        max_retries: config.max_retries,
        timeout_secs: config.timeout_secs,
    })
    .expect("failed to build crm client");

    let ctx = Arc::new(SyncContext {
        commerce,
        reconciler: Reconciler::new(crm),
        store: CheckpointStore::new(&config.state_path),
        runtime: SyncRuntime::new(),
        pipeline_id: config.crm_pipeline_id.clone(),
        deal_stage: config.crm_deal_stage.clone(),
        backfill_cutoff: config.backfill_cutoff,
        record_pacing: BACKFILL_RECORD_PACING,
    });

    let scheduler_ctx = ctx.clone();
    let interval_secs = config.sync_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tracing::info!("executing scheduled sync");

            match jobs::profile_sync::run(&scheduler_ctx).await {
                Ok(report) => tracing::info!(
                    source = report.source,
                    processed = report.processed,
                    errors = report.errors,
                    "sync cycle done"
                ),
                Err(e) => tracing::error!(error = %e, "profile sync failed"),
            }

            match jobs::order_sync::run(&scheduler_ctx).await {
                Ok(report) => tracing::info!(
                    source = report.source,
                    processed = report.processed,
                    errors = report.errors,
                    "sync cycle done"
                ),
                Err(e) => tracing::error!(error = %e, "order sync failed"),
            }
        }
    });

    let app = build_router(AppState { ctx });
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");
    tracing::info!(%addr, "control surface listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .expect("server error");
}
