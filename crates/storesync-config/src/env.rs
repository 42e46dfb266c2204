use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::env;
use storesync_common::error::{SyncError, SyncResult};

/// Default cutoff for the historical backfill: records created before
/// this instant are never migrated.
const DEFAULT_BACKFILL_CUTOFF: &str = "2025-12-01T00:00:00Z";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub commerce_base_url: String,
    pub commerce_api_key: String,
    pub crm_base_url: String,
    pub crm_access_token: String,
    pub crm_pipeline_id: String,
    pub crm_deal_stage: String,
    pub host: String,
    pub port: u16,
    pub state_path: String,
    pub sync_interval_secs: u64,
    pub backfill_cutoff: DateTime<Utc>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> SyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            commerce_base_url: get_var_or("COMMERCE_BASE_URL", "https://api.squarespace.com/1.0"),
            commerce_api_key: get_var("COMMERCE_API_KEY")?,
            crm_base_url: get_var_or("CRM_BASE_URL", "https://api.hubapi.com"),
            crm_access_token: get_var("CRM_ACCESS_TOKEN")?,
            crm_pipeline_id: get_var_or("CRM_PIPELINE_ID", "default"),
            crm_deal_stage: get_var_or("CRM_DEAL_STAGE", "appointmentscheduled"),
            host: get_var_or("HOST", "0.0.0.0"),
            port: get_var_or("PORT", "8080")
                .parse()
                .map_err(|e| SyncError::Config(format!("invalid PORT: {e}")))?,
            state_path: get_var_or("STATE_PATH", "states/sync-checkpoint.json"),
            sync_interval_secs: get_var_or("SYNC_INTERVAL_SECS", "7200")
                .parse()
                .map_err(|e| SyncError::Config(format!("invalid SYNC_INTERVAL_SECS: {e}")))?,
            backfill_cutoff: get_var_or("BACKFILL_CUTOFF_DATE", DEFAULT_BACKFILL_CUTOFF)
                .parse()
                .map_err(|e| SyncError::Config(format!("invalid BACKFILL_CUTOFF_DATE: {e}")))?,
            max_retries: get_var_or("MAX_RETRIES", "10")
                .parse()
                .map_err(|e| SyncError::Config(format!("invalid MAX_RETRIES: {e}")))?,
            timeout_secs: get_var_or("HTTP_TIMEOUT_SECS", "30")
                .parse()
                .map_err(|e| SyncError::Config(format!("invalid HTTP_TIMEOUT_SECS: {e}")))?,
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn get_var(key: &str) -> SyncResult<String> {
    env::var(key).map_err(|_| SyncError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}
