use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use storesync_common::error::SyncError;

use crate::crm::models::{CrmRecord, CrmResults};
use crate::transport::RetryPolicy;

/// Fixed pacing before every CRM call to stay under the rate limit.
const CALL_PACING: Duration = Duration::from_millis(100);

/// The search endpoint rejects more than 5 filter groups per request.
const SEARCH_FILTER_BATCH: usize = 5;

/// Hard batch-size cap on the batch update endpoint.
const UPDATE_BATCH_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum CrmClientError {
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("response contained no results for {0}")]
    MissingResult(String),
}

impl From<CrmClientError> for SyncError {
    fn from(e: CrmClientError) -> Self {
        SyncError::Crm(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CrmClientConfig {
    pub base_url: String,
    pub access_token: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Clone)]
pub struct CrmClient {
    client: Client,
    config: CrmClientConfig,
    policy: RetryPolicy,
}

impl CrmClient {
    pub fn new(config: CrmClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let policy = RetryPolicy::with_max_retries(config.max_retries);
        Ok(Self {
            client,
            config,
            policy,
        })
    }

    /// Search `object_type` for records whose `property` equals any of
    /// `values`. Values are chunked to respect the filter-group cap, one
    /// request per chunk, results concatenated.
    pub async fn search_by_property(
        &self,
        object_type: &str,
        property: &str,
        values: &[String],
        return_props: &[&str],
    ) -> Result<Vec<CrmRecord>, CrmClientError> {
        let url = format!(
            "{}/crm/v3/objects/{}/search",
            self.config.base_url, object_type
        );
        let mut results = Vec::new();

        for chunk in values.chunks(SEARCH_FILTER_BATCH) {
            let filter_groups: Vec<Value> = chunk
                .iter()
                .map(|value| {
                    json!({
                        "filters": [{
                            "propertyName": property,
                            "operator": "EQ",
                            "value": value,
                        }]
                    })
                })
                .collect();
            let body = json!({
                "filterGroups": filter_groups,
                "properties": return_props,
            });

            let page: CrmResults = self
                .call_json("search", || {
                    self.client
                        .post(&url)
                        .bearer_auth(&self.config.access_token)
                        .json(&body)
                })
                .await?;
            results.extend(page.results);
        }

        Ok(results)
    }

    pub async fn batch_create(
        &self,
        object_type: &str,
        inputs: Vec<Value>,
    ) -> Result<Vec<CrmRecord>, CrmClientError> {
        let url = format!(
            "{}/crm/v3/objects/{}/batch/create",
            self.config.base_url, object_type
        );
        let body = json!({ "inputs": inputs });

        let page: CrmResults = self
            .call_json("batch create", || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.config.access_token)
                    .json(&body)
            })
            .await?;
        Ok(page.results)
    }

    /// Batch update, chunked to the endpoint's input cap.
    pub async fn batch_update(
        &self,
        object_type: &str,
        inputs: Vec<Value>,
    ) -> Result<Vec<CrmRecord>, CrmClientError> {
        let url = format!(
            "{}/crm/v3/objects/{}/batch/update",
            self.config.base_url, object_type
        );
        let mut results = Vec::new();

        for chunk in inputs.chunks(UPDATE_BATCH_LIMIT) {
            let body = json!({ "inputs": chunk });
            let page: CrmResults = self
                .call_json("batch update", || {
                    self.client
                        .post(&url)
                        .bearer_auth(&self.config.access_token)
                        .json(&body)
                })
                .await?;
            results.extend(page.results);
        }

        Ok(results)
    }

    /// Create the default (unlabeled) association between two records.
    /// The CRM answers 400 with an "already exists" message when the
    /// edge is already there; that counts as success.
    pub async fn create_default_association(
        &self,
        from_type: &str,
        from_id: &str,
        to_type: &str,
        to_id: &str,
    ) -> Result<(), CrmClientError> {
        let url = format!(
            "{}/crm/v4/objects/{}/{}/associations/default/{}/{}",
            self.config.base_url, from_type, from_id, to_type, to_id
        );

        let outcome: Result<Value, CrmClientError> = self
            .call_json("create association", || {
                self.client
                    .put(&url)
                    .bearer_auth(&self.config.access_token)
                    .json(&json!({}))
            })
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(CrmClientError::Http { ref body, .. }) if body.contains("already exists") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Shared call loop: fixed pacing before every attempt, then the same
    /// backoff schedule as the source transport. 400 and 404 are
    /// terminal; everything else, 500 included, is retried.
    async fn call_json<T, F>(&self, endpoint: &str, make: F) -> Result<T, CrmClientError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = String::new();

        for attempt in 0..self.policy.max_retries {
            tokio::time::sleep(CALL_PACING).await;

            let response = match make().send().await {
                Ok(response) => response,
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect()) {
                        return Err(CrmClientError::Request(e));
                    }
                    last_error = e.to_string();
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.json::<T>().await.map_err(CrmClientError::Request);
            }

            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
                return Err(CrmClientError::Http { status, body });
            }

            last_error = format!("{status}: {body}");
            let backoff = self.policy.backoff(attempt);
            tracing::warn!(
                endpoint,
                attempt = attempt + 1,
                backoff_ms = backoff.as_millis() as u64,
                status = status.as_u16(),
                "crm call failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }

        Err(CrmClientError::MaxRetriesExceeded {
            attempts: self.policy.max_retries,
            last_error,
        })
    }
}
