use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::USER_AGENT;
use reqwest::Client;

use crate::commerce::models::{Order, OrdersPage, ProfilesPage, TransactionsPage};
use crate::transport::{send_json_with_retry, RetryPolicy, TransportError};

/// Politeness delay between consecutive page fetches.
pub const API_PAGE_DELAY: Duration = Duration::from_millis(300);

const CLIENT_USER_AGENT: &str = "storesync/0.1";

/// Half-open time window passed to the windowed endpoints as
/// `modifiedAfter`/`modifiedBefore`.
#[derive(Debug, Clone)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn start_iso(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn end_iso(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Result of a full multi-page order scan. `complete` is false when a
/// page fetch failed after retries and the scan ended early, so callers
/// can tell a partial window from an exhausted one.
#[derive(Debug, Default)]
pub struct OrderScan {
    pub orders: Vec<Order>,
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct CommerceClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Clone)]
pub struct CommerceClient {
    client: Client,
    config: CommerceClientConfig,
    policy: RetryPolicy,
}

impl CommerceClient {
    pub fn new(config: CommerceClientConfig) -> Result<Self, reqwest::Error> {
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

    /// One page of customer profiles, oldest cursor semantics are owned
    /// by the API; pass back exactly what the previous page handed out.
    pub async fn profiles_page(
        &self,
        cursor: Option<&str>,
    ) -> Result<ProfilesPage, TransportError> {
        let url = format!("{}/profiles", self.config.base_url);
        let cursor = cursor.map(str::to_owned);

        send_json_with_retry(&self.policy, "profiles", false, || {
            let mut req = self
                .client
                .get(&url)
                .bearer_auth(&self.config.api_key)
                .header(USER_AGENT, CLIENT_USER_AGENT);
            if let Some(c) = &cursor {
                req = req.query(&[("cursor", c.as_str())]);
            }
            req
        })
        .await
    }

    /// Profiles filtered by exact email.
    pub async fn profile_by_email(&self, email: &str) -> Result<ProfilesPage, TransportError> {
        let url = format!("{}/profiles", self.config.base_url);
        let filter = format!("email,{email}");

        send_json_with_retry(&self.policy, "profiles by email", false, || {
            self.client
                .get(&url)
                .bearer_auth(&self.config.api_key)
                .header(USER_AGENT, CLIENT_USER_AGENT)
                .query(&[("filter", filter.as_str())])
        })
        .await
    }

    /// One page of orders. The first request carries the window bounds;
    /// once a cursor exists the window parameters are dropped, the
    /// cursor encodes them.
    pub async fn orders_page(
        &self,
        window: &DateWindow,
        cursor: Option<&str>,
    ) -> Result<OrdersPage, TransportError> {
        let url = format!("{}/commerce/orders", self.config.base_url);
        let cursor = cursor.map(str::to_owned);
        let (start, end) = (window.start_iso(), window.end_iso());

        send_json_with_retry(&self.policy, "orders", false, || {
            let req = self.client.get(&url).bearer_auth(&self.config.api_key);
            match &cursor {
                Some(c) => req.query(&[("cursor", c.as_str())]),
                None => req.query(&[
                    ("modifiedAfter", start.as_str()),
                    ("modifiedBefore", end.as_str()),
                ]),
            }
        })
        .await
    }

    /// Payment transactions in the window. Not paginated by callers; the
    /// window is always small enough for one page.
    pub async fn transactions(&self, window: &DateWindow) -> Result<TransactionsPage, TransportError> {
        let url = format!("{}/commerce/transactions", self.config.base_url);
        let (start, end) = (window.start_iso(), window.end_iso());

        send_json_with_retry(&self.policy, "transactions", false, || {
            self.client
                .get(&url)
                .bearer_auth(&self.config.api_key)
                .query(&[
                    ("modifiedAfter", start.as_str()),
                    ("modifiedBefore", end.as_str()),
                ])
        })
        .await
    }

    /// Collect every order page in the window. A page failure after the
    /// transport's retries ends the scan early with whatever was
    /// gathered so far.
    pub async fn scan_orders(&self, window: &DateWindow) -> OrderScan {
        let mut orders = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self.orders_page(window, cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(error = %e, "order page fetch failed, ending scan early");
                    return OrderScan {
                        orders,
                        complete: false,
                    };
                }
            };

            orders.extend(page.result);

            match page.pagination.next_cursor() {
                Some(next) => {
                    cursor = Some(next);
                    tokio::time::sleep(API_PAGE_DELAY).await;
                }
                None => break,
            }
        }

        OrderScan {
            orders,
            complete: true,
        }
    }
}
