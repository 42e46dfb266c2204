use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A CRM object as returned by the search and batch endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmRecord {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Envelope shared by search and batch responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrmResults {
    #[serde(default)]
    pub results: Vec<CrmRecord>,
}
