use serde_json::{json, Map, Value};

use crate::commerce::models::Profile;

/// A customer profile projected into CRM contact properties, plus the
/// source-side facts the sync jobs filter and sort on.
#[derive(Debug, Clone)]
pub struct MappedContact {
    pub temporary_id: String,
    pub email: Option<String>,
    pub is_customer: bool,
    /// Profile creation, epoch ms. Zero when the source omitted it.
    pub created_on_ms: i64,
    /// Most recent order, epoch ms. Zero when the profile never ordered.
    pub last_order_ms: i64,
    pub first_order_ms: Option<i64>,
    pub properties: Map<String, Value>,
}

impl MappedContact {
    /// Most recent activity: profile creation or last order, whichever
    /// is later. This is what the incremental watermark compares against.
    pub fn activity_ms(&self) -> i64 {
        self.created_on_ms.max(self.last_order_ms)
    }

    /// Lowercased, trimmed email, `None` when absent or blank.
    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }
}

pub fn map_profile(profile: &Profile) -> MappedContact {
    let address = profile.address.clone().unwrap_or_default();
    let summary = profile.transactions_summary.clone().unwrap_or_default();

    let created_on_ms = profile
        .created_on
        .map(|d| d.timestamp_millis())
        .unwrap_or(0);
    let first_order_ms = summary
        .first_order_submitted_on
        .map(|d| d.timestamp_millis());
    let last_order_ms = summary
        .last_order_submitted_on
        .map(|d| d.timestamp_millis())
        .unwrap_or(0);

    let first_name = profile.first_name.clone().unwrap_or_default();
    let last_name = profile.last_name.clone().unwrap_or_default();
    let billing_name = [first_name.as_str(), last_name.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    let mut properties = Map::new();
    properties.insert("firstname".to_owned(), json!(first_name));
    properties.insert("lastname".to_owned(), json!(last_name));
    properties.insert(
        "email".to_owned(),
        json!(profile.email.clone().unwrap_or_default()),
    );
    properties.insert(
        "sqsp_created_on".to_owned(),
        profile
            .created_on
            .map(|d| json!(d.timestamp_millis()))
            .unwrap_or(Value::Null),
    );
    properties.insert("sqsp_billing_name".to_owned(), json!(billing_name));
    properties.insert("iscustomer".to_owned(), json!(profile.is_customer));
    properties.insert(
        "sqsp_billing_address".to_owned(),
        json!(address.address1.unwrap_or_default()),
    );
    properties.insert(
        "sqsp_billing_address_line_2".to_owned(),
        json!(address.address2.unwrap_or_default()),
    );
    properties.insert(
        "sqsp_billing_city".to_owned(),
        json!(address.city.unwrap_or_default()),
    );
    properties.insert(
        "sqsp_billing_state_region".to_owned(),
        json!(address.state.unwrap_or_default()),
    );
    properties.insert(
        "sqsp_billing_country".to_owned(),
        json!(address.country_code.unwrap_or_default()),
    );
    properties.insert(
        "sqsp_billing_phone".to_owned(),
        json!(address.phone.unwrap_or_default()),
    );
    properties.insert(
        "sqsp_billing_postal_code".to_owned(),
        json!(address.postal_code.unwrap_or_default()),
    );
    properties.insert(
        "first_order_submitted_on".to_owned(),
        first_order_ms.map(|ms| json!(ms)).unwrap_or(Value::Null),
    );
    properties.insert(
        "last_order_submitted_on".to_owned(),
        summary
            .last_order_submitted_on
            .map(|d| json!(d.timestamp_millis()))
            .unwrap_or(Value::Null),
    );

    MappedContact {
        temporary_id: profile.id.clone(),
        email: profile.email.clone(),
        is_customer: profile.is_customer,
        created_on_ms,
        last_order_ms,
        first_order_ms,
        properties,
    }
}
