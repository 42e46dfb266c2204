use serde_json::{json, Map, Value};

use crate::crm::client::{CrmClient, CrmClientError};
use crate::crm::models::CrmRecord;
use crate::mapping::order::MappedLineItem;

/// Result of an upsert: the CRM id of the record plus whether this call
/// created it. Newness is read off the returned record's timestamps so
/// it also works for objects the CRM never flags explicitly.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub id: String,
    pub is_new: bool,
}

#[derive(Clone)]
pub struct Reconciler {
    crm: CrmClient,
}

impl Reconciler {
    pub fn new(crm: CrmClient) -> Self {
        Self { crm }
    }

    pub fn crm(&self) -> &CrmClient {
        &self.crm
    }

    /// Search-then-create-or-update. One record per call: search by the
    /// key property, update in place when found, create otherwise.
    /// Running the same input twice converges on the update branch.
    pub async fn upsert(
        &self,
        object_type: &str,
        search_property: &str,
        search_value: &str,
        properties: Map<String, Value>,
        associations: &[Value],
    ) -> Result<UpsertOutcome, CrmClientError> {
        let existing = self
            .crm
            .search_by_property(
                object_type,
                search_property,
                &[search_value.to_owned()],
                &[search_property],
            )
            .await?;

        if let Some(found) = existing.into_iter().next() {
            let input = json!({ "id": found.id, "properties": properties });
            let updated = self.crm.batch_update(object_type, vec![input]).await?;
            let is_new = updated.first().map(record_is_new).unwrap_or(false);
            return Ok(UpsertOutcome {
                id: found.id,
                is_new,
            });
        }

        let mut input = json!({ "properties": properties });
        if !associations.is_empty() {
            input["associations"] = json!(associations);
        }
        let created = self.crm.batch_create(object_type, vec![input]).await?;
        match created.into_iter().next() {
            Some(record) => Ok(UpsertOutcome {
                id: record.id,
                is_new: true,
            }),
            None => Err(CrmClientError::MissingResult(format!(
                "{object_type} create"
            ))),
        }
    }

    /// Batch-create line items, each carrying the given association.
    /// Zero and negative priced items are never sent. Returns how many
    /// were created.
    pub async fn create_line_items(
        &self,
        line_items: &[MappedLineItem],
        association: Value,
    ) -> Result<usize, CrmClientError> {
        let inputs: Vec<Value> = line_items
            .iter()
            .filter(|item| item.price > 0.0)
            .map(|item| {
                json!({
                    "properties": item.properties.clone(),
                    "associations": [association.clone()],
                })
            })
            .collect();

        if inputs.is_empty() {
            return Ok(0);
        }

        let created = self.crm.batch_create("line_items", inputs).await?;
        Ok(created.len())
    }

    pub async fn associate(
        &self,
        from_type: &str,
        from_id: &str,
        to_type: &str,
        to_id: &str,
    ) -> Result<(), CrmClientError> {
        self.crm
            .create_default_association(from_type, from_id, to_type, to_id)
            .await
    }
}

fn record_is_new(record: &CrmRecord) -> bool {
    match (record.created_at, record.updated_at) {
        (Some(created), Some(updated)) => created == updated,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::client::CrmClientConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reconciler(base_url: &str) -> Reconciler {
        Reconciler::new(
            CrmClient::new(CrmClientConfig {
                base_url: base_url.to_owned(),
                access_token: "test-token".to_owned(),
                max_retries: 1,
                timeout_secs: 5,
            })
            .expect("client should build"),
        )
    }

    fn props(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), Value::String((*v).to_owned())))
            .collect()
    }

    #[tokio::test]
    async fn upsert_takes_update_branch_when_record_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "42"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts/batch/update"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": "42",
                    "createdAt": "2026-01-01T00:00:00Z",
                    "updatedAt": "2026-02-01T12:00:00Z"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts/batch/create"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = reconciler(&server.uri())
            .upsert(
                "contacts",
                "email",
                "jane@example.com",
                props(&[("email", "jane@example.com")]),
                &[],
            )
            .await
            .unwrap();

        assert_eq!(outcome.id, "42");
        assert!(!outcome.is_new);
    }

    #[tokio::test]
    async fn upsert_creates_when_search_finds_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts/batch/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": "7",
                    "createdAt": "2026-02-01T12:00:00Z",
                    "updatedAt": "2026-02-01T12:00:00Z"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = reconciler(&server.uri())
            .upsert(
                "contacts",
                "email",
                "new@example.com",
                props(&[("email", "new@example.com")]),
                &[],
            )
            .await
            .unwrap();

        assert_eq!(outcome.id, "7");
        assert!(outcome.is_new);
    }

    #[tokio::test]
    async fn line_items_below_or_at_zero_price_are_filtered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/line_items/batch/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "li1"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = vec![
            MappedLineItem {
                temporary_id: "a".to_owned(),
                price: 25.0,
                properties: props(&[("name", "Widget"), ("price", "25.00")]),
            },
            MappedLineItem {
                temporary_id: "b".to_owned(),
                price: 0.0,
                properties: props(&[("name", "Free sample"), ("price", "0.00")]),
            },
        ];

        let created = reconciler(&server.uri())
            .create_line_items(&items, json!({"to": {"id": "o1"}}))
            .await
            .unwrap();
        assert_eq!(created, 1);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["inputs"].as_array().unwrap().len(), 1);
        assert_eq!(body["inputs"][0]["properties"]["name"], "Widget");
    }

    #[tokio::test]
    async fn all_zero_priced_line_items_skip_the_request_entirely() {
        let server = MockServer::start().await;

        let items = vec![MappedLineItem {
            temporary_id: "a".to_owned(),
            price: 0.0,
            properties: props(&[("price", "0.00")]),
        }];

        let created = reconciler(&server.uri())
            .create_line_items(&items, json!({"to": {"id": "o1"}}))
            .await
            .unwrap();
        assert_eq!(created, 0);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
