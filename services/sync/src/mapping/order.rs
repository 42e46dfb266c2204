use serde_json::{json, Map, Value};

use crate::commerce::models::{Money, Order, OrderAddress};

#[derive(Debug, Clone)]
pub struct MappedLineItem {
    pub temporary_id: String,
    /// Unit price as a number, used only for the send-or-skip filter;
    /// the CRM receives the original decimal string.
    pub price: f64,
    pub properties: Map<String, Value>,
}

/// One source order projected into the three CRM bags it fans out to.
#[derive(Debug, Clone)]
pub struct MappedOrder {
    pub temporary_id: String,
    /// The order's reconciliation key (the human order number).
    pub external_order_id: String,
    /// The deal's reconciliation key: `"{date} {first} {last} {orderNumber}"`.
    pub deal_name: String,
    pub order: Map<String, Value>,
    pub deal: Map<String, Value>,
    pub line_items: Vec<MappedLineItem>,
}

pub fn map_order(order: &Order, pipeline_id: &str, deal_stage: &str) -> MappedOrder {
    let billing = order.billing_address.clone().unwrap_or_default();
    let shipping = order.shipping_address.clone().unwrap_or_default();
    let first_shipping_line = order.shipping_lines.first().cloned().unwrap_or_default();
    let first_fulfillment = order.fulfillments.first().cloned().unwrap_or_default();

    let order_number = order.order_number.clone().unwrap_or_default();
    let created_iso = order
        .created_on
        .map(|d| d.to_rfc3339())
        .unwrap_or_default();
    let formatted_date = order
        .created_on
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    let discount_codes = order
        .discount_lines
        .iter()
        .filter_map(|d| d.promo_code.clone().or_else(|| d.name.clone()))
        .collect::<Vec<_>>()
        .join(", ");
    let private_notes = order
        .internal_notes
        .iter()
        .filter_map(|n| n.content.clone())
        .collect::<Vec<_>>()
        .join(" | ");
    let form_note = form_value(order, "Note / Additional Info");
    let form_checkbox = form_value(order, "Checkbox");

    let total = money_f64(&order.grand_total);
    let refunded = money_f64(&order.refunded_total);
    let payment_status = if refunded >= total && total > 0.0 {
        "Refunded"
    } else if refunded > 0.0 {
        "Partial Refund"
    } else {
        "Paid"
    };

    let deal_name = format!(
        "{formatted_date} {} {} {order_number}",
        billing.first_name.clone().unwrap_or_default(),
        billing.last_name.clone().unwrap_or_default(),
    );

    let mut order_props = Map::new();
    order_props.insert(
        "hs_order_name".to_owned(),
        json!(format!("SQSP-{order_number}")),
    );
    order_props.insert("hs_external_order_id".to_owned(), json!(order_number));
    order_props.insert(
        "hs_billing_address_email".to_owned(),
        json!(order.customer_email.clone().unwrap_or_default()),
    );
    order_props.insert(
        "customerid".to_owned(),
        json!(order.customer_id.clone().unwrap_or_default()),
    );
    order_props.insert("hs_external_created_date".to_owned(), json!(created_iso));
    order_props.insert(
        "hs_fulfillment_status".to_owned(),
        json!(order.fulfillment_status.clone().unwrap_or_default()),
    );
    order_props.insert("hs_payment_status".to_owned(), json!(payment_status));
    order_props.insert("hs_total_price".to_owned(), json!(money_str(&order.grand_total)));
    order_props.insert("hs_subtotal_price".to_owned(), json!(money_str(&order.subtotal)));
    order_props.insert(
        "hs_shipping_cost".to_owned(),
        json!(money_str(&first_shipping_line.amount)),
    );
    order_props.insert("hs_tax".to_owned(), json!(money_str(&order.tax_total)));
    order_props.insert(
        "hs_refund_amount".to_owned(),
        json!(money_str(&order.refunded_total)),
    );
    order_props.insert(
        "hs_order_discount".to_owned(),
        json!(money_str(&order.discount_total)),
    );
    order_props.insert("hs_discount_codes".to_owned(), json!(discount_codes));
    order_props.insert(
        "sqsp_shipping_method".to_owned(),
        json!(first_shipping_line.method.clone().unwrap_or_default()),
    );
    order_props.insert(
        "sqsp_fulfilled_at".to_owned(),
        json!(first_fulfillment
            .ship_date
            .map(|d| d.to_rfc3339())
            .unwrap_or_default()),
    );
    order_props.insert("sqsp_paid_at".to_owned(), json!(created_iso));
    order_props.insert(
        "channel_type".to_owned(),
        json!(order.channel.clone().unwrap_or_default()),
    );
    order_props.insert(
        "channel_name".to_owned(),
        json!(order.channel_name.clone().unwrap_or_default()),
    );
    order_props.insert("channel_order_number".to_owned(), json!(order.id));
    order_props.insert("sqsp_private_notes".to_owned(), json!(private_notes));
    order_props.insert(
        "checkout_form_note_additional_info".to_owned(),
        json!(form_note),
    );
    order_props.insert("sqsp_checkout_form_checkbox".to_owned(), json!(form_checkbox));
    insert_address(&mut order_props, "hs_billing_address", "billing_address2", &billing);
    insert_address(
        &mut order_props,
        "hs_shipping_address",
        "sqsp_shipping_address2",
        &shipping,
    );

    let mut deal_props = Map::new();
    deal_props.insert("dealname".to_owned(), json!(deal_name));
    deal_props.insert("closedate".to_owned(), json!(created_iso));
    deal_props.insert("amount".to_owned(), json!(money_str(&order.grand_total)));
    deal_props.insert("pipeline".to_owned(), json!(pipeline_id));
    deal_props.insert("dealstage".to_owned(), json!(deal_stage));
    deal_props.insert(
        "shipping_cost".to_owned(),
        json!(money_str(&first_shipping_line.amount)),
    );
    deal_props.insert("tax".to_owned(), json!(money_str(&order.tax_total)));
    deal_props.insert(
        "refund_amount".to_owned(),
        json!(money_str(&order.refunded_total)),
    );

    let line_items = order
        .line_items
        .iter()
        .map(|item| {
            let price_str = item
                .unit_price_paid
                .as_ref()
                .map(|m| m.value.clone())
                .unwrap_or_default();
            let variant = item
                .variant_options
                .iter()
                .filter_map(|v| v.value.clone())
                .collect::<Vec<_>>()
                .join(", ");

            let mut props = Map::new();
            props.insert(
                "name".to_owned(),
                json!(item.product_name.clone().unwrap_or_default()),
            );
            props.insert("price".to_owned(), json!(price_str));
            props.insert(
                "quantity".to_owned(),
                item.quantity.map(|q| json!(q)).unwrap_or(json!("")),
            );
            props.insert(
                "hs_sku".to_owned(),
                json!(item.sku.clone().unwrap_or_default()),
            );
            props.insert("sqsp_lineitm_variant".to_owned(), json!(variant));

            MappedLineItem {
                temporary_id: item.id.clone(),
                price: price_str.parse().unwrap_or(0.0),
                properties: props,
            }
        })
        .collect();

    MappedOrder {
        temporary_id: order.id.clone(),
        external_order_id: order_number,
        deal_name,
        order: order_props,
        deal: deal_props,
        line_items,
    }
}

fn money_str(money: &Option<Money>) -> String {
    money.as_ref().map(|m| m.value.clone()).unwrap_or_default()
}

fn money_f64(money: &Option<Money>) -> f64 {
    money
        .as_ref()
        .and_then(|m| m.value.parse().ok())
        .unwrap_or(0.0)
}

fn form_value(order: &Order, label: &str) -> String {
    order
        .form_submission
        .iter()
        .find(|f| f.label.as_deref() == Some(label))
        .and_then(|f| f.value.clone())
        .unwrap_or_default()
}

fn insert_address(props: &mut Map<String, Value>, prefix: &str, line2_key: &str, addr: &OrderAddress) {
    let name = [addr.first_name.as_deref(), addr.last_name.as_deref()]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    props.insert(format!("{prefix}_name"), json!(name));
    props.insert(
        format!("{prefix}_street"),
        json!(addr.address1.clone().unwrap_or_default()),
    );
    props.insert(
        line2_key.to_owned(),
        json!(addr.address2.clone().unwrap_or_default()),
    );
    props.insert(
        format!("{prefix}_city"),
        json!(addr.city.clone().unwrap_or_default()),
    );
    props.insert(
        format!("{prefix}_postal_code"),
        json!(addr.postal_code.clone().unwrap_or_default()),
    );
    props.insert(
        format!("{prefix}_state"),
        json!(addr.state.clone().unwrap_or_default()),
    );
    props.insert(
        format!("{prefix}_country"),
        json!(addr.country_code.clone().unwrap_or_default()),
    );
    props.insert(
        format!("{prefix}_phone"),
        json!(addr.phone.clone().unwrap_or_default()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_json(body: serde_json::Value) -> Order {
        serde_json::from_value(body).unwrap()
    }

    fn sample_order() -> Order {
        order_json(serde_json::json!({
            "id": "ord-1",
            "orderNumber": "1024",
            "customerEmail": "jane@example.com",
            "createdOn": "2026-02-14T10:00:00Z",
            "grandTotal": {"value": "100.00"},
            "refundedTotal": {"value": "0.00"},
            "billingAddress": {"firstName": "Jane", "lastName": "Doe"},
            "lineItems": [
                {
                    "id": "li-1",
                    "productName": "Widget",
                    "sku": "W-1",
                    "quantity": 2,
                    "unitPricePaid": {"value": "25.00"},
                    "variantOptions": [
                        {"optionName": "Color", "value": "Red"},
                        {"optionName": "Size", "value": "L"}
                    ]
                },
                {
                    "id": "li-2",
                    "productName": "Free sticker",
                    "unitPricePaid": {"value": "0.00"}
                }
            ]
        }))
    }

    #[test]
    fn deal_name_combines_date_names_and_order_number() {
        let mapped = map_order(&sample_order(), "pipe-1", "stage-1");
        assert_eq!(mapped.deal_name, "2026-02-14 Jane Doe 1024");
        assert_eq!(mapped.deal["dealname"], "2026-02-14 Jane Doe 1024");
        assert_eq!(mapped.deal["pipeline"], "pipe-1");
        assert_eq!(mapped.deal["dealstage"], "stage-1");
    }

    #[test]
    fn payment_status_reflects_refund_ratio() {
        let paid = map_order(&sample_order(), "p", "s");
        assert_eq!(paid.order["hs_payment_status"], "Paid");

        let mut partially = sample_order();
        partially.refunded_total = Some(Money {
            value: "10.00".to_owned(),
        });
        assert_eq!(
            map_order(&partially, "p", "s").order["hs_payment_status"],
            "Partial Refund"
        );

        let mut refunded = sample_order();
        refunded.refunded_total = Some(Money {
            value: "100.00".to_owned(),
        });
        assert_eq!(
            map_order(&refunded, "p", "s").order["hs_payment_status"],
            "Refunded"
        );
    }

    #[test]
    fn line_items_carry_parsed_prices_and_joined_variants() {
        let mapped = map_order(&sample_order(), "p", "s");
        assert_eq!(mapped.line_items.len(), 2);

        let widget = &mapped.line_items[0];
        assert_eq!(widget.price, 25.0);
        assert_eq!(widget.properties["price"], "25.00");
        assert_eq!(widget.properties["sqsp_lineitm_variant"], "Red, L");

        let sticker = &mapped.line_items[1];
        assert_eq!(sticker.price, 0.0);
    }

    #[test]
    fn order_bag_keys_the_external_order_id() {
        let mapped = map_order(&sample_order(), "p", "s");
        assert_eq!(mapped.external_order_id, "1024");
        assert_eq!(mapped.order["hs_external_order_id"], "1024");
        assert_eq!(mapped.order["hs_order_name"], "SQSP-1024");
        assert_eq!(mapped.order["channel_order_number"], "ord-1");
    }
}
