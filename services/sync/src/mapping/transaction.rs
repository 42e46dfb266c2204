use crate::commerce::models::TransactionDocument;

/// Payment facts pulled from a transaction document, keyed by the order
/// they settle. Only the first payment on a document is considered.
#[derive(Debug, Clone)]
pub struct MappedPayment {
    pub related_order_id: Option<String>,
    pub payment_reference: String,
    pub processing_method: String,
}

pub fn map_transaction(doc: &TransactionDocument) -> MappedPayment {
    let first_payment = doc.payments.first();
    MappedPayment {
        related_order_id: doc.sales_order_id.clone(),
        payment_reference: first_payment
            .and_then(|p| p.external_transaction_id.clone())
            .unwrap_or_default(),
        processing_method: first_payment
            .and_then(|p| p.provider.clone())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_first_payment_only() {
        let doc: TransactionDocument = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "salesOrderId": "ord-1",
            "payments": [
                {"provider": "STRIPE", "externalTransactionId": "ch_1"},
                {"provider": "PAYPAL", "externalTransactionId": "pp_2"}
            ]
        }))
        .unwrap();

        let payment = map_transaction(&doc);
        assert_eq!(payment.related_order_id.as_deref(), Some("ord-1"));
        assert_eq!(payment.payment_reference, "ch_1");
        assert_eq!(payment.processing_method, "STRIPE");
    }

    #[test]
    fn missing_payments_map_to_blanks() {
        let doc: TransactionDocument =
            serde_json::from_value(serde_json::json!({"id": "t2"})).unwrap();

        let payment = map_transaction(&doc);
        assert_eq!(payment.related_order_id, None);
        assert_eq!(payment.payment_reference, "");
        assert_eq!(payment.processing_method, "");
    }
}
