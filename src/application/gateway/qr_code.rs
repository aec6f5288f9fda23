use super::{Initiation, PaymentGateway, malformed, merchant_reference, parse_merchant_reference};
use crate::config::ProviderEndpoint;
use crate::domain::order::Order;
use crate::domain::payment::{
    CallbackOutcome, ConfirmationEvent, DisplayPayload, PaymentAttempt, ProviderRequest,
    ProviderVariant,
};
use crate::domain::ports::ProviderTransportRef;
use crate::error::{OrderError, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::json;

const PREFIX: &str = "QR";

/// Native-QR provider: the storefront renders `code_url` for the buyer to scan.
pub struct QrCodeGateway {
    endpoint: ProviderEndpoint,
    transport: ProviderTransportRef,
}

#[derive(Debug, Deserialize)]
struct QrNotify {
    resource: QrResource,
}

#[derive(Debug, Deserialize)]
struct QrResource {
    out_trade_no: String,
    transaction_id: Option<String>,
    trade_state: String,
}

impl QrCodeGateway {
    pub fn new(endpoint: ProviderEndpoint, transport: ProviderTransportRef) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

#[async_trait]
impl PaymentGateway for QrCodeGateway {
    fn variant(&self) -> ProviderVariant {
        ProviderVariant::QrCode
    }

    async fn initiate(&self, order: &Order, attempt: &PaymentAttempt) -> Result<Initiation> {
        let reference = merchant_reference(PREFIX, order.id, attempt.id);
        // This provider takes amounts in minor units.
        let minor_units = (order.total.value() * rust_decimal::Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| OrderError::internal(format!("order {} total out of range", order.id)))?;
        let payload = json!({
            "out_trade_no": reference,
            "description": format!("Order {}", order.id),
            "notify_url": self.endpoint.notify_url,
            "amount": { "total": minor_units, "currency": "CNY" },
        });

        let reply = self
            .transport
            .call(self.variant(), &self.endpoint.endpoint, payload.clone())
            .await?;
        let code_url = reply["code_url"].as_str().ok_or_else(|| {
            OrderError::ProviderUnavailable(format!("qr provider reply missing code_url: {reply}"))
        })?;

        Ok(Initiation {
            request: ProviderRequest {
                provider_reference: reference,
                display_payload: DisplayPayload::QrCode {
                    code_url: code_url.to_string(),
                },
                kind: self.variant(),
            },
            payload,
        })
    }

    fn parse_callback(&self, body: &[u8]) -> Result<ConfirmationEvent> {
        let notify: QrNotify =
            serde_json::from_slice(body).map_err(|e| malformed(self.variant(), e))?;
        let resource = notify.resource;
        let (order_id, _) = parse_merchant_reference(PREFIX, &resource.out_trade_no).ok_or_else(|| {
            malformed(self.variant(), format!("bad out_trade_no {}", resource.out_trade_no))
        })?;

        let outcome = match resource.trade_state.as_str() {
            "SUCCESS" => CallbackOutcome::Confirmed,
            "CLOSED" | "REVOKED" | "PAYERROR" => CallbackOutcome::Cancelled,
            _ => CallbackOutcome::Malformed,
        };
        Ok(ConfirmationEvent {
            order_id,
            provider_reference: resource.out_trade_no,
            outcome,
            provider_transaction: resource.transaction_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::domain::money::UnitPrice;
    use crate::domain::order::LineItem;
    use crate::infrastructure::sandbox::SandboxProvider;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn gateway() -> QrCodeGateway {
        QrCodeGateway::new(
            ProviderSettings::sandbox().qr_code,
            Arc::new(SandboxProvider::new()),
        )
    }

    #[tokio::test]
    async fn test_initiate_returns_code_url_in_minor_units() {
        let line = LineItem {
            product_id: 1,
            quantity: 3,
            unit_price: UnitPrice::new(1, dec!(0.35)).unwrap(),
        };
        let order = Order::new(8, 1, vec![line]);
        let attempt = PaymentAttempt::new(1, 8, ProviderVariant::QrCode);
        let initiation = gateway().initiate(&order, &attempt).await.unwrap();

        assert_eq!(initiation.payload["amount"]["total"], 105);
        assert_eq!(initiation.request.provider_reference, "QR8-1");
        assert!(matches!(
            initiation.request.display_payload,
            DisplayPayload::QrCode { ref code_url } if code_url.starts_with("weixin://")
        ));
    }

    #[test]
    fn test_parse_callback() {
        let gw = gateway();
        let body = br#"{"event_type":"TRANSACTION.SUCCESS","resource":{"out_trade_no":"QR8-1","transaction_id":"42","trade_state":"SUCCESS"}}"#;
        let event = gw.parse_callback(body).unwrap();
        assert_eq!((event.order_id, event.outcome), (8, CallbackOutcome::Confirmed));

        let revoked = br#"{"resource":{"out_trade_no":"QR8-1","trade_state":"REVOKED"}}"#;
        assert_eq!(gw.parse_callback(revoked).unwrap().outcome, CallbackOutcome::Cancelled);
    }

    #[test]
    fn test_missing_resource_is_malformed() {
        assert!(matches!(
            gateway().parse_callback(br#"{"event_type":"TRANSACTION.SUCCESS"}"#),
            Err(OrderError::MalformedCallback(_))
        ));
    }
}
