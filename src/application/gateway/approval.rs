use super::{Initiation, PaymentGateway, malformed};
use crate::config::ProviderEndpoint;
use crate::domain::order::Order;
use crate::domain::payment::{
    CallbackOutcome, ConfirmationEvent, DisplayPayload, PaymentAttempt, ProviderRequest,
    ProviderVariant,
};
use crate::domain::ports::ProviderTransportRef;
use crate::error::{OrderError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// Delegated-approval provider: the provider names the payment and hands back
/// an approval link the buyer follows.
pub struct ApprovalGateway {
    endpoint: ProviderEndpoint,
    transport: ProviderTransportRef,
}

#[derive(Debug, Deserialize)]
struct ApprovalReply {
    id: String,
    #[serde(default)]
    links: Vec<ApprovalLink>,
}

#[derive(Debug, Deserialize)]
struct ApprovalLink {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct ApprovalWebhook {
    event_type: String,
    resource: WebhookResource,
}

#[derive(Debug, Deserialize)]
struct WebhookResource {
    id: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    reference_id: Option<String>,
}

impl ApprovalGateway {
    pub fn new(endpoint: ProviderEndpoint, transport: ProviderTransportRef) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

#[async_trait]
impl PaymentGateway for ApprovalGateway {
    fn variant(&self) -> ProviderVariant {
        ProviderVariant::DelegatedApproval
    }

    async fn initiate(&self, order: &Order, attempt: &PaymentAttempt) -> Result<Initiation> {
        let payload = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": order.id.to_string(),
                "custom_id": attempt.id.to_string(),
                "amount": { "currency_code": "CNY", "value": order.total.to_string() },
            }],
            "application_context": {
                "return_url": self.endpoint.return_url,
                "cancel_url": self.endpoint.return_url.replace("success", "cancel"),
            },
        });

        let reply = self
            .transport
            .call(self.variant(), &self.endpoint.endpoint, payload.clone())
            .await?;
        let reply: ApprovalReply = serde_json::from_value(reply).map_err(|e| {
            OrderError::ProviderUnavailable(format!("approval provider reply unreadable: {e}"))
        })?;
        let approve_url = reply
            .links
            .into_iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href)
            .ok_or_else(|| {
                OrderError::ProviderUnavailable(
                    "approval provider reply has no approve link".to_string(),
                )
            })?;

        Ok(Initiation {
            request: ProviderRequest {
                provider_reference: reply.id,
                display_payload: DisplayPayload::Approval { approve_url },
                kind: self.variant(),
            },
            payload,
        })
    }

    fn parse_callback(&self, body: &[u8]) -> Result<ConfirmationEvent> {
        let webhook: ApprovalWebhook =
            serde_json::from_slice(body).map_err(|e| malformed(self.variant(), e))?;
        let order_id = webhook
            .resource
            .purchase_units
            .iter()
            .find_map(|unit| unit.reference_id.as_deref())
            .and_then(|reference| reference.parse().ok())
            .ok_or_else(|| malformed(self.variant(), "no purchase unit names an order"))?;

        let outcome = match webhook.event_type.as_str() {
            "CHECKOUT.ORDER.APPROVED"
            | "CHECKOUT.ORDER.COMPLETED"
            | "PAYMENT.CAPTURE.COMPLETED" => {
                CallbackOutcome::Confirmed
            }
            "CHECKOUT.ORDER.VOIDED" | "PAYMENT.CAPTURE.DENIED" => CallbackOutcome::Cancelled,
            _ => CallbackOutcome::Malformed,
        };
        Ok(ConfirmationEvent {
            order_id,
            provider_reference: webhook.resource.id,
            outcome,
            provider_transaction: None,
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

    fn gateway() -> ApprovalGateway {
        ApprovalGateway::new(
            ProviderSettings::sandbox().delegated_approval,
            Arc::new(SandboxProvider::new()),
        )
    }

    #[tokio::test]
    async fn test_initiate_adopts_provider_reference() {
        let line = LineItem {
            product_id: 1,
            quantity: 1,
            unit_price: UnitPrice::new(1, dec!(20)).unwrap(),
        };
        let order = Order::new(3, 1, vec![line]);
        let attempt = PaymentAttempt::new(1, 3, ProviderVariant::DelegatedApproval);
        let initiation = gateway().initiate(&order, &attempt).await.unwrap();

        assert!(initiation.request.provider_reference.starts_with("PAYID-"));
        assert!(matches!(
            initiation.request.display_payload,
            DisplayPayload::Approval { ref approve_url } if approve_url.contains("token=")
        ));
        assert_eq!(initiation.payload["purchase_units"][0]["reference_id"], "3");
    }

    #[test]
    fn test_parse_webhook() {
        let gw = gateway();
        let body = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED","resource":{"id":"PAYID-1","purchase_units":[{"reference_id":"3"}]}}"#;
        let event = gw.parse_callback(body).unwrap();
        assert_eq!(event.order_id, 3);
        assert_eq!(event.provider_reference, "PAYID-1");
        assert_eq!(event.outcome, CallbackOutcome::Confirmed);

        let voided = br#"{"event_type":"CHECKOUT.ORDER.VOIDED","resource":{"id":"PAYID-1","purchase_units":[{"reference_id":"3"}]}}"#;
        assert_eq!(gw.parse_callback(voided).unwrap().outcome, CallbackOutcome::Cancelled);
    }

    #[test]
    fn test_webhook_without_order_is_malformed() {
        let body = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED","resource":{"id":"PAYID-1"}}"#;
        assert!(matches!(
            gateway().parse_callback(body),
            Err(OrderError::MalformedCallback(_))
        ));
    }
}
