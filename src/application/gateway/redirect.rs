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
use serde::Deserialize;
use serde_json::json;

const PREFIX: &str = "RD";

/// Hosted-cashier provider: the buyer is sent to a gateway URL.
pub struct RedirectGateway {
    endpoint: ProviderEndpoint,
    transport: ProviderTransportRef,
}

#[derive(Debug, Deserialize)]
struct RedirectNotify {
    out_trade_no: String,
    trade_no: Option<String>,
    trade_status: String,
}

impl RedirectGateway {
    pub fn new(endpoint: ProviderEndpoint, transport: ProviderTransportRef) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

#[async_trait]
impl PaymentGateway for RedirectGateway {
    fn variant(&self) -> ProviderVariant {
        ProviderVariant::Redirect
    }

    async fn initiate(&self, order: &Order, attempt: &PaymentAttempt) -> Result<Initiation> {
        let reference = merchant_reference(PREFIX, order.id, attempt.id);
        let payload = json!({
            "out_trade_no": reference,
            "total_amount": order.total.to_string(),
            "subject": format!("Order {}", order.id),
            "product_code": "FAST_INSTANT_TRADE_PAY",
            "return_url": self.endpoint.return_url,
            "notify_url": self.endpoint.notify_url,
        });

        let reply = self
            .transport
            .call(self.variant(), &self.endpoint.endpoint, payload.clone())
            .await?;
        let url = reply["body"].as_str().ok_or_else(|| {
            OrderError::ProviderUnavailable(format!(
                "redirect provider reply missing body: {reply}"
            ))
        })?;

        Ok(Initiation {
            request: ProviderRequest {
                provider_reference: reference,
                display_payload: DisplayPayload::Redirect {
                    url: url.to_string(),
                },
                kind: self.variant(),
            },
            payload,
        })
    }

    fn parse_callback(&self, body: &[u8]) -> Result<ConfirmationEvent> {
        let notify: RedirectNotify =
            serde_json::from_slice(body).map_err(|e| malformed(self.variant(), e))?;
        let (order_id, _) = parse_merchant_reference(PREFIX, &notify.out_trade_no)
            .ok_or_else(|| {
                malformed(
                    self.variant(),
                    format!("bad out_trade_no {}", notify.out_trade_no),
                )
            })?;

        let outcome = match notify.trade_status.as_str() {
            "TRADE_SUCCESS" | "TRADE_FINISHED" => CallbackOutcome::Confirmed,
            "TRADE_CLOSED" => CallbackOutcome::Cancelled,
            _ => CallbackOutcome::Malformed,
        };
        Ok(ConfirmationEvent {
            order_id,
            provider_reference: notify.out_trade_no,
            outcome,
            provider_transaction: notify.trade_no,
        })
    }
}
