//! An in-process stand-in for the three payment providers.
//!
//! `SandboxProvider` answers initiation calls with replies shaped like the
//! real providers' and can be told to stall or fail per variant. The callback
//! helpers build the bodies those providers would post back, signed the way
//! `CallbackVerifier` expects.

use crate::application::gateway::signature;
use crate::domain::OrderId;
use crate::domain::payment::{CallbackOutcome, ProviderVariant, RawCallback};
use crate::domain::ports::ProviderTransport;
use crate::error::{OrderError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SandboxProvider {
    latency: Option<Duration>,
    failing: HashSet<ProviderVariant>,
    issued: AtomicU64,
}

impl SandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Calls for `variant` are refused.
    pub fn failing(mut self, variant: ProviderVariant) -> Self {
        self.failing.insert(variant);
        self
    }

    pub fn calls(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderTransport for SandboxProvider {
    async fn call(&self, variant: ProviderVariant, endpoint: &str, body: Value) -> Result<Value> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.contains(&variant) {
            return Err(OrderError::ProviderUnavailable(format!(
                "{variant} sandbox refused the request"
            )));
        }
        debug!(%variant, endpoint, call = n, "sandbox provider call");

        let reply = match variant {
            ProviderVariant::Redirect => {
                let reference = field(&body, "out_trade_no")?;
                let amount = field(&body, "total_amount")?;
                json!({
                    "body": format!("{endpoint}?out_trade_no={reference}&total_amount={amount}"),
                })
            }
            ProviderVariant::QrCode => {
                let reference = field(&body, "out_trade_no")?;
                json!({ "code_url": format!("weixin://wxpay/bizpayurl?pr={reference}") })
            }
            ProviderVariant::DelegatedApproval => {
                let id = format!("PAYID-{n:08}");
                json!({
                    "id": id,
                    "status": "CREATED",
                    "links": [
                        { "rel": "self", "href": format!("{endpoint}/{id}") },
                        {
                            "rel": "approve",
                            "href": format!("https://www.sandbox.example/checkoutnow?token={id}"),
                        },
                    ],
                })
            }
        };
        Ok(reply)
    }
}

fn field<'a>(body: &'a Value, name: &str) -> Result<&'a str> {
    body[name]
        .as_str()
        .ok_or_else(|| OrderError::ProviderUnavailable(format!("request is missing {name}")))
}

/// The body `variant` would post for `reference` with the given outcome.
/// `Malformed` produces a well-formed body carrying a status the engine does
/// not act on.
pub fn callback_body(
    variant: ProviderVariant,
    order_id: OrderId,
    reference: &str,
    outcome: CallbackOutcome,
) -> Vec<u8> {
    let body = match variant {
        ProviderVariant::Redirect => {
            let status = match outcome {
                CallbackOutcome::Confirmed => "TRADE_SUCCESS",
                CallbackOutcome::Cancelled => "TRADE_CLOSED",
                CallbackOutcome::Malformed => "WAIT_BUYER_PAY",
            };
            json!({
                "out_trade_no": reference,
                "trade_no": format!("2026{order_id:012}"),
                "trade_status": status,
            })
        }
        ProviderVariant::QrCode => {
            let state = match outcome {
                CallbackOutcome::Confirmed => "SUCCESS",
                CallbackOutcome::Cancelled => "CLOSED",
                CallbackOutcome::Malformed => "NOTPAY",
            };
            json!({
                "event_type": "TRANSACTION.SUCCESS",
                "resource": {
                    "out_trade_no": reference,
                    "transaction_id": format!("4200{order_id:010}"),
                    "trade_state": state,
                },
            })
        }
        ProviderVariant::DelegatedApproval => {
            let event = match outcome {
                CallbackOutcome::Confirmed => "PAYMENT.CAPTURE.COMPLETED",
                CallbackOutcome::Cancelled => "CHECKOUT.ORDER.VOIDED",
                CallbackOutcome::Malformed => "CHECKOUT.ORDER.SAVED",
            };
            json!({
                "event_type": event,
                "resource": {
                    "id": reference,
                    "purchase_units": [{ "reference_id": order_id.to_string() }],
                },
            })
        }
    };
    body.to_string().into_bytes()
}

/// Signs `body` with `secret` as of now.
pub fn signed_callback(secret: &str, body: Vec<u8>) -> Result<RawCallback> {
    let header = signature::sign(secret, Utc::now().timestamp(), &body)?;
    Ok(RawCallback::new(body, Some(header)))
}
