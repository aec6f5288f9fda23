use crate::domain::{AttemptId, OrderId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The external payment providers the store can hand a buyer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderVariant {
    /// Buyer is redirected to a hosted cashier page.
    Redirect,
    /// Buyer scans a code rendered from the provider's payload.
    QrCode,
    /// Buyer approves the payment inside the provider's own flow.
    DelegatedApproval,
}

impl ProviderVariant {
    pub const ALL: [ProviderVariant; 3] = [
        ProviderVariant::Redirect,
        ProviderVariant::QrCode,
        ProviderVariant::DelegatedApproval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderVariant::Redirect => "redirect",
            ProviderVariant::QrCode => "qr_code",
            ProviderVariant::DelegatedApproval => "delegated_approval",
        }
    }
}

impl fmt::Display for ProviderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redirect" => Ok(ProviderVariant::Redirect),
            "qr_code" => Ok(ProviderVariant::QrCode),
            "delegated_approval" => Ok(ProviderVariant::DelegatedApproval),
            other => Err(format!("unknown payment provider '{other}'")),
        }
    }
}

/// What the storefront needs to show the buyer. Provider-specific fields live
/// here and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayPayload {
    Redirect { url: String },
    QrCode { code_url: String },
    Approval { approve_url: String },
}

/// Normalized result of initiating a payment with any provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub provider_reference: String,
    pub display_payload: DisplayPayload,
    pub kind: ProviderVariant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Initiated,
    Confirmed,
    Cancelled,
    TimedOut,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Initiated)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptStatus::Initiated => "initiated",
            AttemptStatus::Confirmed => "confirmed",
            AttemptStatus::Cancelled => "cancelled",
            AttemptStatus::TimedOut => "timed_out",
            AttemptStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: AttemptId,
    pub order_id: OrderId,
    pub provider: ProviderVariant,
    /// The request body sent to the provider, kept for audit.
    pub request_payload: Option<serde_json::Value>,
    pub provider_reference: Option<String>,
    /// The provider's own id for the payment, once a callback carried one.
    #[serde(default)]
    pub provider_transaction: Option<String>,
    pub request: Option<ProviderRequest>,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn new(id: AttemptId, order_id: OrderId, provider: ProviderVariant) -> Self {
        let now = Utc::now();
        Self {
            id,
            order_id,
            provider,
            request_payload: None,
            provider_reference: None,
            provider_transaction: None,
            request: None,
            status: AttemptStatus::Initiated,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: AttemptStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Confirmed,
    Cancelled,
    /// Identifiers parsed but the provider status is not one we act on.
    Malformed,
}

/// Provider-agnostic notification produced by a gateway's callback parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationEvent {
    pub order_id: OrderId,
    pub provider_reference: String,
    pub outcome: CallbackOutcome,
    /// Provider-side transaction id, when the provider sends one.
    pub provider_transaction: Option<String>,
}

/// A callback exactly as it arrived from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCallback {
    pub body: Vec<u8>,
    /// Signature header value, `t=<unix>,v1=<hex>`.
    pub signature: Option<String>,
}

impl RawCallback {
    pub fn new(body: impl Into<Vec<u8>>, signature: Option<String>) -> Self {
        Self {
            body: body.into(),
            signature,
        }
    }
}
