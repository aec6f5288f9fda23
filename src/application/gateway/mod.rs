//! Payment provider adapters.
//!
//! Each variant turns an order into a provider request and a provider
//! callback into a `ConfirmationEvent`. Everything provider-specific stays
//! behind `PaymentGateway`; the coordinator and the state machine only ever
//! see the normalized shapes.

pub mod approval;
pub mod qr_code;
pub mod redirect;
pub mod signature;

use crate::config::EngineConfig;
use crate::domain::order::Order;
use crate::domain::payment::{
    ConfirmationEvent, PaymentAttempt, ProviderRequest, ProviderVariant, RawCallback,
};
use crate::domain::ports::ProviderTransportRef;
use crate::domain::{AttemptId, OrderId};
use crate::error::{OrderError, Result};
use async_trait::async_trait;
use signature::CallbackVerifier;
use std::collections::HashMap;
use std::sync::Arc;

/// A started payment: the normalized request plus the body that went out.
#[derive(Debug, Clone)]
pub struct Initiation {
    pub request: ProviderRequest,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn variant(&self) -> ProviderVariant;

    /// Builds the provider request for `attempt` and sends it.
    async fn initiate(&self, order: &Order, attempt: &PaymentAttempt) -> Result<Initiation>;

    /// Maps a verified callback body onto an order/attempt pair.
    fn parse_callback(&self, body: &[u8]) -> Result<ConfirmationEvent>;
}

/// The configured gateways, one per variant, each with its own verifier.
pub struct GatewayRegistry {
    gateways: HashMap<ProviderVariant, (Arc<dyn PaymentGateway>, CallbackVerifier)>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            gateways: HashMap::new(),
        }
    }

    /// All three variants wired to `transport` with the endpoints in `config`.
    pub fn from_config(config: &EngineConfig, transport: ProviderTransportRef) -> Self {
        let providers = &config.providers;
        let mut registry = Self::new();
        registry.register(
            Arc::new(redirect::RedirectGateway::new(
                providers.redirect.clone(),
                transport.clone(),
            )),
            CallbackVerifier::new(&providers.redirect.callback_secret, config.signature_tolerance),
        );
        registry.register(
            Arc::new(qr_code::QrCodeGateway::new(
                providers.qr_code.clone(),
                transport.clone(),
            )),
            CallbackVerifier::new(&providers.qr_code.callback_secret, config.signature_tolerance),
        );
        registry.register(
            Arc::new(approval::ApprovalGateway::new(
                providers.delegated_approval.clone(),
                transport,
            )),
            CallbackVerifier::new(
                &providers.delegated_approval.callback_secret,
                config.signature_tolerance,
            ),
        );
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>, verifier: CallbackVerifier) {
        self.gateways.insert(gateway.variant(), (gateway, verifier));
    }

    pub fn get(&self, variant: ProviderVariant) -> Result<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&variant)
            .map(|(gateway, _)| gateway.clone())
            .ok_or_else(|| OrderError::ProviderUnavailable(format!("{variant} is not configured")))
    }

    /// Checks provenance, then parses. Nothing is parsed from an untrusted body.
    pub fn verify_and_parse(
        &self,
        variant: ProviderVariant,
        raw: &RawCallback,
    ) -> Result<ConfirmationEvent> {
        let (gateway, verifier) = self.gateways.get(&variant).ok_or_else(|| {
            OrderError::UntrustedCallback(format!("no gateway configured for {variant}"))
        })?;
        verifier.verify(&raw.body, raw.signature.as_deref())?;
        gateway.parse_callback(&raw.body)
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Merchant-side reference used by variants that let the merchant name the
/// payment: `<prefix><order>-<attempt>`.
pub(crate) fn merchant_reference(prefix: &str, order_id: OrderId, attempt_id: AttemptId) -> String {
    format!("{prefix}{order_id}-{attempt_id}")
}

pub(crate) fn parse_merchant_reference(
    prefix: &str,
    reference: &str,
) -> Option<(OrderId, AttemptId)> {
    let (order, attempt) = reference.strip_prefix(prefix)?.split_once('-')?;
    Some((order.parse().ok()?, attempt.parse().ok()?))
}

pub(crate) fn malformed(variant: ProviderVariant, detail: impl std::fmt::Display) -> OrderError {
    OrderError::MalformedCallback(format!("{variant}: {detail}"))
}
