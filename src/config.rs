use crate::domain::payment::ProviderVariant;
use crate::error::{OrderError, Result};
use std::str::FromStr;
use std::time::Duration;

/// Where the engine runs. Only the sandbox may fall back to the built-in,
/// publicly known callback secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Live,
    Sandbox,
}

impl FromStr for Environment {
    type Err = OrderError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "live" => Ok(Environment::Live),
            "sandbox" => Ok(Environment::Sandbox),
            other => Err(OrderError::InvalidConfig(format!("unknown environment '{other}'"))),
        }
    }
}

/// Endpoint and credentials for one provider variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub endpoint: String,
    /// Shared secret used to verify callback signatures.
    pub callback_secret: String,
    pub return_url: String,
    pub notify_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub redirect: ProviderEndpoint,
    pub qr_code: ProviderEndpoint,
    pub delegated_approval: ProviderEndpoint,
}

impl ProviderSettings {
    pub fn for_variant(&self, variant: ProviderVariant) -> &ProviderEndpoint {
        match variant {
            ProviderVariant::Redirect => &self.redirect,
            ProviderVariant::QrCode => &self.qr_code,
            ProviderVariant::DelegatedApproval => &self.delegated_approval,
        }
    }

    /// Sandbox endpoints and their published test secrets.
    pub fn sandbox() -> Self {
        Self {
            redirect: ProviderEndpoint {
                endpoint: "https://openapi.sandbox.example/gateway.do".to_string(),
                callback_secret: "redirect-sandbox-secret".to_string(),
                return_url: "http://localhost:5173/payment/success".to_string(),
                notify_url: "http://localhost:8787/api/payments/notify/redirect".to_string(),
            },
            qr_code: ProviderEndpoint {
                endpoint: "https://api.sandbox.example/v3/pay/transactions/native".to_string(),
                callback_secret: "qr-sandbox-secret".to_string(),
                return_url: String::new(),
                notify_url: "http://localhost:8787/api/payments/notify/qr_code".to_string(),
            },
            delegated_approval: ProviderEndpoint {
                endpoint: "https://api-m.sandbox.example/v2/checkout/orders".to_string(),
                callback_secret: "approval-sandbox-secret".to_string(),
                return_url: "http://localhost:5173/payment/success".to_string(),
                notify_url: "http://localhost:8787/api/payments/notify/delegated_approval"
                    .to_string(),
            },
        }
    }
}

/// Runtime knobs of the order engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long an attempt may stay `initiated` before the sweep times it out.
    pub payment_timeout: Duration,
    /// Period of the background timeout sweep.
    pub sweep_interval: Duration,
    /// Upper bound on one outbound provider call.
    pub provider_timeout: Duration,
    /// Upper bound on handling one inbound confirmation event.
    pub event_timeout: Duration,
    /// Maximum age of a callback signature timestamp.
    pub signature_tolerance: Duration,
    pub providers: ProviderSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(30),
            provider_timeout: Duration::from_secs(10),
            event_timeout: Duration::from_secs(5),
            signature_tolerance: Duration::from_secs(300),
            providers: ProviderSettings::sandbox(),
        }
    }
}

impl EngineConfig {
    /// Reads `ORDERFLOW_*` variables over the defaults.
    ///
    /// Unparseable values are errors. Outside the sandbox every provider
    /// needs its own non-empty `ORDERFLOW_<PROVIDER>_SECRET`.
    pub fn from_env(environment: Environment) -> Result<Self> {
        Self::from_lookup(environment, |name| std::env::var(name).ok())
    }

    /// `from_env` over an arbitrary variable source.
    pub fn from_lookup(
        environment: Environment,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| -> Result<Duration> {
            match lookup(name) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    OrderError::InvalidConfig(format!("{name} must be whole seconds, got '{raw}'"))
                }),
            }
        };
        let endpoint = |prefix: &str, default: ProviderEndpoint| -> Result<ProviderEndpoint> {
            let var = |field: &str| lookup(&format!("ORDERFLOW_{prefix}_{field}"));
            let secret_var = format!("ORDERFLOW_{prefix}_SECRET");
            let callback_secret = match (lookup(&secret_var), environment) {
                (Some(secret), _) if secret.trim().is_empty() => {
                    return Err(OrderError::InvalidConfig(format!("{secret_var} is empty")));
                }
                (Some(secret), _) => secret,
                (None, Environment::Sandbox) => default.callback_secret,
                (None, Environment::Live) => {
                    return Err(OrderError::InvalidConfig(format!(
                        "{secret_var} is required outside the sandbox"
                    )));
                }
            };
            Ok(ProviderEndpoint {
                endpoint: var("ENDPOINT").unwrap_or(default.endpoint),
                callback_secret,
                return_url: var("RETURN_URL").unwrap_or(default.return_url),
                notify_url: var("NOTIFY_URL").unwrap_or(default.notify_url),
            })
        };

        Ok(Self {
            payment_timeout: secs("ORDERFLOW_PAYMENT_TIMEOUT_SECS", defaults.payment_timeout)?,
            sweep_interval: secs("ORDERFLOW_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            provider_timeout: secs("ORDERFLOW_PROVIDER_TIMEOUT_SECS", defaults.provider_timeout)?,
            event_timeout: secs("ORDERFLOW_EVENT_TIMEOUT_SECS", defaults.event_timeout)?,
            signature_tolerance: secs(
                "ORDERFLOW_SIGNATURE_TOLERANCE_SECS",
                defaults.signature_tolerance,
            )?,
            providers: ProviderSettings {
                redirect: endpoint("REDIRECT", defaults.providers.redirect)?,
                qr_code: endpoint("QR", defaults.providers.qr_code)?,
                delegated_approval: endpoint("APPROVAL", defaults.providers.delegated_approval)?,
            },
        })
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }
}
