use crate::error::{OrderError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Checks that a callback was produced by the holder of the shared secret.
///
/// Header format is `t=<unix seconds>,v1=<hex hmac>`, where the MAC covers
/// `"<t>.<body>"`.
#[derive(Debug, Clone)]
pub struct CallbackVerifier {
    secret: String,
    tolerance: Duration,
}

impl CallbackVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<()> {
        self.verify_at(body, header, Utc::now())
    }

    pub fn verify_at(&self, body: &[u8], header: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        let header = header.ok_or_else(|| untrusted("missing signature header"))?;

        let mut timestamp = "";
        let mut signature = "";
        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = t;
            } else if let Some(v) = part.strip_prefix("v1=") {
                signature = v;
            }
        }
        if timestamp.is_empty() || signature.is_empty() {
            return Err(untrusted("incomplete signature header"));
        }

        let expected = hex::decode(signature).map_err(|_| untrusted("signature is not hex"))?;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| OrderError::internal("HMAC key rejected"))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| untrusted("signature mismatch"))?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| untrusted("timestamp is not a number"))?;
        let age = (now.timestamp() - ts).unsigned_abs();
        if age > self.tolerance.as_secs() {
            return Err(untrusted("signature timestamp outside tolerance"));
        }
        Ok(())
    }
}

/// Produces the header a provider would send for `body` at `timestamp`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| OrderError::internal("HMAC key rejected"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
}

fn untrusted(reason: &str) -> OrderError {
    OrderError::UntrustedCallback(reason.to_string())
}
