//! Signed webhook delivery and verification.
//!
//! Outbound notifications are JSON POSTs carrying three headers: the event
//! name, the signing timestamp, and a hex HMAC-SHA256 signature over
//! `"{timestamp}.{body}"`. Receivers recompute the signature and reject stale
//! timestamps before trusting a delivery. Verification is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tollgate::timestamp::UnixTimestamp;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock skew between signing and verification, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: u64 = 300;

fn mac_for(secret: &str, timestamp: UnixTimestamp, body: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    mac
}

/// Computes the hex HMAC-SHA256 signature for a webhook body.
#[must_use]
pub fn sign_payload(secret: &str, timestamp: UnixTimestamp, body: &str) -> String {
    hex::encode(mac_for(secret, timestamp, body).finalize().into_bytes())
}

/// Verifies a webhook signature and its timestamp.
///
/// # Errors
///
/// Returns [`WebhookError::StaleTimestamp`] when `timestamp` is more than
/// [`SIGNATURE_TOLERANCE_SECS`] from the current time in either direction,
/// and [`WebhookError::InvalidSignature`] when the signature does not match
/// the payload.
pub fn verify_signature(
    secret: &str,
    timestamp: UnixTimestamp,
    body: &str,
    signature: &str,
) -> Result<(), WebhookError> {
    let skew_secs = UnixTimestamp::now().as_secs().abs_diff(timestamp.as_secs());
    if skew_secs > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::StaleTimestamp { skew_secs });
    }
    let digest = hex::decode(signature).map_err(|_| WebhookError::InvalidSignature)?;
    mac_for(secret, timestamp, body)
        .verify_slice(&digest)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Errors signing, verifying, or delivering webhooks.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The signature did not match the payload.
    #[error("webhook signature mismatch")]
    InvalidSignature,

    /// The signing timestamp is outside the accepted window.
    #[error("webhook timestamp skew of {skew_secs}s exceeds tolerance")]
    StaleTimestamp {
        /// Seconds between the signing timestamp and now.
        skew_secs: u64,
    },

    /// The payload could not be serialized.
    #[error("webhook payload error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The receiver could not be reached or answered with an error status.
    #[error("webhook delivery failed: {0}")]
    Delivery(String),
}

#[cfg(feature = "client")]
mod notify {
    use std::fmt;
    use std::time::Duration;

    use tollgate::timestamp::UnixTimestamp;

    use super::{WebhookError, sign_payload};
    use crate::constants::{
        WEBHOOK_EVENT_HEADER, WEBHOOK_SIGNATURE_HEADER, WEBHOOK_TIMESTAMP_HEADER,
    };

    /// Delivery timeout for outbound webhooks.
    const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Sends signed webhook notifications.
    pub struct WebhookNotifier {
        client: reqwest::Client,
        secret: String,
    }

    impl fmt::Debug for WebhookNotifier {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("WebhookNotifier").finish_non_exhaustive()
        }
    }

    impl WebhookNotifier {
        /// Creates a notifier signing with `secret`.
        ///
        /// # Panics
        ///
        /// Panics if the underlying HTTP client cannot be constructed, which
        /// should not happen on properly configured systems.
        #[must_use]
        pub fn new(secret: impl Into<String>) -> Self {
            let client = reqwest::Client::builder()
                .timeout(DELIVERY_TIMEOUT)
                .user_agent(concat!("tollgate-facilitator/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("failed to build reqwest::Client");
            Self {
                client,
                secret: secret.into(),
            }
        }

        /// Signs and delivers `data` to `url` as `event`.
        ///
        /// # Errors
        ///
        /// Returns [`WebhookError::Delivery`] when the receiver cannot be
        /// reached within the delivery timeout or answers with a non-success
        /// status.
        pub async fn deliver(
            &self,
            url: &str,
            event: &str,
            data: &serde_json::Value,
        ) -> Result<(), WebhookError> {
            let timestamp = UnixTimestamp::now();
            let body = serde_json::to_string(data)?;
            let signature = sign_payload(&self.secret, timestamp, &body);

            let response = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(WEBHOOK_EVENT_HEADER, event)
                .header(WEBHOOK_TIMESTAMP_HEADER, timestamp.to_string())
                .header(WEBHOOK_SIGNATURE_HEADER, signature)
                .body(body)
                .send()
                .await
                .map_err(|err| WebhookError::Delivery(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(WebhookError::Delivery(format!("{status}: {text}")));
            }

            #[cfg(feature = "telemetry")]
            tracing::debug!(url, event, "webhook delivered");

            Ok(())
        }
    }
}

#[cfg(feature = "client")]
pub use notify::WebhookNotifier;
