//! HTTP client for a remote verification facilitator.
//!
//! [`FacilitatorClient`] implements [`ProofVerifier`] by delegating to a
//! facilitator service over HTTP, so a paygate can run without ledger access
//! of its own. Transport failures and unparseable answers fail closed as
//! [`RejectReason::LedgerUnavailable`], which callers may retry.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tollgate::error::{PaymentRejection, RejectReason};
use tollgate::proto::{PaymentProof, PaymentReceipt, PaymentRequirement, VerifyResponse};
use tollgate::verify::ProofVerifier;

use crate::constants::DEFAULT_FACILITATOR_URL;

/// Configuration for [`FacilitatorClient`].
#[derive(Clone)]
pub struct FacilitatorConfig {
    /// Base URL of the facilitator service.
    pub url: String,
    /// Request timeout applied when the client builds its own HTTP client.
    pub timeout: Duration,
    /// Optional bearer token attached to every request.
    pub bearer_token: Option<String>,
    /// Pre-built HTTP client to use instead of constructing one.
    pub http_client: Option<reqwest::Client>,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FACILITATOR_URL.to_owned(),
            timeout: Duration::from_secs(30),
            bearer_token: None,
            http_client: None,
        }
    }
}

impl FacilitatorConfig {
    /// Creates a configuration pointing at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the bearer token attached to every request.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Supplies a pre-built HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}

impl fmt::Debug for FacilitatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacilitatorConfig")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("has_bearer_token", &self.bearer_token.is_some())
            .field("has_http_client", &self.http_client.is_some())
            .finish()
    }
}

/// Body of a `POST /verify` request.
///
/// Shared by this client and facilitator-side handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// The payment proof to verify.
    pub proof: PaymentProof,
    /// The requirement the proof claims to fulfil.
    pub requirement: PaymentRequirement,
}

/// Non-success error body the facilitator answers with.
#[derive(Deserialize)]
struct ErrorBody {
    error: RejectReason,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct VerifiedBody {
    verified: bool,
}

/// Verifies payment proofs against a remote facilitator service.
pub struct FacilitatorClient {
    url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl FacilitatorClient {
    /// Creates a client from `config`.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client cannot be constructed (should not
    /// happen with the options used here).
    #[must_use]
    pub fn new(config: FacilitatorConfig) -> Self {
        let client = config.http_client.unwrap_or_else(|| {
            reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .expect("failed to build reqwest::Client")
        });
        Self {
            url: config.url.trim_end_matches('/').to_owned(),
            bearer_token: config.bearer_token,
            client,
        }
    }

    /// Base URL the client talks to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, format!("{}{path}", self.url));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request
    }

    /// Submits a proof for verification and returns the facilitator's verdict.
    ///
    /// # Errors
    ///
    /// Returns the facilitator's rejection for a non-success answer carrying
    /// one, and [`RejectReason::LedgerUnavailable`] when the facilitator is
    /// unreachable or answers with something unparseable.
    pub async fn post_verify(&self, body: &VerifyRequest) -> Result<VerifyResponse, PaymentRejection> {
        let response = self
            .request(Method::POST, "/verify")
            .json(body)
            .send()
            .await
            .map_err(|err| unavailable(format!("facilitator unreachable: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<VerifyResponse>()
                .await
                .map_err(|err| unavailable(format!("malformed facilitator response: {err}")));
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(PaymentRejection {
                reason: body.error,
                message: body.message,
            }),
            Err(_) => Err(unavailable(format!("facilitator returned {status}: {text}"))),
        }
    }

    /// Asks whether `signature` was already consumed by a verification.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] when the facilitator is unreachable,
    /// answers with a non-success status, or with a body that does not parse.
    pub async fn is_verified(&self, signature: &str) -> Result<bool, FacilitatorError> {
        let response = self
            .request(Method::GET, &format!("/verified/{signature}"))
            .send()
            .await
            .map_err(|err| FacilitatorError::Transport(err.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(FacilitatorError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let body: VerifiedBody = serde_json::from_str(&text)?;
        Ok(body.verified)
    }

    /// Checks the facilitator's health endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] when the facilitator is unreachable or
    /// reports anything but success.
    pub async fn health(&self) -> Result<(), FacilitatorError> {
        let response = self
            .request(Method::GET, "/health")
            .send()
            .await
            .map_err(|err| FacilitatorError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FacilitatorError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl fmt::Debug for FacilitatorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacilitatorClient")
            .field("url", &self.url)
            .field("has_bearer_token", &self.bearer_token.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProofVerifier for FacilitatorClient {
    async fn verify_payment(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentReceipt, PaymentRejection> {
        let verdict = self
            .post_verify(&VerifyRequest {
                proof: proof.clone(),
                requirement: requirement.clone(),
            })
            .await?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(valid = verdict.is_valid(), "facilitator verdict received");

        verdict.into_result()
    }
}

/// Errors talking to the facilitator outside the verification verdict.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    /// The facilitator could not be reached.
    #[error("facilitator unreachable: {0}")]
    Transport(String),
    /// The facilitator answered with a non-success status.
    #[error("facilitator returned {status}: {body}")]
    Status {
        /// HTTP status code of the answer.
        status: u16,
        /// Answer body, verbatim.
        body: String,
    },
    /// The facilitator answered with a body that does not parse.
    #[error("malformed facilitator response: {0}")]
    Decode(#[from] serde_json::Error),
}

fn unavailable(message: String) -> PaymentRejection {
    PaymentRejection::new(RejectReason::LedgerUnavailable).with_message(message)
}

#[cfg(test)]
mod tests {
    use tollgate::amount::Amount;
    use tollgate::networks;
    use tollgate::proto::{AssetId, PaymentScheme};
    use tollgate::timestamp::UnixTimestamp;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const PAY_TO: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
    const PAYER: &str = "4Nd1mYvM6P2XGJXaCCjtFMcSVxRzX6ATy1hafTuHVf2p";

    fn requirement() -> PaymentRequirement {
        PaymentRequirement::new(
            PaymentScheme::Exact,
            networks::DEVNET,
            AssetId::Native,
            PAY_TO,
            Amount::from_lamports(10_000),
            60,
        )
        .unwrap()
    }

    fn proof_for(requirement: &PaymentRequirement) -> PaymentProof {
        PaymentProof {
            signature: "5VERYUNIQUEsignature111".to_owned(),
            amount: requirement.amount,
            sender: PAYER.to_owned(),
            recipient: requirement.pay_to.clone(),
            asset: requirement.asset.clone(),
            timestamp: UnixTimestamp::now(),
            request_id: requirement.request_id.clone(),
        }
    }

    fn receipt() -> PaymentReceipt {
        PaymentReceipt {
            transaction_id: "5VERYUNIQUEsignature111".to_owned(),
            from: PAYER.to_owned(),
            to: PAY_TO.to_owned(),
            amount: Amount::from_lamports(10_000),
            asset: AssetId::Native,
            timestamp: UnixTimestamp::from_secs(1_700_000_000),
            block_hash: "9sHcv6xwn9YkB8nxTUGKDwPwNnmqVp5oLubhWjENkaMo".to_owned(),
            slot: 42,
            signature: "5VERYUNIQUEsignature111".to_owned(),
            verifiable: true,
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = FacilitatorConfig::default();
        assert_eq!(config.url, DEFAULT_FACILITATOR_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = FacilitatorClient::new(FacilitatorConfig::new("http://pay.example/"));
        assert_eq!(client.url(), "http://pay.example");
    }

    #[tokio::test]
    async fn test_valid_verdict_yields_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "isValid": true,
                "receipt": receipt(),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = FacilitatorClient::new(FacilitatorConfig::new(server.uri()));
        let requirement = requirement();
        let outcome = client
            .verify_payment(&proof_for(&requirement), &requirement)
            .await
            .unwrap();
        assert_eq!(outcome, receipt());
    }

    #[tokio::test]
    async fn test_invalid_verdict_carries_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "isValid": false,
                "invalidReason": "replayed_proof",
                "invalidMessage": "signature already consumed",
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::new(FacilitatorConfig::new(server.uri()));
        let requirement = requirement();
        let rejection = client
            .verify_payment(&proof_for(&requirement), &requirement)
            .await
            .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::ReplayedProof);
        assert_eq!(rejection.message.as_deref(), Some("signature already consumed"));
    }

    #[tokio::test]
    async fn test_error_status_body_maps_to_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": "expired_proof",
                "message": "requirement deadline passed",
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::new(FacilitatorConfig::new(server.uri()));
        let requirement = requirement();
        let rejection = client
            .verify_payment(&proof_for(&requirement), &requirement)
            .await
            .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::ExpiredProof);
        assert!(!rejection.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_facilitator_fails_closed_and_retryable() {
        let config = FacilitatorConfig::new("http://127.0.0.1:9")
            .with_timeout(Duration::from_millis(250));
        let client = FacilitatorClient::new(config);
        let requirement = requirement();
        let rejection = client
            .verify_payment(&proof_for(&requirement), &requirement)
            .await
            .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::LedgerUnavailable);
        assert!(rejection.is_retryable());
    }

    #[tokio::test]
    async fn test_garbage_success_body_fails_closed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = FacilitatorClient::new(FacilitatorConfig::new(server.uri()));
        let requirement = requirement();
        let rejection = client
            .verify_payment(&proof_for(&requirement), &requirement)
            .await
            .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::LedgerUnavailable);
    }

    #[tokio::test]
    async fn test_is_verified_parses_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verified/5VERYUNIQUEsignature111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "signature": "5VERYUNIQUEsignature111",
                "verified": true,
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::new(FacilitatorConfig::new(server.uri()));
        assert!(client.is_verified("5VERYUNIQUEsignature111").await.unwrap());
    }

    #[tokio::test]
    async fn test_bearer_token_attached_to_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .and(bearer_token("s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = FacilitatorClient::new(
            FacilitatorConfig::new(server.uri()).with_bearer_token("s3cret"),
        );
        client.health().await.unwrap();
    }
}
