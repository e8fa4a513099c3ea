//! Tower middleware enforcing payment on protected routes.
//!
//! The paygate answers requests without a valid `X-Payment` header with `402
//! Payment Required` and a [`PaymentRequired`] body naming the toll. The
//! issued requirement is persisted under its request id for the length of its
//! timeout, so the follow-up proof is verified against the very requirement
//! it binds to. A verified request reaches the inner service and carries the
//! receipt back in `X-Payment-Response`; a rejected proof is answered with
//! 402 and the machine-readable rejection reason.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use http::{HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use tollgate::amount::Amount;
use tollgate::error::PaymentRejection;
use tollgate::proto::{
    AssetId, PaymentReceipt, PaymentRequired, PaymentRequirement, PaymentScheme, ProtoError,
};
use tollgate::verify::ProofVerifier;
use tollgate_store::KeyValueStore;
use tower::{Layer, Service};

use crate::constants::{DEFAULT_TIMEOUT_SECS, X_PAYMENT_HEADER, X_PAYMENT_RESPONSE_HEADER};
use crate::headers;
use crate::hooks::PaygateHooks;

/// What a protected route charges per request.
#[derive(Debug, Clone)]
pub struct Toll {
    /// Payment scheme offered.
    pub scheme: PaymentScheme,
    /// Network the payment must land on.
    pub network: String,
    /// Asset the payment must move.
    pub asset: AssetId,
    /// Recipient address.
    pub pay_to: String,
    /// Price per call in currency units.
    pub amount: Amount,
    /// Seconds each issued requirement stays payable.
    pub timeout: u64,
    /// Optional free-text tag echoed in issued requirements.
    pub memo: Option<String>,
}

impl Toll {
    /// Creates an exact-scheme toll with the default timeout.
    #[must_use]
    pub fn new(
        network: impl Into<String>,
        asset: AssetId,
        pay_to: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self {
            scheme: PaymentScheme::Exact,
            network: network.into(),
            asset,
            pay_to: pay_to.into(),
            amount,
            timeout: DEFAULT_TIMEOUT_SECS,
            memo: None,
        }
    }

    /// Sets the payment scheme.
    #[must_use]
    pub const fn with_scheme(mut self, scheme: PaymentScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Sets how long issued requirements stay payable.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the free-text memo.
    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Issues a fresh requirement for this toll.
    ///
    /// Every call generates a new request id, nonce, and expiry deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] if the toll's amount or timeout is invalid.
    pub fn to_requirement(&self) -> Result<PaymentRequirement, ProtoError> {
        let requirement = PaymentRequirement::new(
            self.scheme,
            self.network.clone(),
            self.asset.clone(),
            self.pay_to.clone(),
            self.amount,
            self.timeout,
        )?;
        Ok(match &self.memo {
            Some(memo) => requirement.with_memo(memo.clone()),
            None => requirement,
        })
    }
}

/// Storage key an issued requirement is persisted under.
#[must_use]
pub fn requirement_key(request_id: &str) -> String {
    format!("paygate:req:{request_id}")
}

/// Builder for paygate layers sharing one verifier and store.
///
/// Create a single instance per application and call [`Paygate::charge`] per
/// protected route.
#[allow(missing_debug_implementations)] // dyn trait objects do not implement Debug
pub struct Paygate {
    verifier: Arc<dyn ProofVerifier>,
    store: Arc<dyn KeyValueStore>,
    hooks: Vec<Arc<dyn PaygateHooks>>,
}

impl Paygate {
    /// Creates a paygate verifying proofs through `verifier` and persisting
    /// issued requirements in `store`.
    #[must_use]
    pub fn new(verifier: Arc<dyn ProofVerifier>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            verifier,
            store,
            hooks: Vec::new(),
        }
    }

    /// Adds a lifecycle hook. Hooks run in registration order.
    #[must_use]
    pub fn with_hook(mut self, hook: impl PaygateHooks + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Builds the layer enforcing `toll` on a route.
    #[must_use]
    pub fn charge(&self, toll: Toll) -> PaygateLayer {
        PaygateLayer {
            state: Arc::new(PaygateState {
                verifier: Arc::clone(&self.verifier),
                store: Arc::clone(&self.store),
                hooks: self.hooks.clone(),
                toll,
            }),
        }
    }
}

struct PaygateState {
    verifier: Arc<dyn ProofVerifier>,
    store: Arc<dyn KeyValueStore>,
    hooks: Vec<Arc<dyn PaygateHooks>>,
    toll: Toll,
}

/// Tower layer wrapping a route with payment enforcement.
#[derive(Clone)]
#[allow(missing_debug_implementations)] // dyn trait objects do not implement Debug
pub struct PaygateLayer {
    state: Arc<PaygateState>,
}

impl<S> Layer<S> for PaygateLayer {
    type Service = PaygateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PaygateService {
            state: Arc::clone(&self.state),
            inner,
        }
    }
}

/// Service produced by [`PaygateLayer`].
#[derive(Clone)]
#[allow(missing_debug_implementations)] // dyn trait objects do not implement Debug
pub struct PaygateService<S> {
    state: Arc<PaygateState>,
    inner: S,
}

impl<S> Service<Request> for PaygateService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let state = Arc::clone(&self.state);
        // Swap in the clone so the service that was polled ready is the one
        // driven below.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(handle(state, inner, req))
    }
}

async fn handle<S>(
    state: Arc<PaygateState>,
    mut inner: S,
    req: Request,
) -> Result<Response, Infallible>
where
    S: Service<Request, Response = Response, Error = Infallible> + Send,
    S::Future: Send,
{
    let Some(header) = req.headers().get(X_PAYMENT_HEADER) else {
        return Ok(challenge(&state, None).await);
    };

    let proof = match header.to_str().map(headers::decode_payment_proof) {
        Ok(Ok(proof)) => proof,
        _ => return Ok(challenge(&state, Some("invalid payment header")).await),
    };

    let requirement = match load_requirement(&state, &proof.request_id).await {
        Ok(Some(requirement)) => requirement,
        Ok(None) => {
            return Ok(challenge(&state, Some("unknown or expired payment requirement")).await);
        }
        Err(response) => return Ok(response),
    };

    match state.verifier.verify_payment(&proof, &requirement).await {
        Ok(receipt) => {
            // Best effort; the consumed signature alone already blocks reuse.
            let _ = state.store.del(&requirement_key(&proof.request_id)).await;

            for hook in &state.hooks {
                hook.on_payment_verified(&receipt).await;
            }

            #[cfg(feature = "telemetry")]
            tracing::debug!(signature = %receipt.signature, "payment verified at paygate");

            let response = inner.call(req).await?;
            Ok(attach_receipt(response, &receipt))
        }
        Err(rejection) => {
            for hook in &state.hooks {
                hook.on_payment_rejected(&rejection).await;
            }

            #[cfg(feature = "telemetry")]
            tracing::debug!(
                reason = rejection.reason.as_str(),
                "payment rejected at paygate"
            );

            Ok(rejection_response(&rejection))
        }
    }
}

/// Issues a fresh requirement, persists it, and builds the 402 challenge.
async fn challenge(state: &PaygateState, error: Option<&str>) -> Response {
    let requirement = match state.toll.to_requirement() {
        Ok(requirement) => requirement,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "toll not configured",
                    "message": err.to_string(),
                })),
            )
                .into_response();
        }
    };

    let json = match serde_json::to_string(&requirement) {
        Ok(json) => json,
        Err(err) => return store_unavailable(&err.to_string()),
    };
    let persisted = state
        .store
        .set_with_expiry(
            &requirement_key(&requirement.request_id),
            &json,
            requirement.timeout,
        )
        .await;
    if let Err(err) = persisted {
        return store_unavailable(&err.to_string());
    }

    let mut body = PaymentRequired::new(requirement);
    if let Some(error) = error {
        body = body.with_error(error);
    }
    (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
}

/// Fetches the requirement a proof claims to fulfil.
///
/// Corrupt stored JSON is treated as absent; only a store outage maps to an
/// error response.
async fn load_requirement(
    state: &PaygateState,
    request_id: &str,
) -> Result<Option<PaymentRequirement>, Response> {
    match state.store.get(&requirement_key(request_id)).await {
        Ok(Some(json)) => Ok(serde_json::from_str(&json).ok()),
        Ok(None) => Ok(None),
        Err(err) => Err(store_unavailable(&err.to_string())),
    }
}

fn store_unavailable(message: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": "payment store unavailable",
            "message": message,
        })),
    )
        .into_response()
}

fn rejection_response(rejection: &PaymentRejection) -> Response {
    (
        StatusCode::PAYMENT_REQUIRED,
        Json(RejectionBody {
            error: rejection.reason.as_str(),
            message: rejection.message.as_deref(),
        }),
    )
        .into_response()
}

/// Echoes the receipt in `X-Payment-Response` and exposes the header to
/// cross-origin callers.
fn attach_receipt(mut response: Response, receipt: &PaymentReceipt) -> Response {
    if let Ok(encoded) = headers::encode_payment_receipt(receipt) {
        if let Ok(value) = HeaderValue::from_str(&encoded) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-payment-response"), value);
            response.headers_mut().insert(
                HeaderName::from_static("access-control-expose-headers"),
                HeaderValue::from_static(X_PAYMENT_RESPONSE_HEADER),
            );
        }
    }
    response
}

/// Body of a 402 answering a rejected proof, mirroring the reason wire format.
#[derive(Serialize)]
struct RejectionBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::routing::get;
    use http::Request as HttpRequest;
    use tollgate::error::RejectReason;
    use tollgate::networks;
    use tollgate::proto::PaymentProof;
    use tollgate::timestamp::UnixTimestamp;
    use tollgate_store::MemoryStore;
    use tower::ServiceExt;

    use super::*;

    const PAY_TO: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
    const PAYER: &str = "4Nd1mYvM6P2XGJXaCCjtFMcSVxRzX6ATy1hafTuHVf2p";

    #[derive(Debug)]
    struct AcceptAll {
        receipt: PaymentReceipt,
    }

    #[async_trait]
    impl ProofVerifier for AcceptAll {
        async fn verify_payment(
            &self,
            _proof: &PaymentProof,
            _requirement: &PaymentRequirement,
        ) -> Result<PaymentReceipt, PaymentRejection> {
            Ok(self.receipt.clone())
        }
    }

    #[derive(Debug)]
    struct RejectAll {
        rejection: PaymentRejection,
    }

    #[async_trait]
    impl ProofVerifier for RejectAll {
        async fn verify_payment(
            &self,
            _proof: &PaymentProof,
            _requirement: &PaymentRequirement,
        ) -> Result<PaymentReceipt, PaymentRejection> {
            Err(self.rejection.clone())
        }
    }

    #[derive(Clone)]
    struct Recorder {
        verified: Arc<AtomicUsize>,
        rejected: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                verified: Arc::new(AtomicUsize::new(0)),
                rejected: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl PaygateHooks for Recorder {
        fn on_payment_verified<'a>(
            &'a self,
            _receipt: &'a PaymentReceipt,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.verified.fetch_add(1, Ordering::SeqCst);
            })
        }

        fn on_payment_rejected<'a>(
            &'a self,
            _rejection: &'a PaymentRejection,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.rejected.fetch_add(1, Ordering::SeqCst);
            })
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

    fn toll() -> Toll {
        Toll::new(
            networks::DEVNET,
            AssetId::Native,
            PAY_TO,
            Amount::from_lamports(10_000),
        )
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

    fn app(paygate: &Paygate, toll: Toll) -> Router {
        Router::new()
            .route("/data", get(|| async { "protected" }))
            .route_layer(paygate.charge(toll))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_header_answers_402_and_persists_requirement() {
        let store = Arc::new(MemoryStore::new());
        let paygate = Paygate::new(
            Arc::new(AcceptAll { receipt: receipt() }),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        );
        let app = app(&paygate, toll());

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/data")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let challenge: PaymentRequired = body_json(response).await;
        assert!(challenge.error.is_none());
        assert_eq!(challenge.accepts.len(), 1);

        let requirement = &challenge.accepts[0];
        let stored = store
            .get(&requirement_key(&requirement.request_id))
            .await
            .unwrap()
            .unwrap();
        let persisted: PaymentRequirement = serde_json::from_str(&stored).unwrap();
        assert_eq!(&persisted, requirement);
    }

    #[tokio::test]
    async fn test_paid_request_reaches_route_and_carries_receipt() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::new();
        let paygate = Paygate::new(
            Arc::new(AcceptAll { receipt: receipt() }),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        )
        .with_hook(recorder.clone());
        let app = app(&paygate, toll());

        let challenge_response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/data")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let challenge: PaymentRequired = body_json(challenge_response).await;
        let requirement = challenge.accepts[0].clone();

        let encoded = headers::encode_payment_proof(&proof_for(&requirement)).unwrap();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/data")
                    .header(X_PAYMENT_HEADER, encoded)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let echoed = response
            .headers()
            .get(X_PAYMENT_RESPONSE_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert_eq!(headers::decode_payment_receipt(&echoed).unwrap(), receipt());

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"protected");

        // The requirement is single-use.
        assert!(
            store
                .get(&requirement_key(&requirement.request_id))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(recorder.verified.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.rejected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_proof_answers_402_with_reason() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::new();
        let paygate = Paygate::new(
            Arc::new(RejectAll {
                rejection: PaymentRejection::new(RejectReason::ReplayedProof)
                    .with_message("signature already consumed"),
            }),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        )
        .with_hook(recorder.clone());
        let app = app(&paygate, toll());

        let challenge_response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/data")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let challenge: PaymentRequired = body_json(challenge_response).await;
        let requirement = challenge.accepts[0].clone();

        let encoded = headers::encode_payment_proof(&proof_for(&requirement)).unwrap();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/data")
                    .header(X_PAYMENT_HEADER, encoded)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["error"], "replayed_proof");
        assert_eq!(body["message"], "signature already consumed");
        assert_eq!(recorder.rejected.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.verified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_request_id_reissues_challenge() {
        let store = Arc::new(MemoryStore::new());
        let paygate = Paygate::new(
            Arc::new(AcceptAll { receipt: receipt() }),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        );
        let app = app(&paygate, toll());

        let mut orphan = proof_for(&toll().to_requirement().unwrap());
        orphan.request_id = "req_neverissued12345".to_owned();
        let encoded = headers::encode_payment_proof(&orphan).unwrap();

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/data")
                    .header(X_PAYMENT_HEADER, encoded)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let challenge: PaymentRequired = body_json(response).await;
        assert_eq!(
            challenge.error.as_deref(),
            Some("unknown or expired payment requirement")
        );
        assert_eq!(challenge.accepts.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_header_reissues_challenge() {
        let store = Arc::new(MemoryStore::new());
        let paygate = Paygate::new(
            Arc::new(AcceptAll { receipt: receipt() }),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        );
        let app = app(&paygate, toll());

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/data")
                    .header(X_PAYMENT_HEADER, "not-base64!!!")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let challenge: PaymentRequired = body_json(response).await;
        assert_eq!(challenge.error.as_deref(), Some("invalid payment header"));
    }

    #[tokio::test]
    async fn test_invalid_toll_answers_500() {
        let store = Arc::new(MemoryStore::new());
        let paygate = Paygate::new(
            Arc::new(AcceptAll { receipt: receipt() }),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        );
        let app = app(&paygate, toll().with_timeout(0));

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/data")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["error"], "toll not configured");
    }
}
