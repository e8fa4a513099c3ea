//! Axum route handlers for the facilitator service.
//!
//! Thin HTTP shims over the three engines: request bodies deserialize into
//! engine arguments, engine errors map to status codes in
//! [`crate::error::ServiceError`], and everything else is the engines'
//! business.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tollgate::amount::Amount;
use tollgate::proto::{AssetId, PaymentReceipt, VerifyResponse};
use tollgate_http::facilitator::VerifyRequest;

use crate::error::ServiceError;
use crate::escrow::{EscrowManager, EscrowPayment, UserEscrow};
use crate::settlement::{PendingSummary, Settlement, SettlementEngine};
use crate::verifier::PaymentVerifier;

/// Shared application state for the facilitator service.
#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub struct AppState {
    /// Payment proof verification engine.
    pub verifier: Arc<PaymentVerifier>,
    /// Escrow account engine.
    pub escrow: Arc<EscrowManager>,
    /// Merchant settlement engine.
    pub settlement: Arc<SettlementEngine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEscrowBody {
    user_id: String,
    user_wallet: String,
}

#[derive(Debug, Deserialize)]
struct DepositBody {
    amount: Amount,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct DeductBody {
    amount: Amount,
}

#[derive(Debug, Deserialize)]
struct PayBody {
    recipient: String,
    amount: Amount,
    #[serde(default)]
    asset: Option<AssetId>,
}

#[derive(Debug, Deserialize)]
struct WithdrawBody {
    amount: Amount,
    destination: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordPaymentBody {
    merchant_wallet: String,
    receipt: PaymentReceipt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleBody {
    merchant_wallet: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MerchantQuery {
    merchant_wallet: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct SignatureBody {
    signature: String,
}

/// `POST /verify`: checks a payment proof against a requirement.
///
/// Both verdicts come back as `200` with the verdict in the body; only
/// transport-level problems surface as HTTP errors.
pub async fn post_verify(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Json<VerifyResponse> {
    let verdict = state.verifier.verify(&body.proof, &body.requirement).await;
    Json(VerifyResponse::from(verdict))
}

/// `GET /verified/{signature}`: whether a signature was already consumed by a
/// successful verification.
pub async fn get_verified(
    State(state): State<AppState>,
    Path(signature): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let verified = state.verifier.is_verified(&signature).await?;
    Ok(Json(json!({ "signature": signature, "verified": verified })))
}

/// `POST /escrow`: creates an escrow account, idempotently.
pub async fn create_escrow(
    State(state): State<AppState>,
    Json(body): Json<CreateEscrowBody>,
) -> Result<Json<UserEscrow>, ServiceError> {
    let record = state
        .escrow
        .create_escrow(&body.user_id, &body.user_wallet)
        .await?;
    Ok(Json(record))
}

/// `GET /escrow/{userId}`: returns the full escrow record.
pub async fn get_escrow(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserEscrow>, ServiceError> {
    Ok(Json(state.escrow.escrow(&user_id).await?))
}

/// `GET /escrow/{userId}/balance`: returns the spendable balance, zero for
/// unknown users.
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let balance = state.escrow.balance(&user_id).await?;
    Ok(Json(json!({ "userId": user_id, "balance": balance })))
}

/// `POST /escrow/{userId}/deposit`: credits a chain-verified deposit.
pub async fn post_deposit(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<DepositBody>,
) -> Result<Json<UserEscrow>, ServiceError> {
    let record = state
        .escrow
        .deposit(&user_id, body.amount, &body.signature)
        .await?;
    Ok(Json(record))
}

/// `POST /escrow/{userId}/deduct`: deducts from the balance without moving
/// funds on chain.
pub async fn post_deduct(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<DeductBody>,
) -> Result<Json<UserEscrow>, ServiceError> {
    Ok(Json(state.escrow.deduct(&user_id, body.amount).await?))
}

/// `POST /escrow/{userId}/pay`: pays a recipient from the user's balance.
pub async fn post_pay(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<PayBody>,
) -> Result<Json<SignatureBody>, ServiceError> {
    let asset = body.asset.unwrap_or(AssetId::Native);
    let signature = state
        .escrow
        .execute_payment(&user_id, &body.recipient, body.amount, &asset)
        .await?;
    Ok(Json(SignatureBody { signature }))
}

/// `POST /escrow/{userId}/withdraw`: returns funds to the user's own wallet.
pub async fn post_withdraw(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<WithdrawBody>,
) -> Result<Json<SignatureBody>, ServiceError> {
    let signature = state
        .escrow
        .withdraw(&user_id, body.amount, &body.destination)
        .await?;
    Ok(Json(SignatureBody { signature }))
}

/// `GET /escrow/{userId}/history`: recent payments, newest first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<EscrowPayment>>, ServiceError> {
    Ok(Json(state.escrow.history(&user_id, query.limit).await?))
}

/// `POST /payments/record`: queues a verified payment for settlement.
pub async fn record_payment(
    State(state): State<AppState>,
    Json(body): Json<RecordPaymentBody>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    state
        .settlement
        .record_payment(&body.merchant_wallet, &body.receipt)
        .await?;
    Ok(Json(json!({ "recorded": true })))
}

/// `POST /settlement/request`: settles everything pending for a merchant.
pub async fn request_settlement(
    State(state): State<AppState>,
    Json(body): Json<SettleBody>,
) -> Result<Json<Settlement>, ServiceError> {
    let settlement = state
        .settlement
        .request_settlement(&body.merchant_wallet)
        .await?;
    Ok(Json(settlement))
}

/// `GET /settlement/pending?merchantWallet=`: unsettled totals for a
/// merchant.
pub async fn get_pending(
    State(state): State<AppState>,
    Query(query): Query<MerchantQuery>,
) -> Result<Json<PendingSummary>, ServiceError> {
    Ok(Json(state.settlement.pending(&query.merchant_wallet).await?))
}

/// `GET /settlement/{id}`: looks up a settlement by id.
pub async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, ServiceError> {
    Ok(Json(state.settlement.settlement(&id).await?))
}

/// `GET /health`: liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates the facilitator [`Router`] with every endpoint mounted.
pub fn facilitator_router(state: AppState) -> Router {
    Router::new()
        .route("/verify", post(post_verify))
        .route("/verified/{signature}", get(get_verified))
        .route("/escrow", post(create_escrow))
        .route("/escrow/{user_id}", get(get_escrow))
        .route("/escrow/{user_id}/balance", get(get_balance))
        .route("/escrow/{user_id}/deposit", post(post_deposit))
        .route("/escrow/{user_id}/deduct", post(post_deduct))
        .route("/escrow/{user_id}/pay", post(post_pay))
        .route("/escrow/{user_id}/withdraw", post(post_withdraw))
        .route("/escrow/{user_id}/history", get(get_history))
        .route("/payments/record", post(record_payment))
        .route("/settlement/request", post(request_settlement))
        .route("/settlement/pending", get(get_pending))
        .route("/settlement/{id}", get(get_settlement))
        .route("/health", get(health))
        .with_state(state)
}
