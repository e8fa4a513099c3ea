//! HTTP error mapping for the facilitator routes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tollgate::ledger::LedgerError;
use tollgate_store::StoreError;

use crate::escrow::EscrowError;
use crate::settlement::SettlementError;

/// Message used whenever a storage backend failure must not leak details.
const STORE_UNAVAILABLE: &str = "the storage backend is unavailable";

/// Unified error for the route handlers.
///
/// Every variant maps to a status code and a stable machine-readable token;
/// backend failures are reported with fixed messages so internal error text
/// never reaches clients.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// An escrow operation failed.
    #[error(transparent)]
    Escrow(#[from] EscrowError),

    /// A settlement operation failed.
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    /// A store operation outside the engines failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    fn status_token_message(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::Escrow(err) => escrow_mapping(err),
            Self::Settlement(err) => settlement_mapping(err),
            Self::Store(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                STORE_UNAVAILABLE.to_owned(),
            ),
        }
    }
}

fn escrow_mapping(err: &EscrowError) -> (StatusCode, &'static str, String) {
    match err {
        EscrowError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        EscrowError::InsufficientBalance { .. } => (
            StatusCode::BAD_REQUEST,
            "insufficient_balance",
            err.to_string(),
        ),
        EscrowError::DepositVerificationFailed(_) => (
            StatusCode::BAD_REQUEST,
            "deposit_verification_failed",
            err.to_string(),
        ),
        EscrowError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
        }
        EscrowError::Transfer(_) => (
            StatusCode::BAD_GATEWAY,
            "transfer_failed",
            "the on-chain transfer failed; the balance was restored".to_owned(),
        ),
        EscrowError::Ledger(
            LedgerError::InvalidAddress(_) | LedgerError::InvalidAmount(_),
        ) => (StatusCode::BAD_REQUEST, "invalid_request", err.to_string()),
        EscrowError::Ledger(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "ledger_unavailable",
            "the ledger could not be queried".to_owned(),
        ),
        EscrowError::Contended(_) | EscrowError::Store(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            STORE_UNAVAILABLE.to_owned(),
        ),
        EscrowError::Overflow | EscrowError::Codec(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error".to_owned(),
        ),
    }
}

fn settlement_mapping(err: &SettlementError) -> (StatusCode, &'static str, String) {
    match err {
        SettlementError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        SettlementError::AlreadyPending(_) => {
            (StatusCode::CONFLICT, "settlement_pending", err.to_string())
        }
        SettlementError::NothingToSettle(_) => (
            StatusCode::BAD_REQUEST,
            "nothing_to_settle",
            err.to_string(),
        ),
        SettlementError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
        }
        SettlementError::Payout(_) => (
            StatusCode::BAD_GATEWAY,
            "transfer_failed",
            "the settlement payout failed; the batch was restored".to_owned(),
        ),
        SettlementError::Store(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            STORE_UNAVAILABLE.to_owned(),
        ),
        SettlementError::Overflow | SettlementError::Codec(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error".to_owned(),
        ),
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, token, message) = self.status_token_message();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }
        (status, Json(json!({ "error": token, "message": message }))).into_response()
    }
}
