//! The rejection taxonomy shared across verification, escrow, and settlement.
//!
//! Every failure surfaced to a payer or merchant is discriminated by a
//! [`RejectReason`]: a closed, machine-readable set that callers can branch on
//! to decide whether retrying the same proof can ever succeed. Free-form
//! internal error text never crosses the wire; only the reason and an optional
//! operator-curated message do.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable reason a payment operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The proof's transaction signature was already consumed.
    ReplayedProof,
    /// The proof does not satisfy the requirement it claims to fulfil:
    /// request id, amount, recipient, asset, or on-chain record mismatch.
    RequirementMismatch,
    /// The requirement's expiry deadline has passed.
    ExpiredProof,
    /// The ledger could not be queried; verification fails closed.
    LedgerUnavailable,
    /// The escrow balance does not cover the requested debit.
    InsufficientBalance,
    /// The on-chain transfer failed after the reservation was made; the
    /// reservation has been compensated.
    TransferFailed,
    /// A webhook signature did not verify or its timestamp was stale.
    WebhookSignatureInvalid,
}

impl RejectReason {
    /// Returns the snake_case wire name of the reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReplayedProof => "replayed_proof",
            Self::RequirementMismatch => "requirement_mismatch",
            Self::ExpiredProof => "expired_proof",
            Self::LedgerUnavailable => "ledger_unavailable",
            Self::InsufficientBalance => "insufficient_balance",
            Self::TransferFailed => "transfer_failed",
            Self::WebhookSignatureInvalid => "webhook_signature_invalid",
        }
    }

    /// Returns `true` if retrying the same operation can succeed.
    ///
    /// `LedgerUnavailable` is transient by definition. `TransferFailed` is
    /// retryable because the failed operation's reservation was rolled back
    /// before the error surfaced. Everything else is a permanent verdict on
    /// the submitted proof.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LedgerUnavailable | Self::TransferFailed)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected payment operation: the discriminated reason plus an optional
/// human-readable message safe to return to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRejection {
    /// Machine-readable reason for the rejection.
    pub reason: RejectReason,
    /// Human-readable message for the rejection.
    pub message: Option<String>,
}

impl PaymentRejection {
    /// Creates a new rejection with no message.
    #[must_use]
    pub const fn new(reason: RejectReason) -> Self {
        Self {
            reason,
            message: None,
        }
    }

    /// Sets the human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns `true` if retrying the same operation can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.reason.is_retryable()
    }
}

impl fmt::Display for PaymentRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(msg) = &self.message {
            write!(f, "{}: {}", self.reason, msg)
        } else {
            write!(f, "{}", self.reason)
        }
    }
}

impl std::error::Error for PaymentRejection {}

impl From<RejectReason> for PaymentRejection {
    fn from(reason: RejectReason) -> Self {
        Self::new(reason)
    }
}

impl From<crate::ledger::LedgerError> for PaymentRejection {
    fn from(err: crate::ledger::LedgerError) -> Self {
        Self::new(RejectReason::LedgerUnavailable).with_message(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_wire_names() {
        let json = serde_json::to_string(&RejectReason::ReplayedProof).unwrap();
        assert_eq!(json, r#""replayed_proof""#);
        let back: RejectReason = serde_json::from_str(r#""ledger_unavailable""#).unwrap();
        assert_eq!(back, RejectReason::LedgerUnavailable);
    }

    #[test]
    fn test_retryability_contract() {
        assert!(RejectReason::LedgerUnavailable.is_retryable());
        assert!(RejectReason::TransferFailed.is_retryable());
        assert!(!RejectReason::ReplayedProof.is_retryable());
        assert!(!RejectReason::RequirementMismatch.is_retryable());
        assert!(!RejectReason::ExpiredProof.is_retryable());
        assert!(!RejectReason::InsufficientBalance.is_retryable());
    }

    #[test]
    fn test_rejection_display() {
        let bare = PaymentRejection::new(RejectReason::ExpiredProof);
        assert_eq!(bare.to_string(), "expired_proof");

        let detailed = PaymentRejection::new(RejectReason::RequirementMismatch)
            .with_message("amount below required");
        assert_eq!(detailed.to_string(), "requirement_mismatch: amount below required");
    }
}
