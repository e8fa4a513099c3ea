//! The proof-verification capability.
//!
//! The HTTP paygate verifies proofs through this trait so that a resource
//! server can either embed the verification engine in-process or delegate to
//! a remote facilitator over HTTP; the middleware does not care which.

use async_trait::async_trait;

use crate::error::PaymentRejection;
use crate::proto::{PaymentProof, PaymentReceipt, PaymentRequirement};

/// Verifies payment proofs against the requirements they claim to fulfil.
///
/// A successful verification consumes the proof's signature: verifying the
/// same proof twice yields a replay rejection on the second attempt, across
/// concurrent callers too.
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// Verifies `proof` against `requirement` and returns the receipt.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentRejection`] carrying the machine-readable reason
    /// when any check fails. Infrastructure failures reject with
    /// `ledger_unavailable`: verification fails closed, never open.
    async fn verify_payment(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentReceipt, PaymentRejection>;
}
