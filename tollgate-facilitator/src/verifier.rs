//! On-chain payment verification with replay prevention.
//!
//! The checks run cheapest-first: replay and requirement-shape checks reject
//! without touching the ledger, the chain query runs only for proofs that
//! still qualify, and the signature is consumed atomically as the final step
//! so exactly one of any set of concurrent presentations wins.

use std::sync::Arc;

use async_trait::async_trait;
use tollgate::error::{PaymentRejection, RejectReason};
use tollgate::ledger::{Ledger, LedgerTransaction};
use tollgate::proto::{AssetId, PaymentProof, PaymentReceipt, PaymentRequirement};
use tollgate::verify::ProofVerifier;
use tollgate_store::{SignatureStore, StoreError};

/// Seconds an accepted signature stays registered against replay.
///
/// Ledger RPCs stop returning transactions from much older blocks anyway, so
/// a day of retention closes the window without growing the store forever.
pub const SIGNATURE_RETENTION_SECS: u64 = 86_400;

/// Verifies payment proofs against issued requirements using a [`Ledger`]
/// for chain queries and a [`SignatureStore`] for replay prevention.
#[allow(missing_debug_implementations)]
pub struct PaymentVerifier {
    ledger: Arc<dyn Ledger>,
    signatures: Arc<dyn SignatureStore>,
}

impl PaymentVerifier {
    /// Creates a verifier bound to one ledger and one signature store.
    pub fn new(ledger: Arc<dyn Ledger>, signatures: Arc<dyn SignatureStore>) -> Self {
        Self { ledger, signatures }
    }

    /// Checks `proof` against `requirement` and returns a receipt on success.
    ///
    /// The signature is consumed on acceptance; presenting the same proof
    /// again rejects with `replayed_proof`.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentRejection`] naming the first failed check. A store
    /// or ledger outage rejects with `ledger_unavailable` rather than
    /// accepting an unverifiable proof.
    pub async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentReceipt, PaymentRejection> {
        if self.consumed(&proof.signature).await? {
            return Err(replayed());
        }

        if proof.request_id != requirement.request_id {
            return Err(mismatch("proof is not bound to this requirement"));
        }
        if requirement.network != self.ledger.network() {
            return Err(mismatch(format!(
                "requirement targets {} but this verifier serves {}",
                requirement.network,
                self.ledger.network()
            )));
        }
        if proof.amount < requirement.amount {
            return Err(mismatch(format!(
                "claimed amount {} is below the required {}",
                proof.amount, requirement.amount
            )));
        }
        if requirement.expires_at.is_past() {
            return Err(PaymentRejection::new(RejectReason::ExpiredProof)
                .with_message(format!("requirement expired at {}", requirement.expires_at)));
        }

        let tx = self
            .ledger
            .get_transaction(&proof.signature)
            .await?
            .ok_or_else(|| mismatch("transaction not found on the ledger"))?;
        if !tx.succeeded {
            return Err(mismatch("transaction failed on-chain"));
        }
        if !has_matching_transfer(&tx, requirement, &self.ledger.pool_address()) {
            return Err(mismatch(format!(
                "no transfer of at least {} to {} found in the transaction",
                requirement.amount, requirement.pay_to
            )));
        }

        let fresh = self
            .signatures
            .try_register(&proof.signature, SIGNATURE_RETENTION_SECS)
            .await
            .map_err(store_unavailable)?;
        if !fresh {
            return Err(replayed());
        }

        tracing::debug!(
            signature = %proof.signature,
            request_id = %requirement.request_id,
            amount = %proof.amount,
            "payment verified"
        );
        Ok(PaymentReceipt::from_confirmed(proof, &tx))
    }

    /// Returns whether `signature` has already been consumed by a successful
    /// verification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the signature store cannot be queried.
    pub async fn is_verified(&self, signature: &str) -> Result<bool, StoreError> {
        self.signatures.has(signature).await
    }

    /// Drops every consumed signature. Test and maintenance hook, not part of
    /// the verification path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the signature store rejects the operation.
    pub async fn clear_consumed(&self) -> Result<(), StoreError> {
        self.signatures.clear().await
    }

    async fn consumed(&self, signature: &str) -> Result<bool, PaymentRejection> {
        self.signatures
            .has(signature)
            .await
            .map_err(store_unavailable)
    }
}

#[async_trait]
impl ProofVerifier for PaymentVerifier {
    async fn verify_payment(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentReceipt, PaymentRejection> {
        self.verify(proof, requirement).await
    }
}

/// A transfer satisfies the requirement when it pays the required address
/// (or the pool, for escrow-routed payments) at least the required amount in
/// the required asset.
fn has_matching_transfer(
    tx: &LedgerTransaction,
    requirement: &PaymentRequirement,
    pool_address: &str,
) -> bool {
    tx.transfers.iter().any(|transfer| {
        let destination_ok =
            transfer.destination == requirement.pay_to || transfer.destination == pool_address;
        let amount_ok = transfer.amount >= requirement.amount;
        let asset_ok = match &requirement.asset {
            AssetId::Native => transfer.mint.is_none(),
            AssetId::Token(mint) => transfer.mint.as_deref() == Some(mint.as_str()),
        };
        destination_ok && amount_ok && asset_ok
    })
}

fn replayed() -> PaymentRejection {
    PaymentRejection::new(RejectReason::ReplayedProof)
        .with_message("transaction signature already consumed")
}

fn mismatch(message: impl Into<String>) -> PaymentRejection {
    PaymentRejection::new(RejectReason::RequirementMismatch).with_message(message)
}

fn store_unavailable(_: StoreError) -> PaymentRejection {
    PaymentRejection::new(RejectReason::LedgerUnavailable)
        .with_message("signature store unavailable")
}
