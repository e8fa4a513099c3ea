//! Client-side spending guard for delegated payment sessions.
//!
//! A [`SessionWallet`] holds a signing key together with a [`PaymentApproval`]
//! budget and refuses to sign outside it: expired approvals, the cumulative
//! session total, per-transaction caps, and an optional recipient allow-list
//! are all checked before any transaction is built. Spent budget advances
//! only after on-chain confirmation, so a failed transfer never consumes it.
//!
//! Payments within one session are serialized behind an async lock; one
//! wallet binds one signer to one approval.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use solana_transaction::Transaction;
use tokio::sync::Mutex;
use tollgate::amount::Amount;
use tollgate::ledger::LedgerError;
use tollgate::proto::AssetId;
use tollgate::timestamp::UnixTimestamp;

use crate::ledger;

/// A spending authorization delegated to one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentApproval {
    /// Cumulative amount the session may spend.
    pub max_total_amount: Amount,
    /// Cap on any single payment.
    pub max_per_transaction: Amount,
    /// Recipients payments may go to; `None` permits any recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_recipients: Option<Vec<String>>,
    /// Instant the approval stops authorizing payments.
    pub expires_at: UnixTimestamp,
}

impl PaymentApproval {
    /// Creates an approval valid for `ttl_secs` from now.
    #[must_use]
    pub fn new(max_total_amount: Amount, max_per_transaction: Amount, ttl_secs: u64) -> Self {
        Self {
            max_total_amount,
            max_per_transaction,
            allowed_recipients: None,
            expires_at: UnixTimestamp::now() + ttl_secs,
        }
    }

    /// Restricts payments to `recipients`.
    #[must_use]
    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.allowed_recipients = Some(recipients);
        self
    }

    /// `true` once the approval deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_past()
    }

    /// `true` if the allow-list permits `recipient`.
    #[must_use]
    pub fn permits_recipient(&self, recipient: &str) -> bool {
        self.allowed_recipients
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|entry| entry == recipient))
    }
}

/// One payment in a batch.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    /// Destination wallet address.
    pub recipient: String,
    /// Amount in currency units.
    pub amount: Amount,
    /// Asset to pay with.
    pub asset: AssetId,
}

/// An unsigned payment transaction that passed every session check.
#[derive(Debug, Clone)]
pub struct PreparedPayment {
    /// The transfer, with a fresh recent blockhash and the session signer as
    /// fee payer. Not yet signed.
    pub transaction: Transaction,
    /// `true` when the signer must confirm interactively before submission.
    /// Local keypair sessions never require it.
    pub requires_approval: bool,
}

/// Reasons a session payment was refused or failed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The approval deadline has passed.
    #[error("payment approval expired at {0}")]
    ApprovalExpired(UnixTimestamp),

    /// The payment would push the session past its total budget.
    #[error("total spending limit exceeded: spent {spent}, requested {requested}, limit {limit}")]
    TotalLimitExceeded {
        /// Budget already consumed.
        spent: Amount,
        /// Amount the caller asked for.
        requested: Amount,
        /// The approval's total budget.
        limit: Amount,
    },

    /// The payment exceeds the per-transaction cap.
    #[error("per-transaction limit exceeded: requested {requested}, limit {limit}")]
    PerTransactionLimitExceeded {
        /// Amount the caller asked for.
        requested: Amount,
        /// The approval's per-transaction cap.
        limit: Amount,
    },

    /// The recipient is not in the approval's allow-list.
    #[error("recipient {0} not in allowed list")]
    RecipientNotAllowed(String),

    /// A wallet address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The amount has no base-unit representation for the asset.
    #[error("invalid payment amount: {0}")]
    InvalidAmount(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The RPC endpoint failed or the transfer was not confirmed.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A batch stopped partway; earlier payments did confirm.
    #[error("batch stopped at payment {failed_index}: {source}")]
    BatchFailed {
        /// Signatures of the payments confirmed before the failure.
        completed: Vec<String>,
        /// Index of the failing payment.
        failed_index: usize,
        /// The failure itself.
        source: Box<SessionError>,
    },
}

impl From<LedgerError> for SessionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAddress(address) => Self::InvalidAddress(address),
            LedgerError::InvalidAmount(amount) => Self::InvalidAmount(amount),
            LedgerError::Timeout(secs) => Self::Rpc(format!("timed out after {secs}s")),
            LedgerError::Rpc(message)
            | LedgerError::InvalidKey(message)
            | LedgerError::TransferFailed(message) => Self::Rpc(message),
        }
    }
}

/// A budget-guarded signer for session payments.
pub struct SessionWallet<S> {
    rpc: Arc<RpcClient>,
    signer: S,
    approval: PaymentApproval,
    spent: Mutex<Amount>,
}

impl<S: Signer> fmt::Debug for SessionWallet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionWallet")
            .field("signer", &self.signer.pubkey())
            .field("approval", &self.approval)
            .finish_non_exhaustive()
    }
}

impl<S: Signer + Sync> SessionWallet<S> {
    /// Binds `signer` to `approval` over the given RPC client.
    pub fn new(rpc: Arc<RpcClient>, signer: S, approval: PaymentApproval) -> Self {
        Self {
            rpc,
            signer,
            approval,
            spent: Mutex::new(Amount::ZERO),
        }
    }

    /// The session signer's public key.
    #[must_use]
    pub fn public_key(&self) -> Pubkey {
        self.signer.pubkey()
    }

    /// The approval this session operates under.
    #[must_use]
    pub const fn approval(&self) -> &PaymentApproval {
        &self.approval
    }

    /// `true` once the approval deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.approval.is_expired()
    }

    /// Budget consumed by confirmed payments.
    pub async fn spent(&self) -> Amount {
        *self.spent.lock().await
    }

    /// Budget still available to the session.
    pub async fn remaining_budget(&self) -> Amount {
        let spent = self.spent().await;
        self.approval
            .max_total_amount
            .checked_sub(spent)
            .unwrap_or(Amount::ZERO)
    }

    /// Runs every session check and builds an unsigned transfer.
    ///
    /// The transaction is not submitted and consumes no budget;
    /// [`execute_payment`](Self::execute_payment) is the submitting variant.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if a session check refuses the payment or the
    /// transaction cannot be built.
    pub async fn create_payment_transaction(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &AssetId,
    ) -> Result<PreparedPayment, SessionError> {
        {
            let spent = self.spent.lock().await;
            self.admit(*spent, recipient, amount)?;
        }
        let transaction = self.build_transfer(recipient, amount, asset).await?;
        Ok(PreparedPayment {
            transaction,
            requires_approval: false,
        })
    }

    /// Checks, signs, submits, and confirms a payment.
    ///
    /// Budget is consumed only after the ledger confirms the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if a session check refuses the payment or
    /// submission fails; refused and failed payments consume no budget.
    pub async fn execute_payment(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &AssetId,
    ) -> Result<String, SessionError> {
        let mut spent = self.spent.lock().await;
        let new_total = self.admit(*spent, recipient, amount)?;
        let signature = self.submit(recipient, amount, asset).await?;
        *spent = new_total;
        #[cfg(feature = "telemetry")]
        tracing::debug!(%signature, recipient, "session payment confirmed");
        Ok(signature)
    }

    /// Executes several payments sequentially under one lock.
    ///
    /// Every item is checked up front, including the cumulative session
    /// total, before anything is signed. A mid-batch failure stops the batch
    /// and reports the signatures that did confirm.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the plan is refused, or
    /// [`SessionError::BatchFailed`] if a payment fails after earlier ones
    /// confirmed.
    pub async fn batch_payments(
        &self,
        payments: &[PaymentIntent],
    ) -> Result<Vec<String>, SessionError> {
        let mut spent = self.spent.lock().await;

        let mut running = *spent;
        let mut totals = Vec::with_capacity(payments.len());
        for payment in payments {
            running = self.admit(running, &payment.recipient, payment.amount)?;
            totals.push(running);
        }

        let mut completed = Vec::with_capacity(payments.len());
        for (index, payment) in payments.iter().enumerate() {
            match self
                .submit(&payment.recipient, payment.amount, &payment.asset)
                .await
            {
                Ok(signature) => {
                    *spent = totals[index];
                    completed.push(signature);
                }
                Err(err) => {
                    return Err(SessionError::BatchFailed {
                        completed,
                        failed_index: index,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(completed)
    }

    /// Applies the session checks to one payment against `spent`, returning
    /// the total after it.
    fn admit(&self, spent: Amount, recipient: &str, amount: Amount) -> Result<Amount, SessionError> {
        if self.approval.is_expired() {
            return Err(SessionError::ApprovalExpired(self.approval.expires_at));
        }
        let new_total = spent
            .checked_add(amount)
            .filter(|total| *total <= self.approval.max_total_amount)
            .ok_or(SessionError::TotalLimitExceeded {
                spent,
                requested: amount,
                limit: self.approval.max_total_amount,
            })?;
        if amount > self.approval.max_per_transaction {
            return Err(SessionError::PerTransactionLimitExceeded {
                requested: amount,
                limit: self.approval.max_per_transaction,
            });
        }
        if !self.approval.permits_recipient(recipient) {
            return Err(SessionError::RecipientNotAllowed(recipient.to_owned()));
        }
        Ok(new_total)
    }

    async fn build_transfer(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &AssetId,
    ) -> Result<Transaction, SessionError> {
        let to = ledger::parse_pubkey(recipient)?;
        let payer = self.signer.pubkey();
        let instruction =
            ledger::transfer_instruction_for(&self.rpc, &payer, &to, amount, asset).await?;
        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|err| SessionError::Rpc(err.to_string()))?;
        let mut transaction = Transaction::new_with_payer(&[instruction], Some(&payer));
        transaction.message.recent_blockhash = blockhash;
        Ok(transaction)
    }

    async fn submit(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &AssetId,
    ) -> Result<String, SessionError> {
        let mut transaction = self.build_transfer(recipient, amount, asset).await?;
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_sign(&[&self.signer], blockhash)
            .map_err(|err| SessionError::Signing(err.to_string()))?;
        let signature = self
            .rpc
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(|err| SessionError::Rpc(err.to_string()))?;
        Ok(signature.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_keypair::Keypair;

    const MERCHANT: &str = "HN7cABqLq46Es1jh92dQQisAq662SmxELLLsHHe4YWrH";

    fn wallet(approval: PaymentApproval) -> SessionWallet<Keypair> {
        // The checks fire before any RPC traffic, so an unroutable endpoint
        // keeps these tests offline.
        let rpc = Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()));
        SessionWallet::new(rpc, Keypair::new(), approval)
    }

    fn approval(total: &str, per_tx: &str) -> PaymentApproval {
        PaymentApproval::new(total.parse().unwrap(), per_tx.parse().unwrap(), 600)
    }

    #[tokio::test]
    async fn test_rejects_expired_approval() {
        let mut approval = approval("10", "1");
        approval.expires_at = UnixTimestamp::from_secs(1_000);
        let wallet = wallet(approval);

        let result = wallet
            .execute_payment(MERCHANT, "0.5".parse().unwrap(), &AssetId::Native)
            .await;

        assert!(matches!(result, Err(SessionError::ApprovalExpired(_))));
    }

    #[tokio::test]
    async fn test_total_budget_checked_before_per_transaction_cap() {
        let wallet = wallet(approval("3", "10"));

        let result = wallet
            .execute_payment(MERCHANT, "5".parse().unwrap(), &AssetId::Native)
            .await;

        assert!(matches!(
            result,
            Err(SessionError::TotalLimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_amount_over_per_transaction_cap() {
        let wallet = wallet(approval("10", "1"));

        let result = wallet
            .execute_payment(MERCHANT, "2".parse().unwrap(), &AssetId::Native)
            .await;

        assert!(matches!(
            result,
            Err(SessionError::PerTransactionLimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_recipient_outside_allowlist() {
        let approval = approval("10", "5").with_recipients(vec!["SomeoneElse".into()]);
        let wallet = wallet(approval);

        let result = wallet
            .execute_payment(MERCHANT, "1".parse().unwrap(), &AssetId::Native)
            .await;

        assert!(matches!(result, Err(SessionError::RecipientNotAllowed(_))));
    }

    #[tokio::test]
    async fn test_admitted_payment_reaches_address_parsing() {
        // All checks pass; the bogus recipient then fails pubkey parsing
        // before any network call.
        let wallet = wallet(approval("10", "5"));

        let result = wallet
            .execute_payment("not-a-pubkey", "1".parse().unwrap(), &AssetId::Native)
            .await;

        assert!(matches!(result, Err(SessionError::InvalidAddress(_))));
        assert_eq!(wallet.spent().await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_batch_prechecks_cumulative_total() {
        let wallet = wallet(approval("3", "2"));
        let intent = |amount: &str| PaymentIntent {
            recipient: MERCHANT.to_owned(),
            amount: amount.parse().unwrap(),
            asset: AssetId::Native,
        };

        let result = wallet.batch_payments(&[intent("2"), intent("2")]).await;

        assert!(matches!(
            result,
            Err(SessionError::TotalLimitExceeded { .. })
        ));
        assert_eq!(wallet.spent().await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_budget_accessors_before_any_spending() {
        let wallet = wallet(approval("10", "5"));

        assert_eq!(wallet.spent().await, Amount::ZERO);
        assert_eq!(wallet.remaining_budget().await, "10".parse().unwrap());
        assert!(!wallet.is_expired());
    }

    #[test]
    fn test_approval_serializes_camel_case() {
        let approval = PaymentApproval {
            max_total_amount: "10".parse().unwrap(),
            max_per_transaction: "1".parse().unwrap(),
            allowed_recipients: None,
            expires_at: UnixTimestamp::from_secs(1_900_000_000),
        };

        let value = serde_json::to_value(&approval).unwrap();

        assert_eq!(value["maxTotalAmount"], "10");
        assert_eq!(value["maxPerTransaction"], "1");
        assert_eq!(value["expiresAt"], "1900000000");
        assert!(value.get("allowedRecipients").is_none());
    }
}
