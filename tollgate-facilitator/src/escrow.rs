//! Pooled escrow accounts over the shared pool wallet.
//!
//! User funds live in the pool wallet on chain; per-user balances are ledger
//! entries in the [`KeyValueStore`]. Two mechanisms keep those entries
//! consistent: a per-user async lock serializes multi-step flows inside one
//! process, and every record write goes through a versioned compare-and-swap
//! so a concurrent writer (another process against the same Redis) forces a
//! reread instead of a lost update.
//!
//! Payments and withdrawals reserve the amount first and transfer second; a
//! failed transfer restores the reservation. The store is the source of
//! truth for what a user may spend, the chain is the source of truth for
//! what actually moved.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tollgate::amount::Amount;
use tollgate::ledger::{Ledger, LedgerError};
use tollgate::proto::AssetId;
use tollgate::timestamp::UnixTimestamp;
use tollgate_store::{KeyValueStore, SignatureStore, StoreError};

use crate::verifier::SIGNATURE_RETENTION_SECS;

/// Attempts before a compare-and-swap loop reports contention.
const CAS_ATTEMPTS: usize = 4;

/// Store key holding a user's escrow record.
fn escrow_key(user_id: &str) -> String {
    format!("escrow:{user_id}")
}

/// Store key holding a user's payment log, newest first.
fn payments_key(user_id: &str) -> String {
    format!("escrow:{user_id}:payments")
}

/// Largest pool-delta discrepancy a deposit check tolerates, covering
/// base-unit rounding of the quoted amount.
fn deposit_tolerance() -> Amount {
    Amount::from_base_units(1, 6)
}

/// A user's escrow account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEscrow {
    /// Caller-chosen identifier the account is keyed by.
    pub user_id: String,
    /// The user's own wallet address, used for attribution and refunds.
    pub user_wallet: String,
    /// Spendable balance.
    pub balance: Amount,
    /// Lifetime amount spent through [`EscrowManager::execute_payment`].
    pub spent: Amount,
    /// When the account was created.
    pub created_at: UnixTimestamp,
    /// When funds last arrived.
    pub last_top_up_at: UnixTimestamp,
    /// Write generation, bumped by every successful record update.
    pub version: u64,
}

/// One entry of a user's payment log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowPayment {
    /// On-chain signature of the outbound transfer.
    pub signature: String,
    /// Amount paid out.
    pub amount: Amount,
    /// Recipient address.
    pub recipient: String,
    /// Asset the payment was made in.
    pub asset: AssetId,
    /// When the payment was executed.
    pub timestamp: UnixTimestamp,
}

/// Manages pooled escrow balances and executes payments from the pool.
#[allow(missing_debug_implementations)]
pub struct EscrowManager {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn KeyValueStore>,
    signatures: Arc<dyn SignatureStore>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl EscrowManager {
    /// Creates a manager over one ledger and one store.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn KeyValueStore>,
        signatures: Arc<dyn SignatureStore>,
    ) -> Self {
        Self {
            ledger,
            store,
            signatures,
            locks: DashMap::new(),
        }
    }

    /// The pool wallet address users deposit into.
    #[must_use]
    pub fn pool_address(&self) -> String {
        self.ledger.pool_address()
    }

    /// Creates an escrow account, or returns the existing one unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::InvalidRequest`] for empty identifiers and
    /// [`EscrowError::Store`] if the record cannot be written.
    pub async fn create_escrow(
        &self,
        user_id: &str,
        user_wallet: &str,
    ) -> Result<UserEscrow, EscrowError> {
        if user_id.is_empty() || user_wallet.is_empty() {
            return Err(EscrowError::InvalidRequest(
                "userId and userWallet are required".to_owned(),
            ));
        }

        let now = UnixTimestamp::now();
        let record = UserEscrow {
            user_id: user_id.to_owned(),
            user_wallet: user_wallet.to_owned(),
            balance: Amount::ZERO,
            spent: Amount::ZERO,
            created_at: now,
            last_top_up_at: now,
            version: 0,
        };
        let encoded = serde_json::to_string(&record)?;
        if self
            .store
            .set_if_absent(&escrow_key(user_id), &encoded, None)
            .await?
        {
            tracing::info!(user = user_id, wallet = user_wallet, "escrow account created");
            return Ok(record);
        }
        self.load(user_id).await
    }

    /// Returns a user's escrow record.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::NotFound`] for unknown users.
    pub async fn escrow(&self, user_id: &str) -> Result<UserEscrow, EscrowError> {
        self.load(user_id).await
    }

    /// Returns a user's spendable balance, zero for unknown users.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Store`] if the record cannot be read.
    pub async fn balance(&self, user_id: &str) -> Result<Amount, EscrowError> {
        match self.load(user_id).await {
            Ok(record) => Ok(record.balance),
            Err(EscrowError::NotFound(_)) => Ok(Amount::ZERO),
            Err(err) => Err(err),
        }
    }

    /// Credits a deposit after verifying it on chain.
    ///
    /// The referenced transaction must have grown the pool wallet's balance
    /// by `amount` (within base-unit rounding), and its signature is consumed
    /// so the same transaction cannot be credited twice.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::DepositVerificationFailed`] when the chain does
    /// not back the claimed deposit, [`EscrowError::NotFound`] for unknown
    /// users, and [`EscrowError::InvalidRequest`] for non-positive amounts.
    pub async fn deposit(
        &self,
        user_id: &str,
        amount: Amount,
        signature: &str,
    ) -> Result<UserEscrow, EscrowError> {
        if !amount.is_positive() {
            return Err(EscrowError::InvalidRequest(format!(
                "deposit amount must be positive, got {amount}"
            )));
        }
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        // fail on unknown users before touching the chain
        self.load(user_id).await?;

        let tx = self
            .ledger
            .get_transaction(signature)
            .await?
            .ok_or_else(|| deposit_failed("transaction not found on the ledger"))?;
        if !tx.succeeded {
            return Err(deposit_failed("transaction failed on-chain"));
        }

        let pool = self.ledger.pool_address();
        let received = tx
            .balance_delta(&pool)
            .ok_or_else(|| deposit_failed(format!("transaction does not touch the pool {pool}")))?;
        let matches = received
            .abs_diff(amount)
            .is_some_and(|diff| diff <= deposit_tolerance());
        if !matches {
            return Err(deposit_failed(format!(
                "pool received {received}, expected {amount}"
            )));
        }

        // consume the signature before crediting so a concurrent claim of the
        // same transaction can never double-mint
        let fresh = self
            .signatures
            .try_register(signature, SIGNATURE_RETENTION_SECS)
            .await?;
        if !fresh {
            return Err(deposit_failed("deposit transaction already credited"));
        }

        let updated = self
            .update(user_id, |record| {
                record.balance = record
                    .balance
                    .checked_add(amount)
                    .ok_or(EscrowError::Overflow)?;
                record.last_top_up_at = UnixTimestamp::now();
                Ok(())
            })
            .await?;
        tracing::info!(user = user_id, %amount, signature, "deposit credited");
        Ok(updated)
    }

    /// Deducts `amount` from a user's balance and tracks it as spent.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::InsufficientBalance`] when the balance does not
    /// cover the amount; the record is left untouched.
    pub async fn deduct(&self, user_id: &str, amount: Amount) -> Result<UserEscrow, EscrowError> {
        if !amount.is_positive() {
            return Err(EscrowError::InvalidRequest(format!(
                "deduction must be positive, got {amount}"
            )));
        }
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        self.reserve(user_id, amount, true).await
    }

    /// Pays `recipient` from a user's escrow balance.
    ///
    /// Reserves the amount, submits the pool-signed transfer, and appends the
    /// payment to the user's log. A failed transfer restores the reservation
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::InsufficientBalance`] before anything is sent,
    /// or [`EscrowError::Transfer`] when the chain rejected the transfer and
    /// the reservation was rolled back.
    pub async fn execute_payment(
        &self,
        user_id: &str,
        recipient: &str,
        amount: Amount,
        asset: &AssetId,
    ) -> Result<String, EscrowError> {
        if !amount.is_positive() {
            return Err(EscrowError::InvalidRequest(format!(
                "payment amount must be positive, got {amount}"
            )));
        }
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        self.reserve(user_id, amount, true).await?;
        match self.ledger.transfer(recipient, amount, asset).await {
            Ok(signature) => {
                let entry = EscrowPayment {
                    signature: signature.clone(),
                    amount,
                    recipient: recipient.to_owned(),
                    asset: asset.clone(),
                    timestamp: UnixTimestamp::now(),
                };
                if let Err(err) = self.append_payment(user_id, &entry).await {
                    tracing::warn!(user = user_id, %err, "payment sent but not logged");
                }
                tracing::info!(user = user_id, recipient, %amount, signature, "escrow payment sent");
                Ok(signature)
            }
            Err(err) => {
                self.restore(user_id, amount, true).await;
                Err(transfer_error(err))
            }
        }
    }

    /// Withdraws funds from escrow back to `destination`.
    ///
    /// Only the balance is reduced; withdrawn funds do not count as spent.
    /// A failed transfer restores the balance.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::InsufficientBalance`] before anything is sent,
    /// or [`EscrowError::Transfer`] when the chain rejected the transfer and
    /// the balance was restored.
    pub async fn withdraw(
        &self,
        user_id: &str,
        amount: Amount,
        destination: &str,
    ) -> Result<String, EscrowError> {
        if !amount.is_positive() {
            return Err(EscrowError::InvalidRequest(format!(
                "withdrawal must be positive, got {amount}"
            )));
        }
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        self.reserve(user_id, amount, false).await?;
        match self
            .ledger
            .transfer(destination, amount, &AssetId::Native)
            .await
        {
            Ok(signature) => {
                tracing::info!(user = user_id, destination, %amount, signature, "withdrawal sent");
                Ok(signature)
            }
            Err(err) => {
                self.restore(user_id, amount, false).await;
                Err(transfer_error(err))
            }
        }
    }

    /// Returns up to `limit` most recent payments of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Store`] if the log cannot be read.
    pub async fn history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<EscrowPayment>, EscrowError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = i64::try_from(limit).map_or(i64::MAX - 1, |l| l - 1);
        let entries = self.store.range(&payments_key(user_id), 0, stop).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(payment) => Some(payment),
                Err(err) => {
                    tracing::warn!(user = user_id, %err, "skipping corrupt payment log entry");
                    None
                }
            })
            .collect())
    }

    /// Subtracts `amount` from the balance, optionally tracking it as spent.
    async fn reserve(
        &self,
        user_id: &str,
        amount: Amount,
        track_spent: bool,
    ) -> Result<UserEscrow, EscrowError> {
        self.update(user_id, |record| {
            let remaining = record
                .balance
                .checked_sub(amount)
                .filter(|b| !b.is_negative())
                .ok_or(EscrowError::InsufficientBalance {
                    available: record.balance,
                    required: amount,
                })?;
            record.balance = remaining;
            if track_spent {
                record.spent = record
                    .spent
                    .checked_add(amount)
                    .ok_or(EscrowError::Overflow)?;
            }
            Ok(())
        })
        .await
    }

    /// Puts a failed reservation back. Failure here is logged, not returned:
    /// the caller is already propagating the transfer error.
    async fn restore(&self, user_id: &str, amount: Amount, spent_too: bool) {
        let result = self
            .update(user_id, |record| {
                record.balance = record
                    .balance
                    .checked_add(amount)
                    .ok_or(EscrowError::Overflow)?;
                if spent_too {
                    record.spent = record.spent.checked_sub(amount).unwrap_or(Amount::ZERO);
                }
                Ok(())
            })
            .await;
        if let Err(err) = result {
            tracing::error!(
                user = user_id,
                %amount,
                %err,
                "failed to restore reservation after transfer failure"
            );
        }
    }

    async fn append_payment(&self, user_id: &str, entry: &EscrowPayment) -> Result<(), EscrowError> {
        let encoded = serde_json::to_string(entry)?;
        self.store
            .push_front(&payments_key(user_id), &encoded)
            .await?;
        Ok(())
    }

    async fn load(&self, user_id: &str) -> Result<UserEscrow, EscrowError> {
        let raw = self
            .store
            .get(&escrow_key(user_id))
            .await?
            .ok_or_else(|| EscrowError::NotFound(user_id.to_owned()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Read-modify-write with a versioned compare-and-swap.
    async fn update<F>(&self, user_id: &str, mutate: F) -> Result<UserEscrow, EscrowError>
    where
        F: Fn(&mut UserEscrow) -> Result<(), EscrowError> + Send,
    {
        let key = escrow_key(user_id);
        for _ in 0..CAS_ATTEMPTS {
            let raw = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| EscrowError::NotFound(user_id.to_owned()))?;
            let mut record: UserEscrow = serde_json::from_str(&raw)?;
            mutate(&mut record)?;
            record.version += 1;
            let updated = serde_json::to_string(&record)?;
            if self
                .store
                .compare_and_swap(&key, Some(&raw), &updated)
                .await?
            {
                return Ok(record);
            }
        }
        Err(EscrowError::Contended(user_id.to_owned()))
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(user_id.to_owned()).or_default().clone()
    }
}

fn deposit_failed(message: impl Into<String>) -> EscrowError {
    EscrowError::DepositVerificationFailed(message.into())
}

fn transfer_error(err: LedgerError) -> EscrowError {
    match err {
        LedgerError::TransferFailed(message) => EscrowError::Transfer(message),
        other => EscrowError::Ledger(other),
    }
}

/// Errors from escrow operations.
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    /// No escrow account exists for the user.
    #[error("escrow account not found: {0}")]
    NotFound(String),

    /// The balance does not cover the requested amount.
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        /// Spendable balance at the time of the attempt.
        available: Amount,
        /// Amount the operation needed.
        required: Amount,
    },

    /// The claimed deposit is not backed by the chain.
    #[error("deposit verification failed: {0}")]
    DepositVerificationFailed(String),

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The outbound transfer was rejected; the reservation was rolled back.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Balance arithmetic left the representable range.
    #[error("escrow arithmetic overflowed")]
    Overflow,

    /// The record kept changing under the compare-and-swap retry budget.
    #[error("escrow record for {0} is under too much contention")]
    Contended(String),

    /// The ledger could not be queried.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored record could not be decoded.
    #[error("stored escrow data is corrupt: {0}")]
    Codec(#[from] serde_json::Error),
}
