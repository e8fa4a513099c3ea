//! The opaque chain-query and transfer capability.
//!
//! The verification and escrow engines never talk to a blockchain directly.
//! They consume a [`Ledger`]: a narrow, trait-object-safe surface covering
//! exactly the operations the protocol needs (fetch a transaction, read a
//! balance, submit a pool-signed transfer, poll a signature's status). A
//! chain-specific crate implements it; tests substitute an in-memory fake.
//!
//! Raw instruction decoding happens behind this trait too: a fetched
//! [`LedgerTransaction`] carries already-parsed [`TransferInstruction`]s, so
//! the verifier matches on a tagged struct instead of untyped instruction
//! fields.

use async_trait::async_trait;

use crate::amount::Amount;
use crate::proto::AssetId;
use crate::timestamp::UnixTimestamp;

/// A single recognized transfer inside a ledger transaction.
///
/// Produced by the chain-specific parsing step from token-program and
/// system-program instructions. `mint` is `None` for native-currency moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInstruction {
    /// Destination address of the transfer.
    pub destination: String,
    /// Transferred amount in currency units (not base units).
    pub amount: Amount,
    /// Token mint address, or `None` for the native currency.
    pub mint: Option<String>,
}

/// Confirmation state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet visible or not yet confirmed.
    Pending,
    /// Confirmed at the ledger's confirmation level.
    Confirmed,
    /// Included but failed during execution.
    Failed,
}

/// A confirmed-or-failed transaction fetched from the ledger.
#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    /// The transaction's signature.
    pub signature: String,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Recent blockhash of the transaction's message.
    pub block_hash: String,
    /// Block time, when the ledger reports one.
    pub block_time: Option<UnixTimestamp>,
    /// `true` if the transaction executed without error.
    pub succeeded: bool,
    /// Transfers recognized inside the transaction.
    pub transfers: Vec<TransferInstruction>,
    /// Account addresses referenced by the transaction, in message order.
    pub account_keys: Vec<String>,
    /// Native-currency balances before execution, indexed like `account_keys`.
    pub pre_balances: Vec<u64>,
    /// Native-currency balances after execution, indexed like `account_keys`.
    pub post_balances: Vec<u64>,
}

impl LedgerTransaction {
    /// Returns the native-currency balance change of `address` in this
    /// transaction, or `None` if the address is not referenced.
    ///
    /// Negative for the paying account, positive for the receiving one. This
    /// is how escrow deposits are verified: the pool address must have gained
    /// the deposited amount.
    #[must_use]
    pub fn balance_delta(&self, address: &str) -> Option<Amount> {
        let idx = self.account_keys.iter().position(|key| key == address)?;
        let pre = i128::from(*self.pre_balances.get(idx)?);
        let post = i128::from(*self.post_balances.get(idx)?);
        Some(Amount::from_base_unit_delta(
            post - pre,
            crate::amount::NATIVE_DECIMALS,
        ))
    }

    /// Iterates over the recognized transfers whose destination is `address`.
    pub fn transfers_to<'a>(
        &'a self,
        address: &'a str,
    ) -> impl Iterator<Item = &'a TransferInstruction> {
        self.transfers
            .iter()
            .filter(move |t| t.destination == address)
    }
}

/// Chain-query and transfer operations the engines depend on.
///
/// Implementations must be safe to share across tasks (`Arc<dyn Ledger>`).
/// Every method is expected to enforce its own request deadline; a timed-out
/// query is an error, never an implicit success.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fetches a transaction by signature.
    ///
    /// Returns `Ok(None)` when the signature is unknown to the ledger. An RPC
    /// failure is an error so callers can fail closed instead of treating the
    /// transaction as absent.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be queried.
    async fn get_transaction(&self, signature: &str)
    -> Result<Option<LedgerTransaction>, LedgerError>;

    /// Reads the native-currency balance of an address.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the address is malformed or the ledger
    /// cannot be queried.
    async fn get_balance(&self, address: &str) -> Result<Amount, LedgerError>;

    /// Submits a pool-signed transfer and waits for confirmation.
    ///
    /// Returns the transaction signature once the ledger confirms it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TransferFailed`] if the transaction could not be
    /// submitted or confirmed; the caller is responsible for compensating any
    /// reservation it made beforehand.
    async fn transfer(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &AssetId,
    ) -> Result<String, LedgerError>;

    /// Polls the confirmation status of a signature.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be queried.
    async fn transaction_status(&self, signature: &str) -> Result<TxStatus, LedgerError>;

    /// The pool wallet address this ledger signs transfers with.
    fn pool_address(&self) -> String;

    /// The network name this ledger is attached to (see [`crate::networks`]).
    fn network(&self) -> &str;
}

/// Errors from the ledger capability.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The RPC endpoint failed or returned an unusable response.
    #[error("ledger rpc error: {0}")]
    Rpc(String),

    /// The request exceeded its deadline.
    #[error("ledger request timed out after {0}s")]
    Timeout(u64),

    /// An address could not be parsed for this chain.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A signing key could not be parsed.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// An amount could not be converted to base units for this chain.
    #[error("invalid transfer amount: {0}")]
    InvalidAmount(String),

    /// A submitted transfer was rejected or never confirmed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction_with_balances() -> LedgerTransaction {
        LedgerTransaction {
            signature: "sig".into(),
            slot: 42,
            block_hash: "hash".into(),
            block_time: None,
            succeeded: true,
            transfers: vec![
                TransferInstruction {
                    destination: "pool".into(),
                    amount: "1.5".parse().unwrap(),
                    mint: None,
                },
                TransferInstruction {
                    destination: "merchant".into(),
                    amount: "0.5".parse().unwrap(),
                    mint: Some("Mint111".into()),
                },
            ],
            account_keys: vec!["payer".into(), "pool".into()],
            pre_balances: vec![2_000_000_000, 500_000_000],
            post_balances: vec![495_000_000, 2_000_000_000],
        }
    }

    #[test]
    fn test_balance_delta_signs() {
        let tx = transaction_with_balances();
        let gained = tx.balance_delta("pool").unwrap();
        assert_eq!(gained, "1.5".parse().unwrap());
        let spent = tx.balance_delta("payer").unwrap();
        assert!(spent.is_negative());
        assert!(tx.balance_delta("stranger").is_none());
    }

    #[test]
    fn test_transfers_to_filters_destination() {
        let tx = transaction_with_balances();
        let to_pool: Vec<_> = tx.transfers_to("pool").collect();
        assert_eq!(to_pool.len(), 1);
        assert_eq!(to_pool[0].mint, None);
        assert_eq!(tx.transfers_to("nobody").count(), 0);
    }
}
