//! In-memory ledger fake shared by the engine tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tollgate::amount::Amount;
use tollgate::ledger::{Ledger, LedgerError, LedgerTransaction, TransferInstruction, TxStatus};
use tollgate::proto::AssetId;

pub(crate) const POOL_ADDRESS: &str = "Poo1Wa11etAddre55111111111111111111111111111";

/// A transfer the mock was asked to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentTransfer {
    pub recipient: String,
    pub amount: Amount,
    pub asset: AssetId,
}

/// Scriptable [`Ledger`] double: transactions are seeded by hand, transfers
/// are recorded, and the next `n` transfers can be made to fail.
pub(crate) struct MockLedger {
    network: String,
    transactions: Mutex<HashMap<String, LedgerTransaction>>,
    sent: Mutex<Vec<SentTransfer>>,
    fail_next_transfers: AtomicUsize,
    counter: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            network: tollgate::networks::DEVNET.to_owned(),
            transactions: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            fail_next_transfers: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn insert_transaction(&self, tx: LedgerTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.signature.clone(), tx);
    }

    /// Makes the next `n` calls to `transfer` fail.
    pub fn fail_next_transfers(&self, n: usize) {
        self.fail_next_transfers.store(n, Ordering::SeqCst);
    }

    pub fn sent_transfers(&self) -> Vec<SentTransfer> {
        self.sent.lock().unwrap().clone()
    }
}

/// Builds a confirmed transaction whose only recognized transfer pays
/// `amount` to `destination`.
pub(crate) fn confirmed_transfer(
    signature: &str,
    destination: &str,
    amount: Amount,
    mint: Option<&str>,
) -> LedgerTransaction {
    LedgerTransaction {
        signature: signature.to_owned(),
        slot: 1_000,
        block_hash: "B1ockHash1111111111111111111111111111111111".to_owned(),
        block_time: Some(tollgate::timestamp::UnixTimestamp::now()),
        succeeded: true,
        transfers: vec![TransferInstruction {
            destination: destination.to_owned(),
            amount,
            mint: mint.map(str::to_owned),
        }],
        account_keys: vec!["Payer111111111111111111111111111111111111111".to_owned()],
        pre_balances: vec![0],
        post_balances: vec![0],
    }
}

/// Builds a confirmed transaction in which the pool's native balance grows by
/// `amount`, the shape an escrow deposit check looks for.
pub(crate) fn pool_deposit_transaction(signature: &str, amount: Amount) -> LedgerTransaction {
    let lamports = amount.to_lamports().unwrap();
    LedgerTransaction {
        signature: signature.to_owned(),
        slot: 2_000,
        block_hash: "B1ockHash2222222222222222222222222222222222".to_owned(),
        block_time: Some(tollgate::timestamp::UnixTimestamp::now()),
        succeeded: true,
        transfers: vec![TransferInstruction {
            destination: POOL_ADDRESS.to_owned(),
            amount,
            mint: None,
        }],
        account_keys: vec![
            "Payer111111111111111111111111111111111111111".to_owned(),
            POOL_ADDRESS.to_owned(),
        ],
        pre_balances: vec![5_000_000_000, 1_000_000_000],
        post_balances: vec![5_000_000_000 - lamports, 1_000_000_000 + lamports],
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        Ok(self.transactions.lock().unwrap().get(signature).cloned())
    }

    async fn get_balance(&self, _address: &str) -> Result<Amount, LedgerError> {
        Ok(Amount::ZERO)
    }

    async fn transfer(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &AssetId,
    ) -> Result<String, LedgerError> {
        let remaining = self.fail_next_transfers.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_transfers
                .store(remaining - 1, Ordering::SeqCst);
            return Err(LedgerError::TransferFailed(
                "simulated transfer failure".to_owned(),
            ));
        }
        self.sent.lock().unwrap().push(SentTransfer {
            recipient: recipient.to_owned(),
            amount,
            asset: asset.clone(),
        });
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock_transfer_sig_{n}"))
    }

    async fn transaction_status(&self, signature: &str) -> Result<TxStatus, LedgerError> {
        let known = self.transactions.lock().unwrap().contains_key(signature);
        Ok(if known {
            TxStatus::Confirmed
        } else {
            TxStatus::Pending
        })
    }

    fn pool_address(&self) -> String {
        POOL_ADDRESS.to_owned()
    }

    fn network(&self) -> &str {
        &self.network
    }
}
