//! Merchant settlement: batching, fees, payout, and the periodic sweep.
//!
//! Verified payments accumulate per merchant in an unsettled list. A
//! settlement drains that list, takes the platform fee, and pays the
//! remainder to the merchant wallet in one pool-signed transfer. The
//! `settle:{merchant}:pending` marker makes requests mutually exclusive
//! across processes; its TTL releases the claim if a process dies mid-run.
//!
//! A settlement only reaches `completed` after the payout confirms. When the
//! transfer fails, the drained batch goes back to the unsettled list and the
//! settlement is recorded as `failed`, so no payment is ever silently
//! dropped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::distr::{Alphanumeric, SampleString};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tollgate::amount::Amount;
use tollgate::ledger::Ledger;
use tollgate::proto::{AssetId, PaymentReceipt};
use tollgate::timestamp::UnixTimestamp;
use tollgate_http::webhook::WebhookNotifier;
use tollgate_store::{KeyValueStore, StoreError};

/// Seconds the pending marker survives a crashed settlement attempt.
const PENDING_MARKER_TTL_SECS: u64 = 600;

fn unsettled_key(merchant: &str) -> String {
    format!("settle:{merchant}:unsettled")
}

fn pending_key(merchant: &str) -> String {
    format!("settle:{merchant}:pending")
}

fn last_key(merchant: &str) -> String {
    format!("settle:{merchant}:last")
}

fn history_key(merchant: &str) -> String {
    format!("settle:{merchant}:history")
}

fn settlement_key(id: &str) -> String {
    format!("settlement:{id}")
}

fn settlement_id() -> String {
    format!("stl_{}", Alphanumeric.sample_string(&mut rand::rng(), 16))
}

/// Fee and cadence policy for settlements.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementPolicy {
    /// Platform fee as a fraction of the settled total.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// Pending total at which the sweep settles a merchant immediately.
    #[serde(default = "default_minimum_amount")]
    pub minimum_amount: Amount,

    /// Seconds after which pending funds settle regardless of the minimum.
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    /// Seconds between sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Asset merchant payouts are made in.
    #[serde(default = "default_payout_asset")]
    pub payout_asset: AssetId,
}

fn default_fee_rate() -> Decimal {
    // 2%
    Decimal::new(2, 2)
}

fn default_minimum_amount() -> Amount {
    Amount::from_decimal(Decimal::TEN)
}

fn default_max_interval_secs() -> u64 {
    86_400
}

fn default_sweep_interval_secs() -> u64 {
    3_600
}

fn default_payout_asset() -> AssetId {
    AssetId::Native
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            fee_rate: default_fee_rate(),
            minimum_amount: default_minimum_amount(),
            max_interval_secs: default_max_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            payout_asset: default_payout_asset(),
        }
    }
}

/// Lifecycle state of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// Created, payout not yet confirmed.
    Pending,
    /// Payout confirmed on chain.
    Completed,
    /// Payout failed; the batch went back to the unsettled list.
    Failed,
}

/// One settlement run for a merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    /// Generated identifier, `stl_` followed by a random token.
    pub id: String,
    /// Merchant wallet the payout goes to.
    pub merchant_wallet: String,
    /// Sum of the settled payments.
    pub total_amount: Amount,
    /// Fee retained by the platform.
    pub platform_fee: Amount,
    /// Amount paid to the merchant after the fee.
    pub merchant_amount: Amount,
    /// Number of payments in the batch.
    pub transaction_count: u64,
    /// Current lifecycle state.
    pub status: SettlementStatus,
    /// When the settlement was requested.
    pub requested_at: UnixTimestamp,
    /// When the payout confirmed or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<UnixTimestamp>,
    /// Signature of the payout transfer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_signature: Option<String>,
    /// What went wrong, for failed settlements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Unsettled totals for a merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    /// Merchant wallet the payments accumulated for.
    pub merchant_wallet: String,
    /// Sum of unsettled payment amounts.
    pub pending_amount: Amount,
    /// Number of unsettled payments.
    pub transaction_count: u64,
}

/// Webhook endpoint notified of completed settlements.
#[derive(Debug)]
pub struct WebhookTarget {
    url: String,
    notifier: WebhookNotifier,
}

impl WebhookTarget {
    /// Creates a target delivering signed events to `url`.
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            notifier: WebhookNotifier::new(secret),
        }
    }
}

/// Batches verified payments per merchant and settles them with a fee.
#[allow(missing_debug_implementations)]
pub struct SettlementEngine {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn KeyValueStore>,
    policy: SettlementPolicy,
    webhook: Option<WebhookTarget>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SettlementEngine {
    /// Creates an engine with the given payout policy.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn KeyValueStore>,
        policy: SettlementPolicy,
        webhook: Option<WebhookTarget>,
    ) -> Self {
        Self {
            ledger,
            store,
            policy,
            webhook,
            locks: DashMap::new(),
        }
    }

    /// Queues a verified payment for later settlement to `merchant`.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidRequest`] for an empty merchant
    /// wallet and [`SettlementError::Store`] if the list cannot be written.
    pub async fn record_payment(
        &self,
        merchant: &str,
        receipt: &PaymentReceipt,
    ) -> Result<(), SettlementError> {
        if merchant.is_empty() {
            return Err(SettlementError::InvalidRequest(
                "merchantWallet is required".to_owned(),
            ));
        }
        let encoded = serde_json::to_string(receipt)?;
        self.store
            .push_front(&unsettled_key(merchant), &encoded)
            .await?;
        tracing::debug!(
            merchant,
            amount = %receipt.amount,
            "payment recorded for settlement"
        );
        Ok(())
    }

    /// Returns the unsettled totals for a merchant.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Store`] if the list cannot be read.
    pub async fn pending(&self, merchant: &str) -> Result<PendingSummary, SettlementError> {
        let entries = self.store.range(&unsettled_key(merchant), 0, -1).await?;
        let mut pending_amount = Amount::ZERO;
        let mut transaction_count = 0u64;
        for entry in &entries {
            if let Ok(receipt) = serde_json::from_str::<PaymentReceipt>(entry) {
                pending_amount = pending_amount
                    .checked_add(receipt.amount)
                    .ok_or(SettlementError::Overflow)?;
                transaction_count += 1;
            }
        }
        Ok(PendingSummary {
            merchant_wallet: merchant.to_owned(),
            pending_amount,
            transaction_count,
        })
    }

    /// Settles everything currently pending for `merchant`.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::AlreadyPending`] while another settlement
    /// for the merchant is in flight, [`SettlementError::NothingToSettle`]
    /// when the unsettled list is empty, and [`SettlementError::Payout`] when
    /// the transfer failed and the batch was restored.
    pub async fn request_settlement(&self, merchant: &str) -> Result<Settlement, SettlementError> {
        if merchant.is_empty() {
            return Err(SettlementError::InvalidRequest(
                "merchantWallet is required".to_owned(),
            ));
        }
        let lock = self.merchant_lock(merchant);
        let _guard = lock.lock().await;

        let id = settlement_id();
        let claimed = self
            .store
            .set_if_absent(&pending_key(merchant), &id, Some(PENDING_MARKER_TTL_SECS))
            .await?;
        if !claimed {
            return Err(SettlementError::AlreadyPending(merchant.to_owned()));
        }

        let outcome = self.settle_batch(merchant, &id).await;
        if let Err(err) = self.store.del(&pending_key(merchant)).await {
            tracing::warn!(merchant, %err, "failed to release settlement marker");
        }
        outcome
    }

    /// Looks up a settlement by id.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::NotFound`] for unknown ids.
    pub async fn settlement(&self, id: &str) -> Result<Settlement, SettlementError> {
        let raw = self
            .store
            .get(&settlement_key(id))
            .await?
            .ok_or_else(|| SettlementError::NotFound(id.to_owned()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Returns up to `limit` most recent settlements of a merchant, newest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Store`] if the history cannot be read.
    pub async fn history(
        &self,
        merchant: &str,
        limit: usize,
    ) -> Result<Vec<Settlement>, SettlementError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = i64::try_from(limit).map_or(i64::MAX - 1, |l| l - 1);
        let ids = self.store.range(&history_key(merchant), 0, stop).await?;
        let mut settlements = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.settlement(id).await {
                Ok(settlement) => settlements.push(settlement),
                Err(SettlementError::NotFound(_)) => {
                    tracing::warn!(merchant, id, "settlement row missing for history entry");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(settlements)
    }

    /// When the merchant last settled, if ever.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Store`] if the timestamp cannot be read.
    pub async fn last_settled_at(
        &self,
        merchant: &str,
    ) -> Result<Option<UnixTimestamp>, SettlementError> {
        let raw = self.store.get(&last_key(merchant)).await?;
        Ok(raw
            .and_then(|value| value.parse::<u64>().ok())
            .map(UnixTimestamp::from_secs))
    }

    /// Settles every merchant that is due under the policy.
    ///
    /// Errors are logged per merchant; one failing merchant does not stop
    /// the sweep.
    pub async fn run_sweep(&self) {
        let keys = match self.store.keys_with_prefix("settle:").await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(%err, "settlement sweep could not scan the store");
                return;
            }
        };

        for key in keys {
            let Some(merchant) = key
                .strip_prefix("settle:")
                .and_then(|rest| rest.strip_suffix(":unsettled"))
            else {
                continue;
            };
            match self.due_for_sweep(merchant).await {
                Ok(false) => {}
                Ok(true) => match self.request_settlement(merchant).await {
                    Ok(settlement) => {
                        tracing::info!(
                            merchant,
                            settlement = %settlement.id,
                            amount = %settlement.merchant_amount,
                            "sweep settled merchant"
                        );
                    }
                    Err(
                        SettlementError::AlreadyPending(_) | SettlementError::NothingToSettle(_),
                    ) => {}
                    Err(err) => tracing::warn!(merchant, %err, "sweep settlement failed"),
                },
                Err(err) => tracing::warn!(merchant, %err, "sweep could not evaluate merchant"),
            }
        }
    }

    async fn due_for_sweep(&self, merchant: &str) -> Result<bool, SettlementError> {
        let pending = self.pending(merchant).await?;
        if pending.transaction_count == 0 {
            return Ok(false);
        }
        if pending.pending_amount >= self.policy.minimum_amount {
            return Ok(true);
        }
        Ok(match self.last_settled_at(merchant).await? {
            Some(last) => last.elapsed_secs() >= self.policy.max_interval_secs,
            // has pending funds but never settled before
            None => true,
        })
    }

    async fn settle_batch(&self, merchant: &str, id: &str) -> Result<Settlement, SettlementError> {
        let key = unsettled_key(merchant);
        let raw_batch = self.store.range(&key, 0, -1).await?;
        if raw_batch.is_empty() {
            return Err(SettlementError::NothingToSettle(merchant.to_owned()));
        }

        let mut total_amount = Amount::ZERO;
        let mut transaction_count = 0u64;
        for entry in &raw_batch {
            match serde_json::from_str::<PaymentReceipt>(entry) {
                Ok(receipt) => {
                    total_amount = total_amount
                        .checked_add(receipt.amount)
                        .ok_or(SettlementError::Overflow)?;
                    transaction_count += 1;
                }
                Err(err) => tracing::warn!(merchant, %err, "skipping corrupt unsettled entry"),
            }
        }
        if transaction_count == 0 {
            return Err(SettlementError::NothingToSettle(merchant.to_owned()));
        }

        let platform_fee = total_amount
            .checked_mul(Amount::from_decimal(self.policy.fee_rate))
            .ok_or(SettlementError::Overflow)?;
        let merchant_amount = total_amount
            .checked_sub(platform_fee)
            .ok_or(SettlementError::Overflow)?;

        // drop exactly the entries read above; payments recorded meanwhile
        // sit in front of them and survive the trim
        let drained = i64::try_from(raw_batch.len()).map_err(|_| SettlementError::Overflow)?;
        self.store.trim(&key, 0, -(drained + 1)).await?;

        let mut settlement = Settlement {
            id: id.to_owned(),
            merchant_wallet: merchant.to_owned(),
            total_amount,
            platform_fee,
            merchant_amount,
            transaction_count,
            status: SettlementStatus::Pending,
            requested_at: UnixTimestamp::now(),
            completed_at: None,
            transaction_signature: None,
            error: None,
        };
        self.save(&settlement).await?;

        match self
            .ledger
            .transfer(merchant, merchant_amount, &self.policy.payout_asset)
            .await
        {
            Ok(signature) => {
                settlement.status = SettlementStatus::Completed;
                settlement.transaction_signature = Some(signature);
                settlement.completed_at = Some(UnixTimestamp::now());
                // the payout confirmed; record-keeping failures are logged,
                // not turned into errors
                self.finish(merchant, &settlement).await;
                self.store_last_settled(merchant).await;
                tracing::info!(
                    merchant,
                    settlement = id,
                    total = %total_amount,
                    fee = %platform_fee,
                    paid = %merchant_amount,
                    "settlement completed"
                );
                self.notify_completed(&settlement).await;
                Ok(settlement)
            }
            Err(err) => {
                self.restore_batch(&key, &raw_batch).await;
                let message = err.to_string();
                settlement.status = SettlementStatus::Failed;
                settlement.error = Some(message.clone());
                settlement.completed_at = Some(UnixTimestamp::now());
                self.finish(merchant, &settlement).await;
                tracing::warn!(merchant, settlement = id, %message, "settlement payout failed");
                Err(SettlementError::Payout(message))
            }
        }
    }

    /// Puts a drained batch back after a failed payout. The restored entries
    /// end up in front of anything recorded meanwhile; the next drain reads
    /// the whole list regardless.
    async fn restore_batch(&self, key: &str, raw_batch: &[String]) {
        for entry in raw_batch.iter().rev() {
            if let Err(err) = self.store.push_front(key, entry).await {
                tracing::error!(%err, entry, "failed to restore unsettled payment");
            }
        }
    }

    async fn save(&self, settlement: &Settlement) -> Result<(), SettlementError> {
        let encoded = serde_json::to_string(settlement)?;
        self.store
            .set(&settlement_key(&settlement.id), &encoded)
            .await?;
        Ok(())
    }

    /// Writes the final row and the history entry for a finished settlement.
    async fn finish(&self, merchant: &str, settlement: &Settlement) {
        if let Err(err) = self.save(settlement).await {
            tracing::error!(merchant, %err, "failed to record finished settlement");
        }
        if let Err(err) = self
            .store
            .push_front(&history_key(merchant), &settlement.id)
            .await
        {
            tracing::warn!(merchant, %err, "failed to append settlement history");
        }
    }

    async fn store_last_settled(&self, merchant: &str) {
        let now = UnixTimestamp::now().as_secs().to_string();
        if let Err(err) = self.store.set(&last_key(merchant), &now).await {
            tracing::warn!(merchant, %err, "failed to record last settlement time");
        }
    }

    async fn notify_completed(&self, settlement: &Settlement) {
        let Some(target) = &self.webhook else {
            return;
        };
        let payload = serde_json::json!({
            "settlementId": settlement.id,
            "amount": settlement.merchant_amount,
            "fee": settlement.platform_fee,
            "transactionCount": settlement.transaction_count,
            "signature": settlement.transaction_signature,
            "timestamp": settlement.completed_at,
        });
        if let Err(err) = target
            .notifier
            .deliver(&target.url, "settlement.completed", &payload)
            .await
        {
            tracing::warn!(%err, settlement = %settlement.id, "settlement webhook failed");
        }
    }

    fn merchant_lock(&self, merchant: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(merchant.to_owned()).or_default().clone()
    }
}

/// Runs the settlement sweep on its interval until `token` is cancelled.
///
/// The first run happens one full interval after startup, not immediately.
pub fn spawn_sweep(engine: Arc<SettlementEngine>, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(engine.policy.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => engine.run_sweep().await,
            }
        }
        tracing::debug!("settlement sweep stopped");
    })
}

/// Errors from settlement operations.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    /// No settlement exists under the id.
    #[error("settlement not found: {0}")]
    NotFound(String),

    /// Another settlement for the merchant is already in flight.
    #[error("a settlement for {0} is already pending")]
    AlreadyPending(String),

    /// The merchant has no unsettled payments.
    #[error("nothing to settle for {0}")]
    NothingToSettle(String),

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The payout transfer failed; the batch was restored.
    #[error("settlement payout failed: {0}")]
    Payout(String),

    /// Settled amounts left the representable range.
    #[error("settlement arithmetic overflowed")]
    Overflow,

    /// The store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored row could not be decoded.
    #[error("stored settlement data is corrupt: {0}")]
    Codec(#[from] serde_json::Error),
}
