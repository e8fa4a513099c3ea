//! [`Ledger`] implementation over a Solana JSON-RPC endpoint.
//!
//! Transactions are fetched in parsed form and normalized through
//! [`crate::parse`]. Reads are looked up with transaction-history search so
//! proofs older than the recent-status cache still verify. Submitted
//! transfers are signed by the pool keypair and awaited to the configured
//! commitment.
//!
//! Every query carries its own deadline ([`DEFAULT_QUERY_TIMEOUT`]);
//! submissions get a longer one ([`DEFAULT_SEND_TIMEOUT`]) to cover
//! confirmation. A timed-out call is an error, never an implicit success.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::{Instruction, Transaction};
use solana_transaction_status::UiTransactionEncoding;
use spl_token::solana_program::program_pack::Pack;
use tollgate::amount::Amount;
use tollgate::ledger::{Ledger, LedgerError, LedgerTransaction, TxStatus};
use tollgate::proto::AssetId;

use crate::associated_token_address;
use crate::parse;

/// Deadline applied to read-only RPC queries.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(8);

/// Deadline applied to transfer submission plus confirmation.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// A Solana-backed [`Ledger`] signing transfers with a pool keypair.
pub struct SolanaLedger {
    rpc: Arc<RpcClient>,
    pool: Keypair,
    network: String,
    commitment: CommitmentConfig,
    query_timeout: Duration,
    send_timeout: Duration,
}

impl SolanaLedger {
    /// Creates a ledger over a fresh RPC client at `rpc_url`.
    #[must_use]
    pub fn new(rpc_url: impl Into<String>, pool: Keypair, network: impl Into<String>) -> Self {
        let rpc = Arc::new(RpcClient::new_with_commitment(
            rpc_url.into(),
            CommitmentConfig::confirmed(),
        ));
        Self::with_client(rpc, pool, network)
    }

    /// Creates a ledger sharing an existing RPC client.
    #[must_use]
    pub fn with_client(rpc: Arc<RpcClient>, pool: Keypair, network: impl Into<String>) -> Self {
        Self {
            rpc,
            pool,
            network: network.into(),
            commitment: CommitmentConfig::confirmed(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Creates a ledger from a base58-encoded pool keypair.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidKey`] if `key` is not a valid base58
    /// 64-byte keypair.
    pub fn from_base58_key(
        rpc_url: impl Into<String>,
        key: &str,
        network: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        let bytes = bs58::decode(key)
            .into_vec()
            .map_err(|err| LedgerError::InvalidKey(err.to_string()))?;
        let pool = Keypair::try_from(bytes.as_slice())
            .map_err(|err| LedgerError::InvalidKey(err.to_string()))?;
        Ok(Self::new(rpc_url, pool, network))
    }

    /// Sets the deadline for read-only queries.
    #[must_use]
    pub const fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Sets the deadline for transfer submission and confirmation.
    #[must_use]
    pub const fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the commitment level transactions are read and confirmed at.
    #[must_use]
    pub const fn with_commitment(mut self, commitment: CommitmentConfig) -> Self {
        self.commitment = commitment;
        self
    }

    /// The underlying RPC client, shareable with a session wallet.
    #[must_use]
    pub fn rpc(&self) -> Arc<RpcClient> {
        Arc::clone(&self.rpc)
    }
}

impl fmt::Debug for SolanaLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaLedger")
            .field("network", &self.network)
            .field("pool", &self.pool.pubkey())
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Ledger for SolanaLedger {
    async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        // A malformed signature can never land on chain.
        let Ok(sig) = signature.parse::<Signature>() else {
            return Ok(None);
        };
        let statuses = with_deadline(
            self.query_timeout,
            self.rpc.get_signature_statuses_with_history(&[sig]),
        )
        .await?;
        let visible = statuses
            .value
            .into_iter()
            .flatten()
            .next()
            .is_some_and(|status| status.satisfies_commitment(self.commitment));
        if !visible {
            return Ok(None);
        }

        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let encoded = with_deadline(
            self.query_timeout,
            self.rpc.get_transaction_with_config(&sig, config),
        )
        .await?;
        parse::decode_transaction(signature, encoded).map(Some)
    }

    async fn get_balance(&self, address: &str) -> Result<Amount, LedgerError> {
        let key = parse_pubkey(address)?;
        let lamports = with_deadline(self.query_timeout, self.rpc.get_balance(&key)).await?;
        Ok(Amount::from_lamports(lamports))
    }

    async fn transfer(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &AssetId,
    ) -> Result<String, LedgerError> {
        let submit = async {
            let to = parse_pubkey(recipient)?;
            let payer = self.pool.pubkey();
            let instruction =
                transfer_instruction_for(&self.rpc, &payer, &to, amount, asset).await?;
            let blockhash = self
                .rpc
                .get_latest_blockhash()
                .await
                .map_err(|err| LedgerError::Rpc(err.to_string()))?;
            let mut transaction = Transaction::new_with_payer(&[instruction], Some(&payer));
            transaction
                .try_sign(&[&self.pool], blockhash)
                .map_err(|err| LedgerError::TransferFailed(err.to_string()))?;
            let signature = self
                .rpc
                .send_and_confirm_transaction(&transaction)
                .await
                .map_err(|err| LedgerError::TransferFailed(err.to_string()))?;
            #[cfg(feature = "telemetry")]
            tracing::debug!(%signature, network = %self.network, "pool transfer confirmed");
            Ok(signature.to_string())
        };
        tokio::time::timeout(self.send_timeout, submit)
            .await
            .map_err(|_| LedgerError::Timeout(self.send_timeout.as_secs()))?
    }

    async fn transaction_status(&self, signature: &str) -> Result<TxStatus, LedgerError> {
        let Ok(sig) = signature.parse::<Signature>() else {
            return Ok(TxStatus::Failed);
        };
        let statuses = with_deadline(
            self.query_timeout,
            self.rpc.get_signature_statuses_with_history(&[sig]),
        )
        .await?;
        Ok(match statuses.value.into_iter().flatten().next() {
            None => TxStatus::Pending,
            Some(status) if status.err.is_some() => TxStatus::Failed,
            Some(status) if status.satisfies_commitment(self.commitment) => TxStatus::Confirmed,
            Some(_) => TxStatus::Pending,
        })
    }

    fn pool_address(&self) -> String {
        self.pool.pubkey().to_string()
    }

    fn network(&self) -> &str {
        &self.network
    }
}

async fn with_deadline<T>(
    deadline: Duration,
    fut: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, LedgerError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(LedgerError::Rpc(err.to_string())),
        Err(_) => Err(LedgerError::Timeout(deadline.as_secs())),
    }
}

pub(crate) fn parse_pubkey(address: &str) -> Result<Pubkey, LedgerError> {
    address
        .parse::<Pubkey>()
        .map_err(|_| LedgerError::InvalidAddress(address.to_owned()))
}

/// Builds the transfer instruction for `asset`, deriving token accounts and
/// fetching mint decimals when the asset is an SPL token.
pub(crate) async fn transfer_instruction_for(
    rpc: &RpcClient,
    from: &Pubkey,
    to: &Pubkey,
    amount: Amount,
    asset: &AssetId,
) -> Result<Instruction, LedgerError> {
    match asset {
        AssetId::Native => {
            let lamports = amount
                .to_lamports()
                .ok_or_else(|| LedgerError::InvalidAmount(amount.to_string()))?;
            Ok(solana_system_interface::instruction::transfer(
                from, to, lamports,
            ))
        }
        AssetId::Token(mint) => {
            let mint_pubkey = parse_pubkey(mint)?;
            let decimals = mint_decimals(rpc, &mint_pubkey).await?;
            let base_units = amount
                .to_base_units(u32::from(decimals))
                .ok_or_else(|| LedgerError::InvalidAmount(amount.to_string()))?;
            let source = associated_token_address(from, &mint_pubkey);
            let destination = associated_token_address(to, &mint_pubkey);
            spl_token::instruction::transfer_checked(
                &spl_token::id(),
                &source,
                &mint_pubkey,
                &destination,
                from,
                &[],
                base_units,
                decimals,
            )
            .map_err(|err| LedgerError::TransferFailed(err.to_string()))
        }
    }
}

async fn mint_decimals(rpc: &RpcClient, mint: &Pubkey) -> Result<u8, LedgerError> {
    let account = rpc
        .get_account(mint)
        .await
        .map_err(|err| LedgerError::Rpc(format!("failed to fetch mint {mint}: {err}")))?;
    let state = spl_token::state::Mint::unpack(&account.data)
        .map_err(|err| LedgerError::Rpc(format!("failed to unpack mint {mint}: {err}")))?;
    Ok(state.decimals)
}
