//! Wire format types for the payment protocol.
//!
//! These are the JSON messages exchanged between resource servers, payers,
//! and the facilitator:
//!
//! - [`PaymentRequirement`] - what a resource server demands (sent in a 402)
//! - [`PaymentRequired`] - the 402 response body carrying requirements
//! - [`PaymentProof`] - the payer's claim that an on-chain payment satisfies
//!   a requirement
//! - [`PaymentReceipt`] - the verifier's confirmation, built only from a
//!   confirmed ledger transaction
//! - [`VerifyResponse`] - the facilitator's verification verdict
//!
//! All types serialize to JSON with camelCase field names. Amounts and
//! timestamps are string-typed on the wire (see [`crate::amount`] and
//! [`crate::timestamp`]).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{VecSkipError, serde_as};

use crate::amount::Amount;
use crate::error::{PaymentRejection, RejectReason};
use crate::ledger::LedgerTransaction;
use crate::timestamp::UnixTimestamp;

/// How the demanded amount is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentScheme {
    /// The payer must transfer exactly the demanded amount (or more).
    Exact,
    /// The demanded amount is an upper-bound estimate the payer authorizes.
    Estimate,
}

impl Display for PaymentScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => f.write_str("exact"),
            Self::Estimate => f.write_str("estimate"),
        }
    }
}

impl FromStr for PaymentScheme {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "estimate" => Ok(Self::Estimate),
            other => Err(ProtoError::UnknownScheme(other.to_owned())),
        }
    }
}

/// A fungible asset: either the chain's native currency or a specific token
/// mint.
///
/// # Serialization
///
/// Serialized as a bare string: the sentinel `"SOL"` for the native currency,
/// otherwise the mint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetId {
    /// The chain's native currency.
    Native,
    /// A token identified by its mint address.
    Token(String),
}

impl AssetId {
    /// The wire sentinel for the native currency.
    pub const NATIVE_SENTINEL: &'static str = "SOL";

    /// Parses an asset identifier from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s == Self::NATIVE_SENTINEL {
            Self::Native
        } else {
            Self::Token(s.to_owned())
        }
    }

    /// Returns `true` for the native currency.
    #[must_use]
    pub const fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }

    /// Returns the token mint address, or `None` for the native currency.
    #[must_use]
    pub fn mint(&self) -> Option<&str> {
        match self {
            Self::Native => None,
            Self::Token(mint) => Some(mint),
        }
    }
}

impl Display for AssetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str(Self::NATIVE_SENTINEL),
            Self::Token(mint) => f.write_str(mint),
        }
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// What a resource server demands before it will serve a request.
///
/// Issued in the body of a `402 Payment Required` response and immutable from
/// that point on: the proof the payer later submits is checked against the
/// very requirement it names via `requestId`.
///
/// # JSON Format
///
/// ```json
/// {
///   "scheme": "exact",
///   "network": "solana-devnet",
///   "asset": "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
///   "payTo": "7ow6eXU3...",
///   "amount": "0.05",
///   "timeout": 60,
///   "nonce": "k2j4h5g6f7d8s9a0",
///   "requestId": "req_Zt8qL0vNwXyBmcRd",
///   "expiresAt": "1700000060"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Payment scheme.
    pub scheme: PaymentScheme,

    /// Network the payment must land on (see [`crate::networks`]).
    pub network: String,

    /// Asset the payment must move.
    pub asset: AssetId,

    /// Recipient address.
    pub pay_to: String,

    /// Demanded amount in currency units.
    pub amount: Amount,

    /// Optional free-text tag carried alongside the requirement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,

    /// Seconds the requirement stays payable after issuance.
    pub timeout: u64,

    /// Anti-replay token, generated at issuance when the caller supplies none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Binding token; the proof must carry the same value.
    pub request_id: String,

    /// Hard expiry deadline, computed at issuance as now + `timeout`.
    pub expires_at: UnixTimestamp,
}

impl PaymentRequirement {
    /// Issues a new requirement expiring `timeout` seconds from now.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::NonPositiveAmount`] if `amount` is zero or
    /// negative, and [`ProtoError::ZeroTimeout`] if `timeout` is zero.
    pub fn new(
        scheme: PaymentScheme,
        network: impl Into<String>,
        asset: AssetId,
        pay_to: impl Into<String>,
        amount: Amount,
        timeout: u64,
    ) -> Result<Self, ProtoError> {
        if !amount.is_positive() {
            return Err(ProtoError::NonPositiveAmount(amount));
        }
        if timeout == 0 {
            return Err(ProtoError::ZeroTimeout);
        }
        Ok(Self {
            scheme,
            network: network.into(),
            asset,
            pay_to: pay_to.into(),
            amount,
            memo: None,
            timeout,
            nonce: Some(random_token(16)),
            request_id: generate_request_id(),
            expires_at: UnixTimestamp::now() + timeout,
        })
    }

    /// Sets the free-text memo.
    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Replaces the generated nonce with a caller-supplied one.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Replaces the generated request id with a caller-supplied one.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Returns `true` once the expiry deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_past()
    }
}

/// A payer's claim that an on-chain transaction satisfies a requirement.
///
/// Transported base64-encoded in the `X-Payment` request header. A proof is
/// consumed exactly once: after a successful verification its signature is
/// retained and any resubmission is rejected as a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    /// Transaction signature of the on-chain payment.
    pub signature: String,

    /// Amount the payer claims to have transferred, in currency units.
    pub amount: Amount,

    /// Paying address.
    pub sender: String,

    /// Receiving address.
    pub recipient: String,

    /// Asset the payment moved.
    pub asset: AssetId,

    /// When the payer produced the proof.
    pub timestamp: UnixTimestamp,

    /// The requirement this proof claims to fulfil.
    pub request_id: String,
}

/// An immutable audit record of a verified payment.
///
/// Built only from a confirmed ledger transaction, and echoed to the payer
/// base64-encoded in the `X-Payment-Response` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    /// The verified transaction's signature.
    pub transaction_id: String,

    /// Paying address.
    pub from: String,

    /// Receiving address.
    pub to: String,

    /// Verified amount in currency units.
    pub amount: Amount,

    /// Asset the payment moved.
    pub asset: AssetId,

    /// Block time of the transaction, or verification time when the ledger
    /// reports none.
    pub timestamp: UnixTimestamp,

    /// Recent blockhash of the transaction's message.
    pub block_hash: String,

    /// Slot the transaction landed in.
    pub slot: u64,

    /// The verified transaction's signature (same value as `transactionId`,
    /// kept for wire compatibility).
    pub signature: String,

    /// Always `true`: the receipt can be re-checked against the ledger.
    pub verifiable: bool,
}

impl PaymentReceipt {
    /// Builds a receipt from a proof and the confirmed transaction backing it.
    #[must_use]
    pub fn from_confirmed(proof: &PaymentProof, tx: &LedgerTransaction) -> Self {
        Self {
            transaction_id: tx.signature.clone(),
            from: proof.sender.clone(),
            to: proof.recipient.clone(),
            amount: proof.amount,
            asset: proof.asset.clone(),
            timestamp: tx.block_time.unwrap_or_else(UnixTimestamp::now),
            block_hash: tx.block_hash.clone(),
            slot: tx.slot,
            signature: tx.signature.clone(),
            verifiable: true,
        }
    }
}

/// Body of a `402 Payment Required` response.
///
/// Lists the requirements the resource server accepts. Entries that fail to
/// decode are skipped rather than failing the whole body, so a payer on an
/// older wire revision still sees the requirements it understands.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Optional error message explaining why the previous attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Accepted payment requirements.
    #[serde_as(as = "VecSkipError<_>")]
    pub accepts: Vec<PaymentRequirement>,
}

impl PaymentRequired {
    /// Builds a 402 body offering a single requirement.
    #[must_use]
    pub fn new(requirement: PaymentRequirement) -> Self {
        Self {
            error: None,
            accepts: vec![requirement],
        }
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// The facilitator's verification verdict.
///
/// A valid verdict carries the receipt; an invalid one carries the
/// discriminated rejection reason and an optional message.
#[derive(Debug, Clone)]
pub enum VerifyResponse {
    /// The proof passed all checks.
    Valid {
        /// Receipt for the verified payment.
        receipt: PaymentReceipt,
    },
    /// The proof was rejected.
    Invalid {
        /// Machine-readable reason verification failed.
        reason: RejectReason,
        /// Optional human-readable description of the failure.
        message: Option<String>,
    },
}

impl VerifyResponse {
    /// Constructs a successful verdict.
    #[must_use]
    pub const fn valid(receipt: PaymentReceipt) -> Self {
        Self::Valid { receipt }
    }

    /// Constructs a rejection verdict.
    #[must_use]
    pub const fn invalid(reason: RejectReason, message: Option<String>) -> Self {
        Self::Invalid { reason, message }
    }

    /// Returns `true` if the verification succeeded.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Converts the verdict back into the engine result it was built from.
    ///
    /// # Errors
    ///
    /// Returns the carried [`PaymentRejection`] for an invalid verdict.
    pub fn into_result(self) -> Result<PaymentReceipt, PaymentRejection> {
        match self {
            Self::Valid { receipt } => Ok(receipt),
            Self::Invalid { reason, message } => Err(PaymentRejection { reason, message }),
        }
    }
}

impl From<Result<PaymentReceipt, PaymentRejection>> for VerifyResponse {
    fn from(result: Result<PaymentReceipt, PaymentRejection>) -> Self {
        match result {
            Ok(receipt) => Self::Valid { receipt },
            Err(rejection) => Self::Invalid {
                reason: rejection.reason,
                message: rejection.message,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receipt: Option<PaymentReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_message: Option<String>,
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            Self::Valid { receipt } => VerifyResponseWire {
                is_valid: true,
                receipt: Some(receipt.clone()),
                invalid_reason: None,
                invalid_message: None,
            },
            Self::Invalid { reason, message } => VerifyResponseWire {
                is_valid: false,
                receipt: None,
                invalid_reason: Some(*reason),
                invalid_message: message.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        if wire.is_valid {
            let receipt = wire
                .receipt
                .ok_or_else(|| serde::de::Error::missing_field("receipt"))?;
            Ok(Self::Valid { receipt })
        } else {
            let reason = wire
                .invalid_reason
                .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
            Ok(Self::Invalid {
                reason,
                message: wire.invalid_message,
            })
        }
    }
}

/// Generates a fresh requirement binding token.
#[must_use]
pub fn generate_request_id() -> String {
    format!("req_{}", random_token(16))
}

fn random_token(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), len)
}

/// Errors constructing protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    /// The demanded amount must be strictly positive.
    #[error("payment amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    /// The requirement timeout must be strictly positive.
    #[error("payment timeout must be positive")]
    ZeroTimeout,

    /// The scheme string is not part of the protocol.
    #[error("unknown payment scheme: {0:?}")]
    UnknownScheme(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement() -> PaymentRequirement {
        PaymentRequirement::new(
            PaymentScheme::Exact,
            "solana-devnet",
            AssetId::Native,
            "7ow6eXU3pGNuqrfBqzMr5bYXmTNtZ3YdLHumcwx5kkfL",
            "0.05".parse().unwrap(),
            60,
        )
        .unwrap()
    }

    #[test]
    fn test_requirement_issuance_populates_binding_fields() {
        let req = requirement();
        assert!(req.request_id.starts_with("req_"));
        assert!(req.nonce.is_some());
        assert!(!req.is_expired());
        let delta = req.expires_at.as_secs() - UnixTimestamp::now().as_secs();
        assert!((59..=60).contains(&delta));
    }

    #[test]
    fn test_requirement_rejects_non_positive_amount() {
        let err = PaymentRequirement::new(
            PaymentScheme::Exact,
            "solana-devnet",
            AssetId::Native,
            "pool",
            Amount::ZERO,
            60,
        )
        .unwrap_err();
        assert!(matches!(err, ProtoError::NonPositiveAmount(_)));
    }

    #[test]
    fn test_requirement_rejects_zero_timeout() {
        let err = PaymentRequirement::new(
            PaymentScheme::Exact,
            "solana-devnet",
            AssetId::Native,
            "pool",
            "1".parse().unwrap(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ProtoError::ZeroTimeout));
    }

    #[test]
    fn test_requirement_wire_format() {
        let req = requirement().with_memo("market data");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["scheme"], "exact");
        assert_eq!(json["asset"], "SOL");
        assert_eq!(json["payTo"], "7ow6eXU3pGNuqrfBqzMr5bYXmTNtZ3YdLHumcwx5kkfL");
        assert_eq!(json["amount"], "0.05");
        assert_eq!(json["memo"], "market data");
        assert_eq!(json["timeout"], 60);
        assert!(json["requestId"].is_string());
        assert!(json["expiresAt"].is_string());
    }

    #[test]
    fn test_asset_id_sentinel() {
        assert_eq!(AssetId::parse("SOL"), AssetId::Native);
        let mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
        assert_eq!(AssetId::parse(mint), AssetId::Token(mint.into()));
        assert_eq!(AssetId::Native.to_string(), "SOL");
        assert_eq!(AssetId::Native.mint(), None);
        assert_eq!(AssetId::parse(mint).mint(), Some(mint));
    }

    #[test]
    fn test_payment_required_skips_malformed_accepts() {
        let body = serde_json::json!({
            "accepts": [
                { "bogus": true },
                {
                    "scheme": "exact",
                    "network": "solana-devnet",
                    "asset": "SOL",
                    "payTo": "pool",
                    "amount": "0.01",
                    "timeout": 30,
                    "requestId": "req_abc",
                    "expiresAt": "1700000000"
                }
            ]
        });
        let parsed: PaymentRequired = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.accepts.len(), 1);
        assert_eq!(parsed.accepts[0].request_id, "req_abc");
    }

    #[test]
    fn test_verify_response_wire_roundtrip() {
        let invalid = VerifyResponse::invalid(
            RejectReason::ReplayedProof,
            Some("signature already consumed".into()),
        );
        let json = serde_json::to_value(&invalid).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "replayed_proof");

        let back: VerifyResponse = serde_json::from_value(json).unwrap();
        let rejection = back.into_result().unwrap_err();
        assert_eq!(rejection.reason, RejectReason::ReplayedProof);
    }

    #[test]
    fn test_verify_response_valid_carries_receipt() {
        let receipt = PaymentReceipt {
            transaction_id: "5ig".into(),
            from: "payer".into(),
            to: "merchant".into(),
            amount: "0.05".parse().unwrap(),
            asset: AssetId::Native,
            timestamp: UnixTimestamp::from_secs(1_700_000_000),
            block_hash: "hash".into(),
            slot: 99,
            signature: "5ig".into(),
            verifiable: true,
        };
        let json = serde_json::to_value(VerifyResponse::valid(receipt.clone())).unwrap();
        assert_eq!(json["isValid"], true);
        assert_eq!(json["receipt"]["slot"], 99);

        let back: VerifyResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.into_result().unwrap(), receipt);
    }
}
