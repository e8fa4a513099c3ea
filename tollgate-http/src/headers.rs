//! HTTP header encoding and decoding for protocol messages.
//!
//! Proofs and receipts cross the wire as base64-encoded JSON in the
//! `X-Payment` and `X-Payment-Response` headers. Decoding trims surrounding
//! whitespace so values survive proxies that pad header values.

use base64::prelude::*;
use tollgate::proto::{PaymentProof, PaymentReceipt};

use crate::error::HttpError;

/// Encodes a [`PaymentProof`] for the `X-Payment` header.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_payment_proof(proof: &PaymentProof) -> Result<String, HttpError> {
    let json = serde_json::to_vec(proof)?;
    Ok(BASE64_STANDARD.encode(&json))
}

/// Decodes an `X-Payment` header value into a [`PaymentProof`].
///
/// # Errors
///
/// Returns [`HttpError`] on base64 or JSON decode failure.
pub fn decode_payment_proof(header_value: &str) -> Result<PaymentProof, HttpError> {
    let bytes = BASE64_STANDARD.decode(header_value.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encodes a [`PaymentReceipt`] for the `X-Payment-Response` header.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_payment_receipt(receipt: &PaymentReceipt) -> Result<String, HttpError> {
    let json = serde_json::to_vec(receipt)?;
    Ok(BASE64_STANDARD.encode(&json))
}

/// Decodes an `X-Payment-Response` header value into a [`PaymentReceipt`].
///
/// # Errors
///
/// Returns [`HttpError`] on base64 or JSON decode failure.
pub fn decode_payment_receipt(header_value: &str) -> Result<PaymentReceipt, HttpError> {
    let bytes = BASE64_STANDARD.decode(header_value.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}
