#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP boundary for the tollgate payment protocol.
//!
//! Payment proofs and receipts travel base64-encoded in the `X-Payment` and
//! `X-Payment-Response` headers; a request without a valid proof is answered
//! with `402 Payment Required` and the requirements to satisfy it. This crate
//! provides both sides of that exchange, plus the signed webhook channel used
//! for settlement notifications.
//!
//! # Modules
//!
//! - [`constants`] - Header names and protocol defaults
//! - [`headers`] - Base64 JSON codecs for the payment headers
//! - [`error`] - Header codec error type
//! - [`webhook`] - HMAC-signed webhook signing, verification, and delivery
//! - [`facilitator`] - Remote facilitator client (feature: `client`)
//! - [`paygate`] - Tower layer enforcing payment on axum routes (feature: `server`)
//! - [`hooks`] - Paygate lifecycle hooks (feature: `server`)
//!
//! # Feature Flags
//!
//! - `client` - the remote facilitator client and webhook delivery (`reqwest`)
//! - `server` - the paygate middleware (`axum`/`tower`)
//! - `telemetry` - structured `tracing` events
//! - `full` - everything above

pub mod constants;
pub mod error;
pub mod headers;
pub mod webhook;

#[cfg(feature = "client")]
pub mod facilitator;
#[cfg(feature = "server")]
pub mod hooks;
#[cfg(feature = "server")]
pub mod paygate;
