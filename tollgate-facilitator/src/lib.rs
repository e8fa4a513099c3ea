//! The tollgate facilitator: payment verification, escrow, and settlement.
//!
//! Library modules behind the `tollgate-facilitator` server binary. The
//! engines consume the capability traits from `tollgate` and `tollgate-store`,
//! so every piece runs against the real Solana ledger and Redis in production
//! and against in-memory substitutes in tests.
//!
//! # Modules
//!
//! - [`verifier`] - On-chain payment proof verification with replay prevention
//! - [`escrow`] - Pooled user escrow with compensated payments
//! - [`settlement`] - Merchant settlement batching, fees, and the sweep task
//! - [`handlers`] - Axum route handlers and router builder
//! - [`error`] - HTTP error mapping for the service
//! - [`config`] - Server configuration with environment variable expansion
//! - [`util`] - Process lifecycle helpers

pub mod config;
pub mod error;
pub mod escrow;
pub mod handlers;
pub mod settlement;
pub mod util;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testutil;

pub use handlers::{AppState, facilitator_router};
