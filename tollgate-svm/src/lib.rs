#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana backend for tollgate payments.
//!
//! This crate binds the ledger-agnostic engines in [`tollgate`] to Solana:
//!
//! - [`SolanaLedger`] implements [`tollgate::ledger::Ledger`] over a JSON-RPC
//!   endpoint: it fetches confirmed transactions in parsed form, reads
//!   balances, submits pool-signed transfers, and polls signature status.
//! - [`parse`] normalizes parsed RPC transactions into
//!   [`tollgate::ledger::LedgerTransaction`], so the verification engine
//!   matches on tagged transfer structs instead of raw instruction JSON.
//! - [`SessionWallet`] is the client-side counterpart: a spending guard that
//!   signs payment transfers only within a [`PaymentApproval`] budget.
//!
//! # Example
//!
//! ```ignore
//! use solana_keypair::Keypair;
//! use tollgate_svm::SolanaLedger;
//!
//! let pool = Keypair::new();
//! let ledger = SolanaLedger::new(
//!     "https://api.devnet.solana.com",
//!     pool,
//!     tollgate::networks::DEVNET,
//! );
//! ```
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

use solana_pubkey::{Pubkey, pubkey};

pub mod ledger;
pub mod parse;
pub mod session;

pub use ledger::SolanaLedger;
pub use session::{PaymentApproval, PaymentIntent, PreparedPayment, SessionError, SessionWallet};

/// The SPL Associated Token Account program.
pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Derives the associated token account of `owner` for `mint`.
#[must_use]
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    let token_program = spl_token::id();
    Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    )
    .0
}
