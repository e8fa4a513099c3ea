#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for pay-per-call payment verification and escrow settlement.
//!
//! This crate provides the foundational types for HTTP 402 Payment Required
//! flows backed by an on-chain settlement layer: a resource server demands
//! payment before serving a request, the client pays on-chain and retries with
//! a proof, and a verifier confirms the payment against the ledger before the
//! resource is released.
//!
//! The crate is ledger-agnostic. Chain-specific implementations of the
//! [`ledger::Ledger`] capability live in separate crates; the verification and
//! settlement engines consume it as a trait object.
//!
//! # Modules
//!
//! - [`amount`] - Arbitrary-precision monetary amounts with string wire form
//! - [`error`] - The rejection taxonomy shared across verification and settlement
//! - [`ledger`] - The opaque chain-query and transfer capability
//! - [`networks`] - Registry of well-known networks and token mints
//! - [`proto`] - Wire format types for requirements, proofs, and receipts
//! - [`timestamp`] - Unix-seconds timestamps with JS-safe string serialization
//! - [`verify`] - The proof-verification capability trait

pub mod amount;
pub mod error;
pub mod ledger;
pub mod networks;
pub mod proto;
pub mod timestamp;
pub mod verify;
