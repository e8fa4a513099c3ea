#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Storage backends for the tollgate payment engine.
//!
//! The engine persists three kinds of state: escrow records, append-only
//! payment/settlement logs, and the consumed-signature set that prevents proof
//! replay. All of it goes through two capability traits defined here:
//!
//! - [`KeyValueStore`] - string keys, string values, TTLs, atomic
//!   check-and-set primitives, and append-only lists
//! - [`SignatureStore`] - the consumed-signature set with atomic registration
//!
//! Each trait has a durable Redis implementation for production and a
//! process-local in-memory implementation for tests and single-instance
//! deployments. The in-memory variants are not safe across multiple server
//! instances; replay prevention in particular needs the shared backend as
//! soon as more than one verifier process runs.
//!
//! # Modules
//!
//! - [`kv`] - The key-value capability and its error type
//! - [`memory`] - In-memory implementations with lazy TTL eviction
//! - [`redis`] - Redis implementations over a managed connection
//! - [`signature`] - The consumed-signature set

pub mod kv;
pub mod memory;
pub mod redis;
pub mod signature;

pub use kv::{KeyValueStore, StoreError};
pub use memory::MemoryStore;
pub use self::redis::{RedisSignatureStore, RedisStore};
pub use signature::{MemorySignatureStore, SignatureStore};
