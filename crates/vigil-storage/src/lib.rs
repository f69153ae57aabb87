//! Vigil Storage - key-value contract and degradation chain.
//!
//! This crate defines the minimal storage surface the coordination core
//! depends on, plus the fallback machinery that keeps the core responsive
//! when a backend misbehaves.
//!
//! # Tier 1: Key-Value Contract ([`KvStore`])
//!
//! Versioned `get` / `compare_and_set` / `set_with_ttl` / `scan_prefix`.
//! Every state transition in the core goes through `compare_and_set`, so a
//! backend only needs per-key atomicity to give the core cross-process
//! linearization.
//!
//! Two backends ship here:
//!
//! - [`MemoryKvStore`]: process-local, lost on restart, defined to always
//!   succeed. The terminal degradation tier.
//! - `SledKvStore`: embedded durable store with native compare-and-swap,
//!   survives restarts. Enable with the **`sled`** feature.
//!
//! # Tier 2: Degradation Chain ([`DegradationChain`])
//!
//! An ordered list of backends per capability. Downgrade is immediate on
//! the first failure; upgrade requires an explicit successful health probe,
//! so a flapping backend cannot oscillate the chain. [`FallbackKvStore`]
//! wraps a chain behind the plain [`KvStore`] interface: store calls are
//! bounded by a short timeout, and a timeout is treated as "tier
//! unhealthy" rather than propagated to the caller.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod fallback;
pub mod kv;

#[cfg(feature = "sled")]
pub mod sled_store;

pub use error::{StoreError, StoreResult};
pub use fallback::{ChainSnapshot, DegradationChain, FallbackKvStore, Tier};
pub use kv::{KvEntry, KvStore, MemoryKvStore};

#[cfg(feature = "sled")]
pub use sled_store::SledKvStore;
