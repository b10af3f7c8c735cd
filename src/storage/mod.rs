//! Two-tier key-value storage for session state.
//!
//! This module provides:
//! - `StorageTier`: the interface both tiers implement
//! - `FileTier`: durable storage, one file per key, atomic writes
//! - `MemoryTier`: session-scoped storage that vanishes with the process
//!
//! The token store keeps a credential in exactly one tier at a time;
//! which one depends on whether the user asked to be remembered.

pub mod file;
pub mod memory;

pub use file::FileTier;
pub use memory::MemoryTier;

use anyhow::Result;

/// A single storage tier holding serialized values by key.
pub trait StorageTier: Send + Sync {
    /// Read the value for `key`, or `None` if absent.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Write the value for `key`, replacing any previous value.
    fn store(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value for `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}
