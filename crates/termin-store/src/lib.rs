//! termin-store — the authenticated key-value contract behind the broker.
//!
//! Five container kinds (value, set, sorted-set, map, list) addressed by
//! `(table, key)`, per-container TTL with idle reset, and transactions with
//! optimistic watch. All shared server state lives behind these traits; the
//! in-memory backend in [`memory`] (optionally persisted through sled) is
//! the reference implementation, and a networked KV store could slot behind
//! the same interface.

pub mod memory;

pub use memory::MemStore;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A watched key changed between `watch` and `commit`.
    #[error("watched key changed; transaction aborted")]
    Conflict,

    /// A `(table, key)` is already occupied by a different container kind.
    #[error("container kind mismatch at {table}/{key}")]
    WrongKind { table: String, key: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

/// One member of a sorted set with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedSetEntry {
    pub member: Vec<u8>,
    pub score: i64,
}

/// The read/write surface shared by a store and its transactions.
///
/// Inside a transaction these operations observe the transaction's own
/// writes; outside they act on the live store directly.
pub trait StoreOps {
    // ── Value ────────────────────────────────────────────────────────────────
    fn value_get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    /// Set a value, replacing any previous one. `ttl = None` clears expiry.
    fn value_set(
        &self,
        table: &str,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;
    fn value_del(&self, table: &str, key: &[u8]) -> Result<(), StoreError>;

    // ── Set ──────────────────────────────────────────────────────────────────
    fn set_add(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError>;
    fn set_has(&self, table: &str, key: &[u8], member: &[u8]) -> Result<bool, StoreError>;
    fn set_del(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError>;
    fn set_members(&self, table: &str, key: &[u8]) -> Result<Vec<Vec<u8>>, StoreError>;

    // ── Sorted set ───────────────────────────────────────────────────────────
    fn sorted_set_add(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
        score: i64,
    ) -> Result<(), StoreError>;
    fn sorted_set_del(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError>;
    fn sorted_set_score(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
    ) -> Result<Option<i64>, StoreError>;
    /// Add `delta` to a member's score (missing member starts at zero) and
    /// return the new score.
    fn sorted_set_incr(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
        delta: i64,
    ) -> Result<i64, StoreError>;
    /// All entries with `min <= score <= max`, ascending by score.
    fn sorted_set_range_by_score(
        &self,
        table: &str,
        key: &[u8],
        min: i64,
        max: i64,
    ) -> Result<Vec<SortedSetEntry>, StoreError>;

    // ── Map ──────────────────────────────────────────────────────────────────
    fn map_get(&self, table: &str, key: &[u8], field: &[u8])
        -> Result<Option<Vec<u8>>, StoreError>;
    fn map_set(
        &self,
        table: &str,
        key: &[u8],
        field: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError>;
    fn map_del(&self, table: &str, key: &[u8], field: &[u8]) -> Result<(), StoreError>;
    fn map_get_all(
        &self,
        table: &str,
        key: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    // ── List ─────────────────────────────────────────────────────────────────
    fn list_push(&self, table: &str, key: &[u8], item: &[u8]) -> Result<(), StoreError>;
    fn list_all(&self, table: &str, key: &[u8]) -> Result<Vec<Vec<u8>>, StoreError>;
    fn list_del(&self, table: &str, key: &[u8], item: &[u8]) -> Result<(), StoreError>;

    // ── TTL ──────────────────────────────────────────────────────────────────
    /// Reset the idle TTL of an existing container; no-op when absent.
    fn expire(&self, table: &str, key: &[u8], ttl: Duration) -> Result<(), StoreError>;
}

/// A transaction shadowing the store's read/write surface.
///
/// Dropping an uncommitted transaction discards its writes, so every early
/// error return rolls back without explicit cleanup. `commit` applies all
/// buffered writes atomically and fails with [`StoreError::Conflict`] if a
/// watched key changed since it was watched.
pub trait StoreTxn: StoreOps + Send {
    /// Mark a key for optimistic concurrency control.
    fn watch(&mut self, table: &str, key: &[u8]) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard all buffered writes. Equivalent to dropping the transaction;
    /// provided for call sites that want to be explicit.
    fn rollback(self: Box<Self>);
}

/// A store that can open transactions.
pub trait Database: StoreOps + Send + Sync {
    fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError>;

    /// Flush pending writes to durable storage, if any.
    fn flush(&self) -> Result<(), StoreError>;
}
