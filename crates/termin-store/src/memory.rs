//! In-memory store with optimistic transactions and optional sled-backed
//! durability.
//!
//! Containers live in a single locked map keyed by `(table, key)`. Every
//! mutation bumps a per-key version; transactions buffer whole containers
//! copy-on-write and validate watched versions at commit. When opened with
//! a path, every committed mutation is written through to a sled tree and
//! the full state is reloaded on the next open.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Database, SortedSetEntry, StoreError, StoreOps, StoreTxn};

type EntryKey = (String, Vec<u8>);

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn wrong_kind(key: &EntryKey) -> StoreError {
    StoreError::WrongKind {
        table: key.0.clone(),
        key: String::from_utf8_lossy(&key.1).into_owned(),
    }
}

// ── Containers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Container {
    Value(Vec<u8>),
    Set(BTreeSet<Vec<u8>>),
    SortedSet(BTreeMap<Vec<u8>, i64>),
    Map(BTreeMap<Vec<u8>, Vec<u8>>),
    List(Vec<Vec<u8>>),
}

impl Container {
    /// Collections vanish when their last member is removed; plain values
    /// only on explicit delete.
    fn is_empty(&self) -> bool {
        match self {
            Container::Value(_) => false,
            Container::Set(s) => s.is_empty(),
            Container::SortedSet(s) => s.is_empty(),
            Container::Map(m) => m.is_empty(),
            Container::List(l) => l.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    container: Container,
    /// Unix millis; `None` = no expiry.
    expires_at: Option<i64>,
}

impl Entry {
    fn expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

// ── Inner state ──────────────────────────────────────────────────────────────

struct Inner {
    entries: HashMap<EntryKey, Entry>,
    /// Monotonic per-key versions; survive deletion so watchers observe it.
    versions: HashMap<EntryKey, u64>,
    next_version: u64,
    sled: Option<sled::Db>,
}

impl Inner {
    fn bump(&mut self, key: &EntryKey) {
        self.next_version += 1;
        self.versions.insert(key.clone(), self.next_version);
    }

    fn version(&self, key: &EntryKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn purge_if_expired(&mut self, key: &EntryKey, now: i64) -> Result<(), StoreError> {
        if self.entries.get(key).is_some_and(|e| e.expired(now)) {
            debug!(table = %key.0, "expired container purged");
            self.entries.remove(key);
            self.bump(key);
            self.persist_remove(key)?;
        }
        Ok(())
    }

    fn put_entry(&mut self, key: &EntryKey, entry: Entry) -> Result<(), StoreError> {
        self.persist_put(key, &entry)?;
        self.entries.insert(key.clone(), entry);
        self.bump(key);
        Ok(())
    }

    fn remove_entry(&mut self, key: &EntryKey) -> Result<(), StoreError> {
        self.entries.remove(key);
        self.bump(key);
        self.persist_remove(key)
    }

    fn read<R>(
        &mut self,
        table: &str,
        key: &[u8],
        f: impl FnOnce(Option<&Container>, &EntryKey) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let k = (table.to_string(), key.to_vec());
        self.purge_if_expired(&k, now_millis())?;
        let container = self.entries.get(&k).map(|e| &e.container);
        f(container, &k)
    }

    fn mutate<R>(
        &mut self,
        table: &str,
        key: &[u8],
        make: impl FnOnce() -> Container,
        f: impl FnOnce(&mut Container, &EntryKey) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let k = (table.to_string(), key.to_vec());
        self.purge_if_expired(&k, now_millis())?;
        let mut entry = self
            .entries
            .get(&k)
            .cloned()
            .unwrap_or_else(|| Entry {
                container: make(),
                expires_at: None,
            });
        let result = f(&mut entry.container, &k)?;
        if entry.container.is_empty() {
            self.remove_entry(&k)?;
        } else {
            self.put_entry(&k, entry)?;
        }
        Ok(result)
    }

    // ── sled write-through ───────────────────────────────────────────────────

    fn persist_put(&self, key: &EntryKey, entry: &Entry) -> Result<(), StoreError> {
        if let Some(db) = &self.sled {
            let bytes = bincode::serialize(entry)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            db.insert(encode_key(key), bytes)
                .map_err(|e| StoreError::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    fn persist_remove(&self, key: &EntryKey) -> Result<(), StoreError> {
        if let Some(db) = &self.sled {
            db.remove(encode_key(key))
                .map_err(|e| StoreError::Persistence(e.to_string()))?;
        }
        Ok(())
    }
}

fn encode_key(key: &EntryKey) -> Vec<u8> {
    let table = key.0.as_bytes();
    let mut out = Vec::with_capacity(4 + table.len() + key.1.len());
    out.extend_from_slice(&(table.len() as u32).to_le_bytes());
    out.extend_from_slice(table);
    out.extend_from_slice(&key.1);
    out
}

fn decode_key(raw: &[u8]) -> Result<EntryKey, StoreError> {
    if raw.len() < 4 {
        return Err(StoreError::Persistence("truncated store key".into()));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let table_len = u32::from_le_bytes(len_bytes) as usize;
    if raw.len() < 4 + table_len {
        return Err(StoreError::Persistence("truncated store key".into()));
    }
    let table = String::from_utf8(raw[4..4 + table_len].to_vec())
        .map_err(|e| StoreError::Persistence(e.to_string()))?;
    Ok((table, raw[4 + table_len..].to_vec()))
}

// ── MemStore ─────────────────────────────────────────────────────────────────

/// The in-memory store. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    /// A purely in-memory store (tests, ephemeral deployments).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                versions: HashMap::new(),
                next_version: 0,
                sled: None,
            })),
        }
    }

    /// Open a store persisted at `path`, loading any previous state.
    /// Entries that expired while the server was down are dropped on load.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Persistence(e.to_string()))?;
        let mut entries = HashMap::new();
        let now = now_millis();
        for item in db.iter() {
            let (raw_key, raw_entry) = item.map_err(|e| StoreError::Persistence(e.to_string()))?;
            let key = decode_key(&raw_key)?;
            let entry: Entry = bincode::deserialize(&raw_entry)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if entry.expired(now) {
                db.remove(raw_key)
                    .map_err(|e| StoreError::Persistence(e.to_string()))?;
                continue;
            }
            entries.insert(key, entry);
        }
        debug!(containers = entries.len(), "store loaded");
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                entries,
                versions: HashMap::new(),
                next_version: 0,
                sled: Some(db),
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Container accessors ──────────────────────────────────────────────────────

fn as_value<'a>(c: &'a mut Container, k: &EntryKey) -> Result<&'a mut Vec<u8>, StoreError> {
    match c {
        Container::Value(v) => Ok(v),
        _ => Err(wrong_kind(k)),
    }
}

fn as_set<'a>(c: &'a mut Container, k: &EntryKey) -> Result<&'a mut BTreeSet<Vec<u8>>, StoreError> {
    match c {
        Container::Set(s) => Ok(s),
        _ => Err(wrong_kind(k)),
    }
}

fn as_sorted_set<'a>(
    c: &'a mut Container,
    k: &EntryKey,
) -> Result<&'a mut BTreeMap<Vec<u8>, i64>, StoreError> {
    match c {
        Container::SortedSet(s) => Ok(s),
        _ => Err(wrong_kind(k)),
    }
}

fn as_map<'a>(
    c: &'a mut Container,
    k: &EntryKey,
) -> Result<&'a mut BTreeMap<Vec<u8>, Vec<u8>>, StoreError> {
    match c {
        Container::Map(m) => Ok(m),
        _ => Err(wrong_kind(k)),
    }
}

fn as_list<'a>(c: &'a mut Container, k: &EntryKey) -> Result<&'a mut Vec<Vec<u8>>, StoreError> {
    match c {
        Container::List(l) => Ok(l),
        _ => Err(wrong_kind(k)),
    }
}

// Shared read-side implementations over an optional container view. Used by
// both the live store and transactions so their semantics cannot drift.

fn read_value(c: Option<&Container>, k: &EntryKey) -> Result<Option<Vec<u8>>, StoreError> {
    match c {
        None => Ok(None),
        Some(Container::Value(v)) => Ok(Some(v.clone())),
        Some(_) => Err(wrong_kind(k)),
    }
}

fn read_set_has(c: Option<&Container>, k: &EntryKey, member: &[u8]) -> Result<bool, StoreError> {
    match c {
        None => Ok(false),
        Some(Container::Set(s)) => Ok(s.contains(member)),
        Some(_) => Err(wrong_kind(k)),
    }
}

fn read_set_members(c: Option<&Container>, k: &EntryKey) -> Result<Vec<Vec<u8>>, StoreError> {
    match c {
        None => Ok(Vec::new()),
        Some(Container::Set(s)) => Ok(s.iter().cloned().collect()),
        Some(_) => Err(wrong_kind(k)),
    }
}

fn read_sorted_set_score(
    c: Option<&Container>,
    k: &EntryKey,
    member: &[u8],
) -> Result<Option<i64>, StoreError> {
    match c {
        None => Ok(None),
        Some(Container::SortedSet(s)) => Ok(s.get(member).copied()),
        Some(_) => Err(wrong_kind(k)),
    }
}

fn read_sorted_set_range(
    c: Option<&Container>,
    k: &EntryKey,
    min: i64,
    max: i64,
) -> Result<Vec<SortedSetEntry>, StoreError> {
    match c {
        None => Ok(Vec::new()),
        Some(Container::SortedSet(s)) => {
            let mut entries: Vec<SortedSetEntry> = s
                .iter()
                .filter(|(_, score)| **score >= min && **score <= max)
                .map(|(member, score)| SortedSetEntry {
                    member: member.clone(),
                    score: *score,
                })
                .collect();
            entries.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.member.cmp(&b.member)));
            Ok(entries)
        }
        Some(_) => Err(wrong_kind(k)),
    }
}

fn read_map_get(
    c: Option<&Container>,
    k: &EntryKey,
    field: &[u8],
) -> Result<Option<Vec<u8>>, StoreError> {
    match c {
        None => Ok(None),
        Some(Container::Map(m)) => Ok(m.get(field).cloned()),
        Some(_) => Err(wrong_kind(k)),
    }
}

fn read_map_all(
    c: Option<&Container>,
    k: &EntryKey,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    match c {
        None => Ok(Vec::new()),
        Some(Container::Map(m)) => Ok(m.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
        Some(_) => Err(wrong_kind(k)),
    }
}

fn read_list_all(c: Option<&Container>, k: &EntryKey) -> Result<Vec<Vec<u8>>, StoreError> {
    match c {
        None => Ok(Vec::new()),
        Some(Container::List(l)) => Ok(l.clone()),
        Some(_) => Err(wrong_kind(k)),
    }
}

// ── StoreOps for the live store ──────────────────────────────────────────────

impl StoreOps for MemStore {
    fn value_get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.lock().read(table, key, read_value)
    }

    fn value_set(
        &self,
        table: &str,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let k = (table.to_string(), key.to_vec());
        if let Some(existing) = inner.entries.get(&k) {
            if !matches!(existing.container, Container::Value(_)) && !existing.expired(now_millis())
            {
                return Err(wrong_kind(&k));
            }
        }
        let entry = Entry {
            container: Container::Value(value.to_vec()),
            expires_at: ttl.map(|d| now_millis() + d.num_milliseconds()),
        };
        inner.put_entry(&k, entry)
    }

    fn value_del(&self, table: &str, key: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let k = (table.to_string(), key.to_vec());
        inner.remove_entry(&k)
    }

    fn set_add(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError> {
        self.lock()
            .mutate(table, key, || Container::Set(BTreeSet::new()), |c, k| {
                as_set(c, k)?.insert(member.to_vec());
                Ok(())
            })
    }

    fn set_has(&self, table: &str, key: &[u8], member: &[u8]) -> Result<bool, StoreError> {
        self.lock()
            .read(table, key, |c, k| read_set_has(c, k, member))
    }

    fn set_del(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError> {
        self.lock()
            .mutate(table, key, || Container::Set(BTreeSet::new()), |c, k| {
                as_set(c, k)?.remove(member);
                Ok(())
            })
    }

    fn set_members(&self, table: &str, key: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.lock().read(table, key, read_set_members)
    }

    fn sorted_set_add(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
        score: i64,
    ) -> Result<(), StoreError> {
        self.lock().mutate(
            table,
            key,
            || Container::SortedSet(BTreeMap::new()),
            |c, k| {
                as_sorted_set(c, k)?.insert(member.to_vec(), score);
                Ok(())
            },
        )
    }

    fn sorted_set_del(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError> {
        self.lock().mutate(
            table,
            key,
            || Container::SortedSet(BTreeMap::new()),
            |c, k| {
                as_sorted_set(c, k)?.remove(member);
                Ok(())
            },
        )
    }

    fn sorted_set_score(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
    ) -> Result<Option<i64>, StoreError> {
        self.lock()
            .read(table, key, |c, k| read_sorted_set_score(c, k, member))
    }

    fn sorted_set_incr(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
        delta: i64,
    ) -> Result<i64, StoreError> {
        self.lock().mutate(
            table,
            key,
            || Container::SortedSet(BTreeMap::new()),
            |c, k| {
                let set = as_sorted_set(c, k)?;
                let score = set.entry(member.to_vec()).or_insert(0);
                *score += delta;
                Ok(*score)
            },
        )
    }

    fn sorted_set_range_by_score(
        &self,
        table: &str,
        key: &[u8],
        min: i64,
        max: i64,
    ) -> Result<Vec<SortedSetEntry>, StoreError> {
        self.lock()
            .read(table, key, |c, k| read_sorted_set_range(c, k, min, max))
    }

    fn map_get(
        &self,
        table: &str,
        key: &[u8],
        field: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.lock()
            .read(table, key, |c, k| read_map_get(c, k, field))
    }

    fn map_set(
        &self,
        table: &str,
        key: &[u8],
        field: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError> {
        self.lock()
            .mutate(table, key, || Container::Map(BTreeMap::new()), |c, k| {
                as_map(c, k)?.insert(field.to_vec(), value.to_vec());
                Ok(())
            })
    }

    fn map_del(&self, table: &str, key: &[u8], field: &[u8]) -> Result<(), StoreError> {
        self.lock()
            .mutate(table, key, || Container::Map(BTreeMap::new()), |c, k| {
                as_map(c, k)?.remove(field);
                Ok(())
            })
    }

    fn map_get_all(&self, table: &str, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.lock().read(table, key, read_map_all)
    }

    fn list_push(&self, table: &str, key: &[u8], item: &[u8]) -> Result<(), StoreError> {
        self.lock()
            .mutate(table, key, || Container::List(Vec::new()), |c, k| {
                as_list(c, k)?.push(item.to_vec());
                Ok(())
            })
    }

    fn list_all(&self, table: &str, key: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.lock().read(table, key, read_list_all)
    }

    fn list_del(&self, table: &str, key: &[u8], item: &[u8]) -> Result<(), StoreError> {
        self.lock()
            .mutate(table, key, || Container::List(Vec::new()), |c, k| {
                as_list(c, k)?.retain(|i| i != item);
                Ok(())
            })
    }

    fn expire(&self, table: &str, key: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let k = (table.to_string(), key.to_vec());
        inner.purge_if_expired(&k, now_millis())?;
        if let Some(entry) = inner.entries.get(&k) {
            let mut entry = entry.clone();
            entry.expires_at = Some(now_millis() + ttl.num_milliseconds());
            inner.put_entry(&k, entry)?;
        }
        Ok(())
    }
}

impl Database for MemStore {
    fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        Ok(Box::new(MemTxn {
            store: self.clone(),
            state: Mutex::new(TxnState {
                buffer: HashMap::new(),
                watches: HashMap::new(),
            }),
        }))
    }

    fn flush(&self) -> Result<(), StoreError> {
        let inner = self.lock();
        if let Some(db) = &inner.sled {
            db.flush()
                .map_err(|e| StoreError::Persistence(e.to_string()))?;
        }
        Ok(())
    }
}

// ── Transactions ─────────────────────────────────────────────────────────────

struct TxnState {
    /// Copy-on-write container buffer; `None` marks deletion.
    buffer: HashMap<EntryKey, Option<Entry>>,
    /// Store versions captured at watch time.
    watches: HashMap<EntryKey, u64>,
}

/// A transaction over a [`MemStore`]. Dropping it without commit discards
/// all buffered writes.
pub struct MemTxn {
    store: MemStore,
    state: Mutex<TxnState>,
}

impl MemTxn {
    fn state(&self) -> MutexGuard<'_, TxnState> {
        self.state.lock().expect("transaction lock poisoned")
    }

    fn read<R>(
        &self,
        table: &str,
        key: &[u8],
        f: impl FnOnce(Option<&Container>, &EntryKey) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let k = (table.to_string(), key.to_vec());
        let state = self.state();
        if let Some(buffered) = state.buffer.get(&k) {
            return f(buffered.as_ref().map(|e| &e.container), &k);
        }
        drop(state);
        self.store.lock().read(table, key, f)
    }

    /// Pull the current container into the buffer (once) and mutate it there.
    fn mutate<R>(
        &self,
        table: &str,
        key: &[u8],
        make: impl FnOnce() -> Container,
        f: impl FnOnce(&mut Container, &EntryKey) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let k = (table.to_string(), key.to_vec());
        let mut state = self.state();
        if !state.buffer.contains_key(&k) {
            let mut inner = self.store.lock();
            inner.purge_if_expired(&k, now_millis())?;
            let current = inner.entries.get(&k).cloned();
            drop(inner);
            state.buffer.insert(k.clone(), current);
        }
        let slot = state.buffer.get_mut(&k).expect("buffered above");
        if slot.is_none() {
            *slot = Some(Entry {
                container: make(),
                expires_at: None,
            });
        }
        let entry = slot.as_mut().expect("filled above");
        let result = f(&mut entry.container, &k)?;
        if entry.container.is_empty() {
            *slot = None;
        }
        Ok(result)
    }
}

impl StoreOps for MemTxn {
    fn value_get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(table, key, read_value)
    }

    fn value_set(
        &self,
        table: &str,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let k = (table.to_string(), key.to_vec());
        let mut state = self.state();
        state.buffer.insert(
            k,
            Some(Entry {
                container: Container::Value(value.to_vec()),
                expires_at: ttl.map(|d| now_millis() + d.num_milliseconds()),
            }),
        );
        Ok(())
    }

    fn value_del(&self, table: &str, key: &[u8]) -> Result<(), StoreError> {
        let k = (table.to_string(), key.to_vec());
        self.state().buffer.insert(k, None);
        Ok(())
    }

    fn set_add(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError> {
        self.mutate(table, key, || Container::Set(BTreeSet::new()), |c, k| {
            as_set(c, k)?.insert(member.to_vec());
            Ok(())
        })
    }

    fn set_has(&self, table: &str, key: &[u8], member: &[u8]) -> Result<bool, StoreError> {
        self.read(table, key, |c, k| read_set_has(c, k, member))
    }

    fn set_del(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError> {
        self.mutate(table, key, || Container::Set(BTreeSet::new()), |c, k| {
            as_set(c, k)?.remove(member);
            Ok(())
        })
    }

    fn set_members(&self, table: &str, key: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.read(table, key, read_set_members)
    }

    fn sorted_set_add(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
        score: i64,
    ) -> Result<(), StoreError> {
        self.mutate(
            table,
            key,
            || Container::SortedSet(BTreeMap::new()),
            |c, k| {
                as_sorted_set(c, k)?.insert(member.to_vec(), score);
                Ok(())
            },
        )
    }

    fn sorted_set_del(&self, table: &str, key: &[u8], member: &[u8]) -> Result<(), StoreError> {
        self.mutate(
            table,
            key,
            || Container::SortedSet(BTreeMap::new()),
            |c, k| {
                as_sorted_set(c, k)?.remove(member);
                Ok(())
            },
        )
    }

    fn sorted_set_score(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
    ) -> Result<Option<i64>, StoreError> {
        self.read(table, key, |c, k| read_sorted_set_score(c, k, member))
    }

    fn sorted_set_incr(
        &self,
        table: &str,
        key: &[u8],
        member: &[u8],
        delta: i64,
    ) -> Result<i64, StoreError> {
        self.mutate(
            table,
            key,
            || Container::SortedSet(BTreeMap::new()),
            |c, k| {
                let set = as_sorted_set(c, k)?;
                let score = set.entry(member.to_vec()).or_insert(0);
                *score += delta;
                Ok(*score)
            },
        )
    }

    fn sorted_set_range_by_score(
        &self,
        table: &str,
        key: &[u8],
        min: i64,
        max: i64,
    ) -> Result<Vec<SortedSetEntry>, StoreError> {
        self.read(table, key, |c, k| read_sorted_set_range(c, k, min, max))
    }

    fn map_get(
        &self,
        table: &str,
        key: &[u8],
        field: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(table, key, |c, k| read_map_get(c, k, field))
    }

    fn map_set(
        &self,
        table: &str,
        key: &[u8],
        field: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError> {
        self.mutate(table, key, || Container::Map(BTreeMap::new()), |c, k| {
            as_map(c, k)?.insert(field.to_vec(), value.to_vec());
            Ok(())
        })
    }

    fn map_del(&self, table: &str, key: &[u8], field: &[u8]) -> Result<(), StoreError> {
        self.mutate(table, key, || Container::Map(BTreeMap::new()), |c, k| {
            as_map(c, k)?.remove(field);
            Ok(())
        })
    }

    fn map_get_all(&self, table: &str, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.read(table, key, read_map_all)
    }

    fn list_push(&self, table: &str, key: &[u8], item: &[u8]) -> Result<(), StoreError> {
        self.mutate(table, key, || Container::List(Vec::new()), |c, k| {
            as_list(c, k)?.push(item.to_vec());
            Ok(())
        })
    }

    fn list_all(&self, table: &str, key: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.read(table, key, read_list_all)
    }

    fn list_del(&self, table: &str, key: &[u8], item: &[u8]) -> Result<(), StoreError> {
        self.mutate(table, key, || Container::List(Vec::new()), |c, k| {
            as_list(c, k)?.retain(|i| i != item);
            Ok(())
        })
    }

    fn expire(&self, table: &str, key: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let k = (table.to_string(), key.to_vec());
        let mut state = self.state();
        if !state.buffer.contains_key(&k) {
            let mut inner = self.store.lock();
            inner.purge_if_expired(&k, now_millis())?;
            let current = inner.entries.get(&k).cloned();
            drop(inner);
            state.buffer.insert(k.clone(), current);
        }
        if let Some(Some(entry)) = state.buffer.get_mut(&k) {
            entry.expires_at = Some(now_millis() + ttl.num_milliseconds());
        }
        Ok(())
    }
}

impl StoreTxn for MemTxn {
    fn watch(&mut self, table: &str, key: &[u8]) -> Result<(), StoreError> {
        let k = (table.to_string(), key.to_vec());
        let mut inner = self.store.lock();
        inner.purge_if_expired(&k, now_millis())?;
        let version = inner.version(&k);
        drop(inner);
        self.state().watches.entry(k).or_insert(version);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemTxn { store, state } = *self;
        let state = state.into_inner().expect("transaction lock poisoned");
        let mut inner = store.lock();
        let now = now_millis();

        for (k, watched_version) in &state.watches {
            inner.purge_if_expired(k, now)?;
            if inner.version(k) != *watched_version {
                return Err(StoreError::Conflict);
            }
        }

        for (k, slot) in state.buffer {
            match slot {
                Some(entry) => inner.put_entry(&k, entry)?,
                None => inner.remove_entry(&k)?,
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        // Buffered writes are simply dropped.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[test]
    fn value_set_get_del() {
        let store = MemStore::new();
        assert_eq!(store.value_get("t", b"k").unwrap(), None);
        store.value_set("t", b"k", b"v", None).unwrap();
        assert_eq!(store.value_get("t", b"k").unwrap(), Some(b"v".to_vec()));
        store.value_del("t", b"k").unwrap();
        assert_eq!(store.value_get("t", b"k").unwrap(), None);
    }

    #[test]
    fn expired_value_reads_as_absent() {
        let store = MemStore::new();
        store
            .value_set("t", b"k", b"v", Some(Duration::milliseconds(-1)))
            .unwrap();
        assert_eq!(store.value_get("t", b"k").unwrap(), None);
    }

    #[test]
    fn expire_resets_ttl_on_existing_container() {
        let store = MemStore::new();
        store.map_set("t", b"k", b"f", b"v").unwrap();
        store.expire("t", b"k", Duration::milliseconds(-1)).unwrap();
        assert_eq!(store.map_get("t", b"k", b"f").unwrap(), None);

        store.map_set("t", b"k2", b"f", b"v").unwrap();
        store.expire("t", b"k2", Duration::days(1)).unwrap();
        assert!(store.map_get("t", b"k2", b"f").unwrap().is_some());
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let store = MemStore::new();
        store.set_add("t", b"k", b"m").unwrap();
        assert!(matches!(
            store.map_set("t", b"k", b"f", b"v"),
            Err(StoreError::WrongKind { .. })
        ));
    }

    #[test]
    fn set_membership() {
        let store = MemStore::new();
        assert!(!store.set_has("codes", b"user", b"a").unwrap());
        store.set_add("codes", b"user", b"a").unwrap();
        store.set_add("codes", b"user", b"b").unwrap();
        assert!(store.set_has("codes", b"user", b"a").unwrap());
        assert_eq!(store.set_members("codes", b"user").unwrap().len(), 2);
        store.set_del("codes", b"user", b"a").unwrap();
        assert!(!store.set_has("codes", b"user", b"a").unwrap());
    }

    #[test]
    fn sorted_set_scores_and_ranges() {
        let store = MemStore::new();
        store.sorted_set_add("d", b"z", b"near", 3).unwrap();
        store.sorted_set_add("d", b"z", b"far", 70).unwrap();
        assert_eq!(store.sorted_set_score("d", b"z", b"near").unwrap(), Some(3));

        let within = store.sorted_set_range_by_score("d", b"z", 0, 50).unwrap();
        assert_eq!(within.len(), 1);
        assert_eq!(within[0].member, b"near".to_vec());

        assert_eq!(store.sorted_set_incr("d", b"z", b"near", 2).unwrap(), 5);
        assert_eq!(store.sorted_set_incr("d", b"z", b"new", 1).unwrap(), 1);
    }

    #[test]
    fn map_fields() {
        let store = MemStore::new();
        store.map_set("m", b"k", b"f1", b"v1").unwrap();
        store.map_set("m", b"k", b"f2", b"v2").unwrap();
        assert_eq!(store.map_get("m", b"k", b"f1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(store.map_get_all("m", b"k").unwrap().len(), 2);
        store.map_del("m", b"k", b"f1").unwrap();
        assert_eq!(store.map_get("m", b"k", b"f1").unwrap(), None);
    }

    #[test]
    fn list_push_and_del() {
        let store = MemStore::new();
        store.list_push("l", b"k", b"a").unwrap();
        store.list_push("l", b"k", b"b").unwrap();
        store.list_push("l", b"k", b"a").unwrap();
        assert_eq!(store.list_all("l", b"k").unwrap().len(), 3);
        store.list_del("l", b"k", b"a").unwrap();
        assert_eq!(store.list_all("l", b"k").unwrap(), vec![b"b".to_vec()]);
    }

    #[test]
    fn txn_reads_its_own_writes() {
        let store = MemStore::new();
        let txn = store.begin().unwrap();
        txn.map_set("m", b"k", b"f", b"v").unwrap();
        assert_eq!(txn.map_get("m", b"k", b"f").unwrap(), Some(b"v".to_vec()));
        // Not visible outside before commit.
        assert_eq!(store.map_get("m", b"k", b"f").unwrap(), None);
        txn.commit().unwrap();
        assert_eq!(store.map_get("m", b"k", b"f").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn dropped_txn_rolls_back() {
        let store = MemStore::new();
        {
            let txn = store.begin().unwrap();
            txn.value_set("t", b"k", b"v", None).unwrap();
        }
        assert_eq!(store.value_get("t", b"k").unwrap(), None);
    }

    #[test]
    fn watched_key_change_aborts_commit() {
        let store = MemStore::new();
        store.value_set("t", b"k", b"old", None).unwrap();

        let mut txn = store.begin().unwrap();
        txn.watch("t", b"k").unwrap();
        txn.value_set("t", b"k", b"mine", None).unwrap();

        // Concurrent writer gets there first.
        store.value_set("t", b"k", b"theirs", None).unwrap();

        assert!(matches!(txn.commit(), Err(StoreError::Conflict)));
        assert_eq!(store.value_get("t", b"k").unwrap(), Some(b"theirs".to_vec()));
    }

    #[test]
    fn unwatched_txn_last_write_wins() {
        let store = MemStore::new();
        let txn = store.begin().unwrap();
        txn.value_set("t", b"k", b"mine", None).unwrap();
        store.value_set("t", b"k", b"theirs", None).unwrap();
        txn.commit().unwrap();
        assert_eq!(store.value_get("t", b"k").unwrap(), Some(b"mine".to_vec()));
    }

    #[test]
    fn txn_delete_applies_on_commit() {
        let store = MemStore::new();
        store.set_add("s", b"k", b"m").unwrap();
        let txn = store.begin().unwrap();
        txn.set_del("s", b"k", b"m").unwrap();
        assert!(!txn.set_has("s", b"k", b"m").unwrap());
        assert!(store.set_has("s", b"k", b"m").unwrap());
        txn.commit().unwrap();
        assert!(!store.set_has("s", b"k", b"m").unwrap());
    }

    #[test]
    fn persisted_state_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "termin-store-test-{}-{}",
            std::process::id(),
            now_millis()
        ));
        {
            let store = MemStore::open(&path).unwrap();
            store.value_set("t", b"k", b"v", None).unwrap();
            store.map_set("m", b"k", b"f", b"v2").unwrap();
            store
                .value_set("t", b"gone", b"x", Some(Duration::milliseconds(-1)))
                .unwrap();
            store.flush().unwrap();
        }
        {
            let store = MemStore::open(&path).unwrap();
            assert_eq!(store.value_get("t", b"k").unwrap(), Some(b"v".to_vec()));
            assert_eq!(store.map_get("m", b"k", b"f").unwrap(), Some(b"v2".to_vec()));
            assert_eq!(store.value_get("t", b"gone").unwrap(), None);
        }
        let _ = std::fs::remove_dir_all(&path);
    }
}
