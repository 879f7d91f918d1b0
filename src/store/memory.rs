//! In-process coordination store with etcd v3 semantics.
//!
//! Revisions, lease deadlines and watch history live behind a single mutex.
//! Lease expiry is applied lazily at the start of every operation and by
//! [`MemoryStore::run_lease_reaper`], so bound keys disappear (and watchers
//! see the delete) even when the store is otherwise idle.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::store::{
    Compare, CoordinationStore, EventKind, KeepAlive, KeepAliveStream, KeyValue, LeaseId,
    RangeResponse, StoreError, Txn, TxnOp, TxnOpResponse, TxnResponse, WatchEvent, WatchStream,
};

const DEFAULT_HISTORY_LIMIT: usize = 10_000;
const KEEP_ALIVE_BUFFER: usize = 16;
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

struct Entry {
    value: Vec<u8>,
    create_revision: i64,
    mod_revision: i64,
    version: i64,
    lease: Option<LeaseId>,
}

struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

struct State {
    revision: i64,
    next_lease: i64,
    kvs: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    history: VecDeque<WatchEvent>,
    history_limit: usize,
    /// Highest revision evicted from history; watches must start after it.
    compacted: i64,
    watchers: Vec<Watcher>,
}

/// Shared in-memory store. Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a store that retains at most `limit` watch events for replay.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                revision: 1,
                next_lease: 1,
                kvs: BTreeMap::new(),
                leases: HashMap::new(),
                history: VecDeque::new(),
                history_limit: limit.max(1),
                compacted: 0,
                watchers: Vec::new(),
            })),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        state.expire(Instant::now());
        Ok(state)
    }

    /// Number of live leases.
    pub fn lease_count(&self) -> usize {
        self.state().map(|s| s.leases.len()).unwrap_or(0)
    }

    /// Whether `key` currently exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state().map(|s| s.kvs.contains_key(key)).unwrap_or(false)
    }

    /// Current store revision.
    pub fn revision(&self) -> i64 {
        self.state().map(|s| s.revision).unwrap_or(0)
    }

    /// Expire overdue leases every `interval` until `shutdown` fires.
    pub async fn run_lease_reaper(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(MIN_RENEW_INTERVAL));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.state() {
                        tracing::error!(error = %e, "Lease reaper failed to lock store");
                        break;
                    }
                }
            }
        }
        tracing::debug!("Lease reaper stopped");
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn expire(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            tracing::trace!(lease = %id, "Lease expired");
            self.revoke(id);
        }
    }

    fn renew(&mut self, id: LeaseId, now: Instant) -> Option<Duration> {
        let lease = self.leases.get_mut(&id)?;
        lease.deadline = now + lease.ttl;
        Some(lease.ttl)
    }

    fn revoke(&mut self, id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };

        let mut keys: Vec<String> = lease.keys.into_iter().collect();
        keys.sort();
        if !keys.is_empty() {
            let revision = self.revision + 1;
            for key in keys {
                self.remove_key(&key, revision);
            }
            self.revision = revision;
        }
        true
    }

    fn range(&self, key: &str) -> Option<KeyValue> {
        self.kvs.get(key).map(|entry| to_key_value(key, entry))
    }

    fn check_lease(&self, lease: Option<LeaseId>) -> Result<(), StoreError> {
        match lease {
            Some(id) if !self.leases.contains_key(&id) => Err(StoreError::LeaseNotFound(id)),
            _ => Ok(()),
        }
    }

    fn insert_key(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>, revision: i64) {
        let previous_lease = self.kvs.get(key).and_then(|e| e.lease);
        if previous_lease != lease {
            if let Some(old) = previous_lease.and_then(|id| self.leases.get_mut(&id)) {
                old.keys.remove(key);
            }
        }
        if let Some(bound) = lease.and_then(|id| self.leases.get_mut(&id)) {
            bound.keys.insert(key.to_string());
        }

        let entry = self.kvs.entry(key.to_string()).or_insert(Entry {
            value: Vec::new(),
            create_revision: revision,
            mod_revision: revision,
            version: 0,
            lease: None,
        });
        entry.value = value;
        entry.mod_revision = revision;
        entry.version += 1;
        entry.lease = lease;

        let kv = to_key_value(key, entry);
        self.publish(WatchEvent {
            kind: EventKind::Put,
            kv,
        });
    }

    fn remove_key(&mut self, key: &str, revision: i64) -> bool {
        let Some(entry) = self.kvs.remove(key) else {
            return false;
        };
        if let Some(lease) = entry.lease.and_then(|id| self.leases.get_mut(&id)) {
            lease.keys.remove(key);
        }

        self.publish(WatchEvent {
            kind: EventKind::Delete,
            kv: KeyValue {
                key: key.to_string(),
                value: Vec::new(),
                create_revision: 0,
                mod_revision: revision,
                version: 0,
                lease: None,
            },
        });
        true
    }

    fn publish(&mut self, event: WatchEvent) {
        self.watchers.retain(|watcher| {
            if !event.kv.key.starts_with(&watcher.prefix) {
                return !watcher.tx.is_closed();
            }
            watcher.tx.send(event.clone()).is_ok()
        });

        self.history.push_back(event);
        while self.history.len() > self.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.compacted = evicted.kv.mod_revision;
            }
        }
    }

    fn compare(&self, compare: &Compare) -> bool {
        match compare {
            Compare::CreateRevision { key, revision } => {
                let actual = self.kvs.get(key).map(|e| e.create_revision).unwrap_or(0);
                actual == *revision
            }
        }
    }
}

fn to_key_value(key: &str, entry: &Entry) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: entry.value.clone(),
        create_revision: entry.create_revision,
        mod_revision: entry.mod_revision,
        version: entry.version,
        lease: entry.lease,
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> Result<RangeResponse, StoreError> {
        let state = self.state()?;
        let kvs = state
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| to_key_value(key, entry))
            .collect();

        Ok(RangeResponse {
            kvs,
            revision: state.revision,
        })
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<i64, StoreError> {
        let mut state = self.state()?;
        state.check_lease(lease)?;

        let revision = state.revision + 1;
        state.insert_key(key, value, lease, revision);
        state.revision = revision;
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let revision = state.revision + 1;
        let deleted = state.remove_key(key, revision);
        if deleted {
            state.revision = revision;
        }
        Ok(deleted)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse, StoreError> {
        let mut state = self.state()?;

        let succeeded = txn.compare.iter().all(|c| state.compare(c));
        let ops = if succeeded { txn.success } else { txn.failure };

        // Validate before applying so a failing branch leaves no partial writes.
        for op in &ops {
            if let TxnOp::Put { lease, .. } = op {
                state.check_lease(*lease)?;
            }
        }

        let revision = state.revision + 1;
        let mut mutated = false;
        let mut responses = Vec::with_capacity(ops.len());
        for op in ops {
            let response = match op {
                TxnOp::Put { key, value, lease } => {
                    state.insert_key(&key, value, lease, revision);
                    mutated = true;
                    TxnOpResponse::Put { revision }
                }
                TxnOp::Get { key } => TxnOpResponse::Get {
                    kv: state.range(&key),
                },
                TxnOp::Delete { key } => {
                    let deleted = state.remove_key(&key, revision);
                    mutated |= deleted;
                    TxnOpResponse::Delete { deleted }
                }
            };
            responses.push(response);
        }
        if mutated {
            state.revision = revision;
        }

        Ok(TxnResponse {
            succeeded,
            responses,
            revision: state.revision,
        })
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::Operation("lease TTL must be positive".to_string()));
        }

        let mut state = self.state()?;
        let id = LeaseId(state.next_lease);
        state.next_lease += 1;
        state.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn keep_alive(
        &self,
        lease: LeaseId,
        cancel: CancellationToken,
    ) -> Result<KeepAliveStream, StoreError> {
        let ttl = {
            let state = self.state()?;
            state
                .leases
                .get(&lease)
                .map(|l| l.ttl)
                .ok_or(StoreError::LeaseNotFound(lease))?
        };

        let (tx, rx) = mpsc::channel(KEEP_ALIVE_BUFFER);
        let inner = Arc::clone(&self.inner);
        let interval = (ttl / 3).max(MIN_RENEW_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        let renewed = match inner.lock() {
                            Ok(mut state) => {
                                let now = Instant::now();
                                state.expire(now);
                                state.renew(lease, now)
                            }
                            Err(_) => None,
                        };
                        match renewed {
                            Some(ttl) => {
                                let _ = tx.try_send(KeepAlive {
                                    lease,
                                    ttl_ms: ttl.as_millis() as u64,
                                });
                            }
                            None => {
                                tracing::debug!(lease = %lease, "Lease lost, stopping keep-alive");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.revoke(lease) {
            Ok(())
        } else {
            Err(StoreError::LeaseNotFound(lease))
        }
    }

    async fn watch(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<WatchStream, StoreError> {
        let mut state = self.state()?;
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(start) = start_revision {
            if state.compacted > 0 && start <= state.compacted {
                return Err(StoreError::Compacted {
                    requested: start,
                    oldest: state.compacted + 1,
                });
            }
            for event in state
                .history
                .iter()
                .filter(|e| e.kv.mod_revision >= start && e.kv.key.starts_with(prefix))
            {
                let _ = tx.send(event.clone());
            }
        }

        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}
