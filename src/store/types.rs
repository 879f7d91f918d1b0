//! Request and response types shared by coordination store backends.

use std::fmt;

use tokio::sync::mpsc;

/// Lease identifier handed out by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A stored key with its revision metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision at which the key was created. Zero means "never created".
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
    pub lease: Option<LeaseId>,
}

/// Result of a prefix scan.
#[derive(Debug, Clone, Default)]
pub struct RangeResponse {
    pub kvs: Vec<KeyValue>,
    /// Store revision the snapshot was taken at.
    pub revision: i64,
}

/// Transaction guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// True when the key's creation revision equals the given value.
    /// A key that does not exist has creation revision 0.
    CreateRevision { key: String, revision: i64 },
}

impl Compare {
    /// Guard that holds only while `key` does not exist.
    pub fn absent(key: impl Into<String>) -> Self {
        Compare::CreateRevision {
            key: key.into(),
            revision: 0,
        }
    }
}

/// Operation executed inside a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key: String,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOpResponse {
    Put { revision: i64 },
    Get { kv: Option<KeyValue> },
    Delete { deleted: bool },
}

/// Conditional transaction: `if compare { success } else { failure }`.
#[derive(Debug, Clone, Default)]
pub struct Txn {
    pub compare: Vec<Compare>,
    pub success: Vec<TxnOp>,
    pub failure: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compare: Compare) -> Self {
        self.compare.push(compare);
        self
    }

    pub fn and_then(mut self, op: TxnOp) -> Self {
        self.success.push(op);
        self
    }

    pub fn or_else(mut self, op: TxnOp) -> Self {
        self.failure.push(op);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TxnResponse {
    /// Whether every comparison held and the success branch ran.
    pub succeeded: bool,
    pub responses: Vec<TxnOpResponse>,
    pub revision: i64,
}

/// One successful lease renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub lease: LeaseId,
    pub ttl_ms: u64,
}

pub type KeepAliveStream = mpsc::Receiver<KeepAlive>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single key mutation observed by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    /// For deletes, `value` is empty and `mod_revision` is the deletion revision.
    pub kv: KeyValue,
}

pub type WatchStream = mpsc::UnboundedReceiver<WatchEvent>;
