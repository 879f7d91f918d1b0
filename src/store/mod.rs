//! Coordination store contract used by the worker.
//!
//! The scheduling engine needs a small slice of an etcd-like key-value
//! store:
//! - prefix scans and single-key put/delete with revisions
//! - a conditional transaction comparing a key's creation revision
//! - leases with grant, keep-alive stream and revoke (revoking deletes bound keys)
//! - prefix watches starting from an explicit revision
//!
//! [`MemoryStore`] implements the whole contract in-process and backs
//! standalone workers and the test suite. `EtcdStore` (feature `etcd`) talks
//! to a shared etcd v3 cluster.

mod error;
#[cfg(feature = "etcd")]
mod etcd;
mod keys;
mod memory;
mod traits;
mod types;

pub use error::StoreError;
#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use keys::KeyLayout;
pub use memory::MemoryStore;
pub use traits::CoordinationStore;
pub use types::{
    Compare, EventKind, KeepAlive, KeepAliveStream, KeyValue, LeaseId, RangeResponse, Txn,
    TxnOp, TxnOpResponse, TxnResponse, WatchEvent, WatchStream,
};
