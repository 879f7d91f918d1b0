//! CoordinationStore trait definition.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::store::{
    KeepAliveStream, LeaseId, RangeResponse, StoreError, Txn, TxnResponse, WatchStream,
};

/// Operations the worker requires from the coordination store.
///
/// All backends must implement this trait to be usable by the scheduling
/// engine. Semantics follow etcd v3: every mutation bumps a global revision,
/// keys bound to a lease disappear when the lease expires or is revoked.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Fetch every key starting with `prefix`, with the store revision the
    /// snapshot was taken at.
    async fn get_prefix(&self, prefix: &str) -> Result<RangeResponse, StoreError>;

    /// Write a key, optionally bound to a lease. Returns the new revision.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<i64, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Evaluate all comparisons atomically and run the matching branch.
    async fn txn(&self, txn: Txn) -> Result<TxnResponse, StoreError>;

    /// Grant a lease that expires after `ttl` unless renewed.
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Start renewing a lease until `cancel` fires or the lease is lost.
    ///
    /// The returned stream yields one item per renewal and closes when
    /// renewal stops.
    async fn keep_alive(
        &self,
        lease: LeaseId,
        cancel: CancellationToken,
    ) -> Result<KeepAliveStream, StoreError>;

    /// Revoke a lease, deleting every key bound to it.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError>;

    /// Watch every key under `prefix`.
    ///
    /// With `Some(revision)` the stream first replays retained history from
    /// that revision, then continues live, without gap or duplicate. With
    /// `None` only mutations after the call are delivered. Dropping the
    /// stream ends the watch.
    async fn watch(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<WatchStream, StoreError>;
}
