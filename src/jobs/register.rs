//! Worker presence under the worker namespace.
//!
//! Each worker keeps `worker_prefix + node id` alive under its own lease. If
//! renewal stops (lease lost, store hiccup) it registers again after a short
//! delay. Shutdown revokes the lease so the key disappears immediately.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::jobs::error::{JobError, JobResult};
use crate::store::{CoordinationStore, KeyLayout, LeaseId};

/// Resolve the node identity: the configured id, else the local IPv4 address.
pub fn node_id(configured: Option<&str>) -> JobResult<String> {
    match configured {
        Some(id) => Ok(id.to_string()),
        None => local_ipv4().map(|ip| ip.to_string()),
    }
}

/// First non-loopback IPv4 address bound to a local interface.
pub fn local_ipv4() -> JobResult<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs().map_err(|e| {
        tracing::warn!(error = %e, "Failed to list network interfaces");
        JobError::NoLocalIpFound
    })?;
    first_routable_ipv4(interfaces.iter().map(|iface| iface.ip()))
}

fn first_routable_ipv4(addrs: impl IntoIterator<Item = IpAddr>) -> JobResult<Ipv4Addr> {
    addrs
        .into_iter()
        .find_map(|addr| match addr {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
            _ => None,
        })
        .ok_or(JobError::NoLocalIpFound)
}

pub struct WorkerRegistration {
    store: Arc<dyn CoordinationStore>,
    key: String,
    ttl: Duration,
    retry: Duration,
}

impl WorkerRegistration {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        layout: &KeyLayout,
        node_id: &str,
        ttl: Duration,
        retry: Duration,
    ) -> Self {
        Self {
            store,
            key: layout.worker_key(node_id),
            ttl,
            retry,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Keep the registration alive until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            if let Err(e) = self.register_once(&shutdown).await {
                tracing::warn!(key = %self.key, error = %e, "Worker registration failed");
            }
            if shutdown.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.retry) => {}
            }
        }
        tracing::info!(key = %self.key, "Worker registration stopped");
    }

    /// Returns once renewal stops or shutdown revoked the lease.
    async fn register_once(&self, shutdown: &CancellationToken) -> JobResult<()> {
        let lease = self.store.grant_lease(self.ttl).await?;
        let renewal = shutdown.child_token();

        let mut keep_alive = match self.online(lease, &renewal).await {
            Ok(stream) => stream,
            Err(e) => {
                renewal.cancel();
                self.revoke(lease).await;
                return Err(e);
            }
        };
        tracing::info!(key = %self.key, lease = %lease, "Worker registered");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.revoke(lease).await;
                    return Ok(());
                }
                renewed = keep_alive.recv() => {
                    if renewed.is_none() {
                        tracing::warn!(key = %self.key, lease = %lease, "Registration lease lost");
                        renewal.cancel();
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn online(
        &self,
        lease: LeaseId,
        renewal: &CancellationToken,
    ) -> JobResult<crate::store::KeepAliveStream> {
        let stream = self.store.keep_alive(lease, renewal.clone()).await?;
        self.store.put(&self.key, Vec::new(), Some(lease)).await?;
        Ok(stream)
    }

    async fn revoke(&self, lease: LeaseId) {
        if let Err(e) = self.store.revoke_lease(lease).await {
            tracing::debug!(key = %self.key, lease = %lease, error = %e, "Lease already gone");
        }
    }
}
