//! etcd v3 backend, shared by every worker of a fleet.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, CompareOp, ConnectOptions, EventType, GetOptions, PutOptions, ResponseHeader,
    WatchOptions,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::store::{
    Compare, CoordinationStore, EventKind, KeepAlive, KeepAliveStream, KeyValue, LeaseId,
    RangeResponse, StoreError, Txn, TxnOp, TxnOpResponse, TxnResponse, WatchEvent, WatchStream,
};

const KEEP_ALIVE_BUFFER: usize = 16;
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(500);

/// Client handle to an etcd cluster. Clones share the underlying channel.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[String], dial_timeout: Duration) -> Result<Self, StoreError> {
        let options = ConnectOptions::new().with_connect_timeout(dial_timeout);
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(|e| {
                StoreError::Operation(format!("connect to {}: {}", endpoints.join(","), e))
            })?;

        tracing::info!(endpoints = ?endpoints, "Connected to etcd");
        Ok(Self { client })
    }

    fn client(&self) -> Client {
        self.client.clone()
    }
}

/// etcd leases are granted in whole seconds.
fn lease_ttl_secs(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1) as i64
}

fn renew_interval(granted_ttl_secs: i64) -> Duration {
    let ttl = Duration::from_secs(granted_ttl_secs.max(0) as u64);
    (ttl / 3).max(MIN_RENEW_INTERVAL)
}

fn store_error(error: etcd_client::Error, lease: Option<LeaseId>) -> StoreError {
    let message = error.to_string();
    match lease {
        Some(lease) if message.contains("lease not found") => StoreError::LeaseNotFound(lease),
        _ => StoreError::Operation(message),
    }
}

fn lease_of(id: i64) -> Option<LeaseId> {
    (id != 0).then_some(LeaseId(id))
}

fn revision(header: Option<&ResponseHeader>) -> i64 {
    header.map(ResponseHeader::revision).unwrap_or_default()
}

fn key_value(kv: &etcd_client::KeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        version: kv.version(),
        lease: lease_of(kv.lease()),
    }
}

fn put_options(lease: Option<LeaseId>) -> PutOptions {
    match lease {
        Some(lease) => PutOptions::new().with_lease(lease.0),
        None => PutOptions::new(),
    }
}

fn txn_op(op: &TxnOp) -> etcd_client::TxnOp {
    match op {
        TxnOp::Put { key, value, lease } => {
            etcd_client::TxnOp::put(key.as_str(), value.clone(), Some(put_options(*lease)))
        }
        TxnOp::Get { key } => etcd_client::TxnOp::get(key.as_str(), None),
        TxnOp::Delete { key } => etcd_client::TxnOp::delete(key.as_str(), None),
    }
}

fn txn_lease(txn: &Txn) -> Option<LeaseId> {
    txn.success
        .iter()
        .chain(&txn.failure)
        .find_map(|op| match op {
            TxnOp::Put { lease, .. } => *lease,
            _ => None,
        })
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> Result<RangeResponse, StoreError> {
        let response = self
            .client()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| store_error(e, None))?;

        Ok(RangeResponse {
            kvs: response.kvs().iter().map(key_value).collect(),
            revision: revision(response.header()),
        })
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<i64, StoreError> {
        let response = self
            .client()
            .put(key, value, Some(put_options(lease)))
            .await
            .map_err(|e| store_error(e, lease))?;
        Ok(revision(response.header()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let response = self
            .client()
            .delete(key, None)
            .await
            .map_err(|e| store_error(e, None))?;
        Ok(response.deleted() > 0)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse, StoreError> {
        let compare: Vec<etcd_client::Compare> = txn
            .compare
            .iter()
            .map(|c| match c {
                Compare::CreateRevision { key, revision } => {
                    etcd_client::Compare::create_revision(key.as_str(), CompareOp::Equal, *revision)
                }
            })
            .collect();
        let request = etcd_client::Txn::new()
            .when(compare)
            .and_then(txn.success.iter().map(txn_op).collect::<Vec<_>>())
            .or_else(txn.failure.iter().map(txn_op).collect::<Vec<_>>());

        let response = self
            .client()
            .txn(request)
            .await
            .map_err(|e| store_error(e, txn_lease(&txn)))?;

        let txn_revision = revision(response.header());
        let responses = response
            .op_responses()
            .into_iter()
            .filter_map(|op| match op {
                etcd_client::TxnOpResponse::Put(_) => Some(TxnOpResponse::Put {
                    revision: txn_revision,
                }),
                etcd_client::TxnOpResponse::Get(get) => Some(TxnOpResponse::Get {
                    kv: get.kvs().first().map(key_value),
                }),
                etcd_client::TxnOpResponse::Delete(delete) => Some(TxnOpResponse::Delete {
                    deleted: delete.deleted() > 0,
                }),
                etcd_client::TxnOpResponse::Txn(_) => None,
            })
            .collect();

        Ok(TxnResponse {
            succeeded: response.succeeded(),
            responses,
            revision: txn_revision,
        })
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let response = self
            .client()
            .lease_grant(lease_ttl_secs(ttl), None)
            .await
            .map_err(|e| store_error(e, None))?;
        Ok(LeaseId(response.id()))
    }

    async fn keep_alive(
        &self,
        lease: LeaseId,
        cancel: CancellationToken,
    ) -> Result<KeepAliveStream, StoreError> {
        let mut client = self.client();
        let status = client
            .lease_time_to_live(lease.0, None)
            .await
            .map_err(|e| store_error(e, Some(lease)))?;
        if status.ttl() <= 0 {
            return Err(StoreError::LeaseNotFound(lease));
        }

        let (mut keeper, mut responses) = client
            .lease_keep_alive(lease.0)
            .await
            .map_err(|e| store_error(e, Some(lease)))?;
        let (tx, rx) = mpsc::channel(KEEP_ALIVE_BUFFER);
        let interval = renew_interval(status.granted_ttl());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = keeper.keep_alive().await {
                            tracing::warn!(lease = %lease, error = %e, "Keep-alive request failed");
                            break;
                        }
                        match responses.message().await {
                            Ok(Some(renewed)) if renewed.ttl() > 0 => {
                                let _ = tx.try_send(KeepAlive {
                                    lease,
                                    ttl_ms: renewed.ttl() as u64 * 1000,
                                });
                            }
                            Ok(_) => {
                                tracing::debug!(lease = %lease, "Lease lost, stopping keep-alive");
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(lease = %lease, error = %e, "Keep-alive stream failed");
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
        self.client()
            .lease_revoke(lease.0)
            .await
            .map_err(|e| store_error(e, Some(lease)))?;
        Ok(())
    }

    async fn watch(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<WatchStream, StoreError> {
        let mut options = WatchOptions::new().with_prefix();
        if let Some(start) = start_revision {
            options = options.with_start_revision(start);
        }
        let (mut watcher, mut stream) = self
            .client()
            .watch(prefix, Some(options))
            .await
            .map_err(|e| store_error(e, None))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    message = stream.message() => match message {
                        Ok(Some(response)) => {
                            if response.compact_revision() > 0 {
                                tracing::error!(
                                    prefix = %prefix,
                                    compact_revision = response.compact_revision(),
                                    "Watch start revision compacted"
                                );
                                break;
                            }
                            if response.canceled() {
                                tracing::warn!(prefix = %prefix, reason = response.cancel_reason(), "Watch cancelled by server");
                                break;
                            }
                            for event in response.events() {
                                let Some(kv) = event.kv() else { continue };
                                let kind = match event.event_type() {
                                    EventType::Put => EventKind::Put,
                                    EventType::Delete => EventKind::Delete,
                                };
                                if tx.send(WatchEvent { kind, kv: key_value(kv) }).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(prefix = %prefix, error = %e, "Watch stream failed");
                            break;
                        }
                    },
                }
            }
            let _ = watcher.cancel().await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_ttl_rounds_up_to_seconds() {
        assert_eq!(lease_ttl_secs(Duration::from_secs(5)), 5);
        assert_eq!(lease_ttl_secs(Duration::from_millis(5_200)), 6);
        assert_eq!(lease_ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(lease_ttl_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_renew_interval_is_a_third_of_ttl() {
        assert_eq!(renew_interval(9), Duration::from_secs(3));
        assert_eq!(renew_interval(1), MIN_RENEW_INTERVAL);
        assert_eq!(renew_interval(-1), MIN_RENEW_INTERVAL);
    }

    #[test]
    fn test_lease_not_found_maps_to_lease_error() {
        let lost =
            etcd_client::Error::LeaseKeepAliveError("etcdserver: requested lease not found".to_string());
        assert_eq!(
            store_error(lost, Some(LeaseId(7))),
            StoreError::LeaseNotFound(LeaseId(7))
        );

        let other = etcd_client::Error::InvalidArgs("bad key".to_string());
        assert!(matches!(
            store_error(other, Some(LeaseId(7))),
            StoreError::Operation(_)
        ));
    }

    #[test]
    fn test_txn_lease_comes_from_put_ops() {
        let txn = Txn::new()
            .when(Compare::absent("/cron/lock/a"))
            .and_then(TxnOp::Put {
                key: "/cron/lock/a".to_string(),
                value: Vec::new(),
                lease: Some(LeaseId(42)),
            })
            .or_else(TxnOp::Get {
                key: "/cron/lock/a".to_string(),
            });
        assert_eq!(txn_lease(&txn), Some(LeaseId(42)));
        assert_eq!(txn_lease(&Txn::new()), None);
        assert_eq!(lease_of(0), None);
    }

    /// Needs an etcd server on `ETCD_ENDPOINT` (default `http://127.0.0.1:2379`).
    #[tokio::test]
    #[ignore]
    async fn test_lock_round_trip_against_live_etcd() {
        let endpoint =
            std::env::var("ETCD_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:2379".to_string());
        let store = EtcdStore::connect(&[endpoint], Duration::from_secs(2))
            .await
            .unwrap();

        let key = format!("/cronfleet-test/lock/{}", uuid::Uuid::new_v4());
        let lease = store.grant_lease(Duration::from_secs(5)).await.unwrap();
        let acquire = || {
            Txn::new()
                .when(Compare::absent(key.clone()))
                .and_then(TxnOp::Put {
                    key: key.clone(),
                    value: Vec::new(),
                    lease: Some(lease),
                })
        };

        assert!(store.txn(acquire()).await.unwrap().succeeded);
        assert!(!store.txn(acquire()).await.unwrap().succeeded);

        let mut watch = store.watch(&key, None).await.unwrap();
        store.revoke_lease(lease).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), watch.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Delete);
        assert!(store.get_prefix(&key).await.unwrap().kvs.is_empty());
    }
}
