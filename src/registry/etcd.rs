use super::{
    decode, encode, Action, Canceler, Registry, RegistryError, Result, Service, WatchEvent,
    WatchHandle, Watcher,
};
use async_trait::async_trait;
use etcd_client::{Client, EventType, PutOptions, WatchOptions, WatchStream};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use etcd_client::ConnectOptions;

/// Namespace every registration lives under.
const PREFIX: &str = "/micro/registry";

/// Service registry backed by an etcd cluster.
///
/// Entries are tied to leases: registering grants a lease for the requested
/// TTL and re-registering keeps it alive, so an instance that stops renewing
/// disappears from the registry once its lease expires.
#[derive(Clone)]
pub struct EtcdRegistry {
    client: Client,
    leases: Arc<Mutex<HashMap<String, i64>>>,
}

impl EtcdRegistry {
    /// Connect to the cluster. `options` carries auth, TLS and timeout
    /// settings straight through to `etcd_client`.
    pub async fn connect(endpoints: Vec<String>, options: Option<ConnectOptions>) -> Result<Self> {
        let client = Client::connect(endpoints, options)
            .await
            .map_err(RegistryError::transport)?;

        Ok(Self {
            client,
            leases: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn node_key(service: &str, node_id: &str) -> String {
        format!("{}/{}/{}", PREFIX, service, node_id)
    }

    /// Renew `lease_id` with a single keep-alive round trip. `Ok(false)` means
    /// the lease is gone and the entry must be re-put under a fresh one.
    async fn keep_alive_once(&self, lease_id: i64) -> Result<bool> {
        let mut lease = self.client.lease_client();
        let (mut keeper, mut responses) = lease
            .keep_alive(lease_id)
            .await
            .map_err(RegistryError::transport)?;
        keeper.keep_alive().await.map_err(RegistryError::transport)?;
        match responses.message().await.map_err(RegistryError::transport)? {
            Some(resp) if resp.ttl() > 0 => Ok(true),
            _ => Ok(false),
        }
    }

    async fn put_with_lease(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<i64> {
        let mut lease = self.client.lease_client();
        let grant = lease
            .grant(ttl.as_secs() as i64, None)
            .await
            .map_err(RegistryError::transport)?;

        let mut kv = self.client.kv_client();
        kv.put(key, value, Some(PutOptions::new().with_lease(grant.id())))
            .await
            .map_err(RegistryError::transport)?;

        Ok(grant.id())
    }
}

#[async_trait]
impl Registry for EtcdRegistry {
    async fn register(&self, service: &Service, ttl: Duration) -> Result<()> {
        if ttl < Duration::from_secs(1) {
            return Err(RegistryError::InvalidTtl(ttl));
        }

        for node in &service.nodes {
            let key = Self::node_key(&service.name, &node.id);

            let existing = { self.leases.lock().await.get(&key).copied() };
            if let Some(lease_id) = existing {
                if self.keep_alive_once(lease_id).await? {
                    debug!("Renewed lease {} for {}", lease_id, key);
                    continue;
                }
                debug!("Lease {} for {} expired, re-registering", lease_id, key);
            }

            let value = encode(&service.for_node(node))?;
            let lease_id = self.put_with_lease(&key, value, ttl).await?;
            self.leases.lock().await.insert(key, lease_id);
        }

        Ok(())
    }

    async fn deregister(&self, service: &Service) -> Result<()> {
        let mut kv = self.client.kv_client();

        for node in &service.nodes {
            let key = Self::node_key(&service.name, &node.id);
            kv.delete(key.as_str(), None)
                .await
                .map_err(RegistryError::transport)?;

            let lease_id = { self.leases.lock().await.remove(&key) };
            if let Some(lease_id) = lease_id {
                // failure here is harmless, the lease expires on its own
                let mut lease = self.client.lease_client();
                if let Err(e) = lease.revoke(lease_id).await {
                    warn!("Failed to revoke lease {} for {}: {}", lease_id, key, e);
                }
            }
        }

        Ok(())
    }

    async fn watch(&self) -> Result<(WatchHandle, Box<dyn Watcher>)> {
        let mut watch = self.client.watch_client();
        let (watcher, stream) = watch
            .watch(
                format!("{}/", PREFIX),
                Some(WatchOptions::new().with_prefix().with_prev_key()),
            )
            .await
            .map_err(RegistryError::transport)?;

        info!("Watching {} for service changes", PREFIX);
        let handle = WatchHandle::new(Arc::new(EtcdCanceler {
            watcher: Mutex::new(Some(watcher)),
        }));
        Ok((handle, Box::new(EtcdWatcher::new(stream))))
    }
}

struct EtcdCanceler {
    watcher: Mutex<Option<etcd_client::Watcher>>,
}

#[async_trait]
impl Canceler for EtcdCanceler {
    async fn cancel(&self) {
        if let Some(mut watcher) = self.watcher.lock().await.take() {
            if let Err(e) = watcher.cancel().await {
                warn!("Failed to cancel watch: {}", e);
            }
        }
    }
}

/// Normalizes the raw etcd event stream into lifecycle events.
///
/// etcd delivers responses in batches; buffered events are handed out one per
/// `next` call in arrival order. Cancellation arrives through the stream
/// itself once the paired [`WatchHandle`] fires.
pub struct EtcdWatcher {
    stream: WatchStream,
    pending: VecDeque<WatchEvent>,
    closed: bool,
}

impl EtcdWatcher {
    fn new(stream: WatchStream) -> Self {
        Self {
            stream,
            pending: VecDeque::new(),
            closed: false,
        }
    }
}

#[async_trait]
impl Watcher for EtcdWatcher {
    async fn next(&mut self) -> Result<WatchEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            if self.closed {
                return Err(RegistryError::StreamClosed);
            }

            match self.stream.message().await {
                Ok(Some(resp)) => {
                    if resp.canceled() {
                        self.closed = true;
                        return Err(RegistryError::StreamClosed);
                    }
                    for event in resp.events() {
                        let normalized = match event.event_type() {
                            EventType::Put => {
                                let kv = match event.kv() {
                                    Some(kv) => kv,
                                    None => continue,
                                };
                                // a malformed payload must not poison the stream
                                let service = match decode(kv.value()) {
                                    Some(service) => service,
                                    None => continue,
                                };
                                let action = if kv.create_revision() == kv.mod_revision() {
                                    Action::Create
                                } else {
                                    Action::Update
                                };
                                WatchEvent { action, service }
                            }
                            EventType::Delete => {
                                // the value is gone; identity comes from the tombstone
                                let prev = match event.prev_kv() {
                                    Some(prev) => prev,
                                    None => continue,
                                };
                                let service = match decode(prev.value()) {
                                    Some(service) => service,
                                    None => continue,
                                };
                                WatchEvent {
                                    action: Action::Delete,
                                    service,
                                }
                            }
                        };
                        self.pending.push_back(normalized);
                    }
                }
                Ok(None) => {
                    self.closed = true;
                    return Err(RegistryError::StreamClosed);
                }
                Err(e) => return Err(RegistryError::transport(e)),
            }
        }
    }
}
