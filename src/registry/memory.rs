use super::{
    decode, encode, Action, Canceler, Registry, RegistryError, Result, Service, WatchEvent,
    WatchHandle, Watcher,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};

/// Raw change feed entry, the in-process analogue of a backend watch event.
#[derive(Debug, Clone)]
enum RawChange {
    Put { created: bool, value: Vec<u8> },
    Delete { prev_value: Vec<u8> },
}

/// In-process registry for tests and single-process setups.
///
/// Stores the same encoded per-node payloads as the etcd backend so watchers
/// behave identically across the two. TTLs are accepted but entries are not
/// clock-expired; renewal behavior is observed through watch events and call
/// counts instead.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    store: HashMap<String, Vec<u8>>,
    subscribers: Vec<mpsc::UnboundedSender<RawChange>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_key(service: &str, node_id: &str) -> String {
        format!("{}/{}", service, node_id)
    }

    fn publish(inner: &mut Inner, change: RawChange) {
        inner.subscribers.retain(|tx| !tx.is_closed());
        for tx in &inner.subscribers {
            let _ = tx.send(change.clone());
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, service: &Service, _ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for node in &service.nodes {
            let key = Self::node_key(&service.name, &node.id);
            let value = encode(&service.for_node(node))?;
            let created = inner.store.insert(key, value.clone()).is_none();
            Self::publish(&mut inner, RawChange::Put { created, value });
        }
        Ok(())
    }

    async fn deregister(&self, service: &Service) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for node in &service.nodes {
            let key = Self::node_key(&service.name, &node.id);
            // deregistering an absent node stays silent, same as the backend contract
            if let Some(prev_value) = inner.store.remove(&key) {
                Self::publish(&mut inner, RawChange::Delete { prev_value });
            }
        }
        Ok(())
    }

    async fn watch(&self) -> Result<(WatchHandle, Box<dyn Watcher>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.subscribers.push(tx);

        let notify = Arc::new(Notify::new());
        let handle = WatchHandle::new(Arc::new(MemoryCanceler {
            notify: notify.clone(),
        }));
        Ok((
            handle,
            Box::new(MemoryWatcher {
                rx,
                notify,
                closed: false,
            }),
        ))
    }
}

struct MemoryCanceler {
    notify: Arc<Notify>,
}

#[async_trait]
impl Canceler for MemoryCanceler {
    async fn cancel(&self) {
        // one stored permit is enough, the watcher latches closed afterwards
        self.notify.notify_one();
    }
}

#[cfg(test)]
impl MemoryRegistry {
    /// Publish raw bytes as a put-create, bypassing the codec, so tests can
    /// feed malformed payloads through the watch path.
    pub(crate) async fn publish_raw(&self, bytes: Vec<u8>) {
        let mut inner = self.inner.lock().await;
        Self::publish(
            &mut inner,
            RawChange::Put {
                created: true,
                value: bytes,
            },
        );
    }
}

/// Watch half of [`MemoryRegistry`]; classification rules match the etcd
/// watcher. The paired [`WatchHandle`] closes it through the shared `Notify`.
pub struct MemoryWatcher {
    rx: mpsc::UnboundedReceiver<RawChange>,
    notify: Arc<Notify>,
    closed: bool,
}

#[async_trait]
impl Watcher for MemoryWatcher {
    async fn next(&mut self) -> Result<WatchEvent> {
        loop {
            if self.closed {
                return Err(RegistryError::StreamClosed);
            }

            tokio::select! {
                biased;
                _ = self.notify.notified() => {
                    self.closed = true;
                    return Err(RegistryError::StreamClosed);
                }
                change = self.rx.recv() => match change {
                    Some(RawChange::Put { created, value }) => {
                        let service = match decode(&value) {
                            Some(service) => service,
                            None => continue,
                        };
                        let action = if created { Action::Create } else { Action::Update };
                        return Ok(WatchEvent { action, service });
                    }
                    Some(RawChange::Delete { prev_value }) => {
                        let service = match decode(&prev_value) {
                            Some(service) => service,
                            None => continue,
                        };
                        return Ok(WatchEvent {
                            action: Action::Delete,
                            service,
                        });
                    }
                    None => {
                        self.closed = true;
                        return Err(RegistryError::StreamClosed);
                    }
                }
            }
        }
    }
}
