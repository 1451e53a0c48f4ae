use crate::addr;
use crate::config::Config;
use crate::registry::{Node, Registry, Result, Service};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{error, info};

/// Keeps one service instance present in the registry.
///
/// Owns the registration lifecycle: an explicit `register`/`deregister` pair,
/// plus a background renewal loop that re-registers on a fixed cadence so the
/// TTL never lapses while the instance is alive. Clones share state, which is
/// how the renewal task sees the same `registered` flag as the caller.
#[derive(Clone)]
pub struct Registrar {
    config: Arc<Config>,
    registry: Arc<dyn Registry>,
    registered: Arc<Mutex<bool>>,
    renewal: Arc<Mutex<Option<RenewalTask>>>,
}

struct RenewalTask {
    exit: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Registrar {
    pub fn new(registry: Arc<dyn Registry>, config: Config) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            registered: Arc::new(Mutex::new(false)),
            renewal: Arc::new(Mutex::new(None)),
        }
    }

    /// The registration parameters this instance runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the instance currently considers itself registered. Never
    /// blocks on the backend, only on the flag's own lock.
    pub async fn registered(&self) -> bool {
        *self.registered.lock().await
    }

    fn node(&self) -> Result<Node> {
        let (host, port) = addr::host_port(self.config.advertised());
        let address = addr::extract(host)?;
        Ok(Node {
            id: self.config.node_id(),
            address,
            port,
            metadata: self.config.metadata.clone(),
        })
    }

    fn service_with(&self, node: Node) -> Service {
        Service {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
            endpoints: Vec::new(),
            nodes: vec![node],
        }
    }

    /// Register this instance, or renew its TTL when already registered.
    ///
    /// The backend error is returned unchanged on failure and the registered
    /// state is left as it was.
    pub async fn register(&self) -> Result<()> {
        let node = self.node()?;
        let service = self.service_with(node);

        let was_registered = { *self.registered.lock().await };

        // the backend call stays outside the lock so status readers never
        // wait on network latency
        self.registry
            .register(&service, self.config.register_ttl)
            .await?;

        if was_registered {
            return Ok(());
        }

        info!("Registered node: {}", service.nodes[0].id);
        *self.registered.lock().await = true;
        Ok(())
    }

    /// Remove this instance from the registry. A no-op when not registered.
    ///
    /// The registered flag is cleared before anything can fail so shutdown
    /// never wedges on a half-dead backend; the error still reaches the
    /// caller.
    pub async fn deregister(&self) -> Result<()> {
        {
            let mut registered = self.registered.lock().await;
            if !*registered {
                return Ok(());
            }
            *registered = false;
        }

        let node = self.node()?;
        let service = self.service_with(node);

        info!("Deregistering node: {}", service.nodes[0].id);
        self.registry.deregister(&service).await
    }

    /// Spawn the background renewal loop. A zero interval leaves registration
    /// entirely to the caller.
    pub async fn start(&self) {
        if self.config.register_interval.is_zero() {
            return;
        }

        let (exit, rx) = mpsc::channel(1);
        let handle = tokio::spawn(self.clone().run(rx));
        *self.renewal.lock().await = Some(RenewalTask { exit, handle });
    }

    async fn run(self, mut exit: mpsc::Receiver<()>) {
        let period = self.config.register_interval;
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // best effort: a failed tick is retried on the next one
                    if let Err(e) = self.register().await {
                        error!("Failed to renew registration: {}", e);
                    }
                }
                _ = exit.recv() => {
                    info!("Stopping renewal loop");
                    break;
                }
            }
        }
    }

    /// Stop renewal, wait for the loop to exit, then deregister. Safe to call
    /// more than once; later calls find nothing left to stop.
    pub async fn stop(&self) -> Result<()> {
        let task = { self.renewal.lock().await.take() };
        if let Some(task) = task {
            let _ = task.exit.send(()).await;
            let _ = task.handle.await;
        }
        self.deregister().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RegistryError, WatchHandle, Watcher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Default)]
    struct MockRegistry {
        registers: AtomicUsize,
        deregisters: AtomicUsize,
        fail: AtomicBool,
        last_service: Mutex<Option<Service>>,
    }

    impl MockRegistry {
        fn fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn offline() -> RegistryError {
            RegistryError::transport(std::io::Error::other("registry offline"))
        }
    }

    #[async_trait]
    impl Registry for MockRegistry {
        async fn register(&self, service: &Service, _ttl: Duration) -> Result<()> {
            self.registers.fetch_add(1, Ordering::SeqCst);
            *self.last_service.lock().await = Some(service.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::offline());
            }
            Ok(())
        }

        async fn deregister(&self, _service: &Service) -> Result<()> {
            self.deregisters.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::offline());
            }
            Ok(())
        }

        async fn watch(&self) -> Result<(WatchHandle, Box<dyn Watcher>)> {
            unimplemented!("not used by registrar tests")
        }
    }

    /// Collects formatted log output so tests can count emissions.
    #[derive(Clone, Default)]
    struct LogSink(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogSink {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
        type Writer = LogSink;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn test_config(interval: Duration) -> Config {
        Config::builder()
            .name("auth")
            .id("abc")
            .advertise("10.0.0.5:9090")
            .register_interval(interval)
            .build()
    }

    #[tokio::test]
    async fn register_builds_the_expected_node() {
        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::ZERO));

        registrar.register().await.unwrap();

        let service = mock.last_service.lock().await.clone().unwrap();
        assert_eq!(service.name, "auth");
        assert_eq!(service.version, "1.0.0");
        assert!(service.endpoints.is_empty());
        assert_eq!(service.nodes.len(), 1);
        assert_eq!(service.nodes[0].id, "auth-abc");
        assert_eq!(service.nodes[0].address, "10.0.0.5");
        assert_eq!(service.nodes[0].port, 9090);
    }

    #[tokio::test]
    async fn repeated_register_renews_without_new_transition() {
        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::ZERO));

        registrar.register().await.unwrap();
        assert!(registrar.registered().await);

        registrar.register().await.unwrap();
        assert!(registrar.registered().await);
        assert_eq!(mock.registers.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_register_logs_the_transition_once() {
        let sink = LogSink::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::ZERO));

        registrar.register().await.unwrap();
        registrar.register().await.unwrap();

        // two backend calls, but only the first transition is announced
        assert_eq!(mock.registers.load(Ordering::SeqCst), 2);
        let logged = sink.contents();
        assert_eq!(
            logged.matches("Registered node: auth-abc").count(),
            1,
            "log output was:\n{}",
            logged
        );
    }

    #[tokio::test]
    async fn register_failure_leaves_state_untouched() {
        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::ZERO));

        mock.fail(true);
        assert!(registrar.register().await.is_err());
        assert!(!registrar.registered().await);

        mock.fail(false);
        registrar.register().await.unwrap();
        assert!(registrar.registered().await);
    }

    #[tokio::test]
    async fn deregister_without_registration_is_a_no_op() {
        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::ZERO));

        registrar.deregister().await.unwrap();
        assert_eq!(mock.deregisters.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deregister_clears_state_even_when_the_backend_fails() {
        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::ZERO));

        registrar.register().await.unwrap();
        mock.fail(true);

        assert!(registrar.deregister().await.is_err());
        assert!(!registrar.registered().await);
        assert_eq!(mock.deregisters.load(Ordering::SeqCst), 1);

        // already unregistered: no further backend call, no error
        registrar.deregister().await.unwrap();
        assert_eq!(mock.deregisters.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_loop_ticks_and_stop_deregisters_once() {
        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::from_millis(50)));

        registrar.start().await;
        sleep(Duration::from_millis(220)).await;
        registrar.stop().await.unwrap();

        // ~4 intervals elapsed; allow one tick of jitter either way
        let registers = mock.registers.load(Ordering::SeqCst);
        assert!((3..=5).contains(&registers), "got {} renewals", registers);
        assert_eq!(mock.deregisters.load(Ordering::SeqCst), 1);

        // second stop: nothing left to signal, nothing re-deregistered
        registrar.stop().await.unwrap();
        assert_eq!(mock.deregisters.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_loop_survives_backend_outages() {
        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::from_millis(50)));

        mock.fail(true);
        registrar.start().await;
        sleep(Duration::from_millis(120)).await;
        assert!(!registrar.registered().await);

        mock.fail(false);
        sleep(Duration::from_millis(120)).await;
        assert!(registrar.registered().await);

        registrar.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_disables_renewal() {
        let mock = Arc::new(MockRegistry::default());
        let registrar = Registrar::new(mock.clone(), test_config(Duration::ZERO));

        registrar.start().await;
        sleep(Duration::from_millis(200)).await;
        assert_eq!(mock.registers.load(Ordering::SeqCst), 0);

        // never registered, so stopping performs no deregistration either
        registrar.stop().await.unwrap();
        assert_eq!(mock.deregisters.load(Ordering::SeqCst), 0);
    }
}
