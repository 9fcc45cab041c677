//! Manager lifecycle.
//!
//! ```text
//! Uninitialized → Configured → CacheSyncing → Ready → Running → ShuttingDown → Terminated
//! ```
//!
//! [`Manager::new`] builds the split client, binds the metrics and health
//! listeners and registers the built-in checks, leaving the manager
//! `Configured`. Reconcilers, webhooks and extra checks are registered next.
//! [`Manager::start`] consumes the manager, so nothing can be registered once
//! it runs.
//!
//! Failures before `Ready` (cache sync timeout, a listener dying) end
//! `start` with an error. After `Ready` the manager only stops on the
//! shutdown signal, a lost leader lease or a server task exiting.

use std::fmt;
use std::future::Future;
use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use kube::api::GroupVersionKind;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::cache::{CacheSyncError, InformerCache};
use crate::client::{ClientError, ClientFactory, ClientOptions, DelegatingClientFactory, SplitClient};
use crate::controller::{ControllerBinding, ControllerOptions, Reconciler, TaskContext};
use crate::diagnostics::{ControllerSummary, DiagnosticsState};
use crate::health::{ApiServerCheck, Checker, Gate, HealthChecks, HealthError};
use crate::leader::{LeaderElectionError, LeaderElectionOptions, LeaderElector};
use crate::metrics::{self, ManagerMetrics};
use crate::registry::{kind_label, TypeRegistry};
use crate::webhook::{AdmissionHandler, WebhookError, WebhookServer};
use crate::health;

/// Errors raised by the manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The split client could not be built
    #[error("failed to build client: {0}")]
    Client(#[source] ClientError),

    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A listener could not be bound
    #[error("failed to bind {endpoint} listener on {addr}: {source}")]
    Bind {
        /// Which endpoint
        endpoint: &'static str,
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Metric registration failed
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe check registration failed
    #[error(transparent)]
    Health(#[from] HealthError),

    /// Registration does not fit the boot mode
    #[error("cannot register a {what} in {mode} mode")]
    ModeMismatch {
        /// What was being registered
        what: &'static str,
        /// Current mode
        mode: &'static str,
    },

    /// The kind is not in the type registry
    #[error("kind {0} is not registered")]
    UnknownKind(String),

    /// A controller with this name or kind exists
    #[error("controller {0} is already registered")]
    DuplicateController(String),

    /// Concurrency bound of zero
    #[error("controller {0} needs a concurrency bound of at least 1")]
    InvalidConcurrency(String),

    /// Webhook registration or serving failed
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// Caches did not sync
    #[error("cache sync failed: {0}")]
    CacheSync(#[from] CacheSyncError),

    /// Leader election failed
    #[error(transparent)]
    LeaderElection(#[from] LeaderElectionError),

    /// An HTTP server failed
    #[error("{endpoint} server failed: {source}")]
    Serve {
        /// Which server
        endpoint: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A long running task ended on its own
    #[error("{0} task exited unexpectedly")]
    TaskExited(&'static str),

    /// A long running task panicked
    #[error("task panicked: {0}")]
    TaskPanicked(#[from] JoinError),
}

/// What the process does, resolved once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootMode {
    /// Run one reconciler per managed kind, no webhooks
    Reconcile,
    /// Serve admission webhooks only
    Webhook {
        /// HTTPS port
        port: NonZeroU16,
        /// Directory holding `tls.crt` and `tls.key`
        cert_dir: PathBuf,
    },
}

impl BootMode {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            BootMode::Reconcile => "reconcile",
            BootMode::Webhook { .. } => "webhook",
        }
    }
}

/// Lifecycle position of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManagerState {
    /// Not built yet
    Uninitialized,
    /// Built, accepting registrations
    Configured,
    /// Waiting for leadership and the initial list of every kind
    CacheSyncing,
    /// Caches synced
    Ready,
    /// Workers dispatching
    Running,
    /// Draining
    ShuttingDown,
    /// Stopped
    Terminated,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Reconcile or webhook mode
    pub mode: BootMode,
    /// Restrict watches and cache to one namespace
    pub namespace: Option<String>,
    /// Metrics listener as `host:port`, `None` disables it
    pub metrics_addr: Option<String>,
    /// Probe listener as `host:port`, `None` disables it
    pub health_addr: Option<String>,
    /// How often every cached object is requeued
    pub sync_period: Duration,
    /// How long to wait for the initial list of every kind
    pub cache_sync_timeout: Duration,
    /// How long in-flight work may take to drain on shutdown
    pub graceful_shutdown_timeout: Duration,
    /// Lease settings, `None` disables leader election
    pub leader_election: Option<LeaderElectionOptions>,
    /// Options for writes
    pub client_options: ClientOptions,
    /// Builds the split client
    pub client_factory: Arc<dyn ClientFactory>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            mode: BootMode::Reconcile,
            namespace: None,
            metrics_addr: None,
            health_addr: None,
            sync_period: Duration::from_secs(600),
            cache_sync_timeout: Duration::from_secs(120),
            graceful_shutdown_timeout: Duration::from_secs(30),
            leader_election: None,
            client_options: ClientOptions::default(),
            client_factory: Arc::new(DelegatingClientFactory),
        }
    }
}

/// Owns every runtime component and drives the lifecycle.
pub struct Manager {
    registry: Arc<TypeRegistry>,
    kube_client: kube::Client,
    client: SplitClient,
    cache: Arc<InformerCache>,
    options: ManagerOptions,
    checks: HealthChecks,
    metrics: ManagerMetrics,
    bindings: Vec<ControllerBinding>,
    webhooks: Option<WebhookServer>,
    metrics_listener: Option<TcpListener>,
    health_listener: Option<TcpListener>,
    state: watch::Sender<ManagerState>,
    synced: Arc<AtomicBool>,
    leading: Arc<AtomicBool>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("mode", &self.options.mode)
            .field("state", &*self.state.borrow())
            .field("bindings", &self.bindings)
            .field("webhooks", &self.webhooks)
            .finish_non_exhaustive()
    }
}

/// Binds `addr`, resolving host names the way the socket API does.
async fn bind(endpoint: &'static str, addr: Option<&str>) -> Result<Option<TcpListener>, ManagerError> {
    let Some(addr) = addr else {
        info!(endpoint, "Listener disabled");
        return Ok(None);
    };
    let listener = TcpListener::bind(addr).await.map_err(|source| ManagerError::Bind {
        endpoint,
        addr: addr.to_string(),
        source,
    })?;
    match listener.local_addr() {
        Ok(local) => info!(endpoint, addr = %local, "Listener bound"),
        Err(_) => info!(endpoint, addr, "Listener bound"),
    }
    Ok(Some(listener))
}

async fn serve_http(
    endpoint: &'static str,
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> (&'static str, Result<(), ManagerError>) {
    let result = axum::serve(listener, router.layer(TraceLayer::new_for_http()))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|source| ManagerError::Serve { endpoint, source });
    (endpoint, result)
}

type TaskResult = Result<(&'static str, Result<(), ManagerError>), JoinError>;

fn task_exit(exited: TaskResult) -> ManagerError {
    match exited {
        Ok((task, Ok(()))) => ManagerError::TaskExited(task),
        Ok((_, Err(e))) => e,
        Err(e) => ManagerError::TaskPanicked(e),
    }
}

impl Manager {
    /// Connects to the API server through the configured client factory and
    /// prepares the manager.
    pub async fn new(
        registry: Arc<TypeRegistry>,
        config: kube::Config,
        options: ManagerOptions,
    ) -> Result<Self, ManagerError> {
        let cache = Arc::new(InformerCache::new());
        let kube_client = kube::Client::try_from(config.clone())?;
        let client = options
            .client_factory
            .build(registry.clone(), cache.clone(), config, &options.client_options)
            .await
            .map_err(ManagerError::Client)?;
        Self::from_parts(registry, kube_client, client, cache, options).await
    }

    /// Prepares a manager around an already built client.
    ///
    /// `cache` must be the cache `client` reads from for reconcilers to see
    /// watched objects.
    pub async fn from_parts(
        registry: Arc<TypeRegistry>,
        kube_client: kube::Client,
        client: SplitClient,
        cache: Arc<InformerCache>,
        options: ManagerOptions,
    ) -> Result<Self, ManagerError> {
        let (state, _) = watch::channel(ManagerState::Uninitialized);
        let metrics = ManagerMetrics::new()?;
        let metrics_listener = bind("metrics", options.metrics_addr.as_deref()).await?;
        let health_listener = bind("health", options.health_addr.as_deref()).await?;

        let synced = Arc::new(AtomicBool::new(false));
        let leading = Arc::new(AtomicBool::new(false));
        let mut checks = HealthChecks::default();
        checks.add_readyz("informer-sync", Arc::new(Gate::new(synced.clone(), "caches not synced")))?;
        checks.add_readyz(
            "apiserver",
            Arc::new(ApiServerCheck::new(client.clone(), Duration::from_secs(5))),
        )?;

        let webhooks = match &options.mode {
            BootMode::Reconcile => {
                if options.leader_election.is_some() {
                    checks.add_readyz("leader", Arc::new(Gate::new(leading.clone(), "not the leader")))?;
                }
                None
            }
            BootMode::Webhook { port, cert_dir } => Some(WebhookServer::new(*port, cert_dir.clone())),
        };

        info!(
            mode = options.mode.name(),
            kinds = registry.len(),
            namespace = options.namespace.as_deref().unwrap_or("<all>"),
            "Manager configured"
        );
        state.send_replace(ManagerState::Configured);

        Ok(Self {
            registry,
            kube_client,
            client,
            cache,
            options,
            checks,
            metrics,
            bindings: Vec::new(),
            webhooks,
            metrics_listener,
            health_listener,
            state,
            synced,
            leading,
        })
    }

    /// Client handed to reconcilers.
    pub fn client(&self) -> SplitClient {
        self.client.clone()
    }

    /// Type registry.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Boot mode.
    pub fn mode(&self) -> &BootMode {
        &self.options.mode
    }

    /// Watches lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ManagerState> {
        self.state.subscribe()
    }

    /// Registered probe checks.
    pub fn health_checks(&self) -> &HealthChecks {
        &self.checks
    }

    /// Metric set.
    pub fn metrics(&self) -> &ManagerMetrics {
        &self.metrics
    }

    /// Registered controller bindings.
    pub fn bindings(&self) -> &[ControllerBinding] {
        &self.bindings
    }

    /// Kinds with a registered webhook.
    pub fn webhook_kinds(&self) -> Vec<GroupVersionKind> {
        self.webhooks
            .as_ref()
            .map(WebhookServer::kinds)
            .unwrap_or_default()
    }

    /// Adds a named liveness check.
    pub fn add_healthz_check(&mut self, name: &str, checker: impl Checker + 'static) -> Result<(), ManagerError> {
        Ok(self.checks.add_healthz(name, Arc::new(checker))?)
    }

    /// Adds a named readiness check.
    pub fn add_readyz_check(&mut self, name: &str, checker: impl Checker + 'static) -> Result<(), ManagerError> {
        Ok(self.checks.add_readyz(name, Arc::new(checker))?)
    }

    /// Binds a reconciler to a registered kind.
    ///
    /// Only allowed in [`BootMode::Reconcile`]; one controller per kind.
    pub fn register_reconciler(
        &mut self,
        name: &str,
        gvk: &GroupVersionKind,
        worker: Arc<dyn Reconciler>,
        options: ControllerOptions,
    ) -> Result<(), ManagerError> {
        if self.options.mode != BootMode::Reconcile {
            return Err(ManagerError::ModeMismatch {
                what: "reconciler",
                mode: self.options.mode.name(),
            });
        }
        let kind = self
            .registry
            .get(gvk)
            .ok_or_else(|| ManagerError::UnknownKind(kind_label(gvk)))?
            .clone();
        if options.max_concurrent_reconciles == 0 {
            return Err(ManagerError::InvalidConcurrency(name.to_string()));
        }
        if self
            .bindings
            .iter()
            .any(|b| b.name() == name || b.kind().gvk() == gvk)
        {
            return Err(ManagerError::DuplicateController(name.to_string()));
        }

        info!(
            controller = name,
            kind = %kind.label(),
            max_concurrent_reconciles = options.max_concurrent_reconciles,
            "Registered controller"
        );
        self.bindings
            .push(ControllerBinding::new(name.to_string(), kind, options, worker));
        Ok(())
    }

    /// Adds an admission handler for a registered kind.
    ///
    /// Only allowed in [`BootMode::Webhook`]; one handler per kind.
    pub fn register_webhook(&mut self, handler: Arc<dyn AdmissionHandler>) -> Result<(), ManagerError> {
        let Some(server) = self.webhooks.as_mut() else {
            return Err(ManagerError::ModeMismatch {
                what: "webhook",
                mode: self.options.mode.name(),
            });
        };
        let gvk = handler.gvk();
        if !self.registry.contains(&gvk) {
            return Err(ManagerError::UnknownKind(kind_label(&gvk)));
        }
        server.register(handler)?;
        Ok(())
    }

    /// Snapshot for the diagnostics endpoint.
    pub fn diagnostics(&self) -> DiagnosticsState {
        let controllers = self
            .bindings
            .iter()
            .map(|b| ControllerSummary {
                name: b.name().to_string(),
                kind: b.kind().label(),
                max_concurrent_reconciles: b.options().max_concurrent_reconciles,
            })
            .collect();
        let webhooks = self.webhook_kinds().iter().map(kind_label).collect();
        DiagnosticsState::new(
            self.state.subscribe(),
            controllers,
            webhooks,
            self.cache.clone(),
            self.leading.clone(),
        )
    }

    /// Runs until `shutdown` resolves or a fatal error occurs.
    pub async fn start<F>(self, shutdown: F) -> Result<(), ManagerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Manager {
            registry: _,
            kube_client,
            client,
            cache,
            options,
            checks,
            metrics,
            bindings,
            webhooks,
            metrics_listener,
            health_listener,
            state,
            synced,
            leading,
        } = self;

        let cancel = CancellationToken::new();
        let mut servers: JoinSet<(&'static str, Result<(), ManagerError>)> = JoinSet::new();
        let mut controllers: JoinSet<()> = JoinSet::new();

        if let Some(listener) = metrics_listener {
            servers.spawn(serve_http("metrics", listener, metrics::router(metrics.clone()), cancel.clone()));
        }
        if let Some(listener) = health_listener {
            servers.spawn(serve_http("health", listener, health::router(Arc::new(checks)), cancel.clone()));
        }
        if let Some(server) = webhooks {
            let token = cancel.clone();
            servers.spawn(async move { ("webhook", server.serve(token).await.map_err(ManagerError::from)) });
        }

        tokio::pin!(shutdown);
        let outcome: Result<(), ManagerError> = async {
            state.send_replace(ManagerState::CacheSyncing);

            // standbys never start watches or workers
            if let Some(lease) = options.leader_election.clone().filter(|_| !bindings.is_empty()) {
                let elector = LeaderElector::new(kube_client.clone(), lease);
                let acquired = tokio::select! {
                    () = &mut shutdown => return Ok(()),
                    Some(exited) = servers.join_next() => return Err(task_exit(exited)),
                    acquired = elector.acquire(&cancel) => acquired,
                };
                if !acquired {
                    return Ok(());
                }
                leading.store(true, Ordering::SeqCst);
                metrics.set_leader(true);
                let token = cancel.clone();
                servers.spawn(async move { ("leader-election", elector.hold(token).await.map_err(ManagerError::from)) });
            }

            for binding in bindings {
                let context = TaskContext {
                    client: client.clone(),
                    cache: cache.clone(),
                    metrics: metrics.clone(),
                    sync_period: options.sync_period,
                    cancel: cancel.clone(),
                };
                controllers.spawn(binding.into_task(kube_client.clone(), options.namespace.as_deref(), context));
            }

            tokio::select! {
                () = &mut shutdown => return Ok(()),
                Some(exited) = servers.join_next() => return Err(task_exit(exited)),
                result = cache.wait_for_sync(options.cache_sync_timeout) => result?,
            }
            synced.store(true, Ordering::SeqCst);
            state.send_replace(ManagerState::Ready);
            info!("Manager ready");
            state.send_replace(ManagerState::Running);

            tokio::select! {
                () = &mut shutdown => Ok(()),
                Some(exited) = servers.join_next() => Err(task_exit(exited)),
            }
        }
        .await;

        match &outcome {
            Ok(()) => info!("Shutting down"),
            Err(e) => error!(error = %e, "Manager failed, shutting down"),
        }
        state.send_replace(ManagerState::ShuttingDown);
        synced.store(false, Ordering::SeqCst);
        cancel.cancel();

        let grace = options.graceful_shutdown_timeout;
        let drained = tokio::time::timeout(grace, async {
            while controllers.join_next().await.is_some() {}
            while let Some(exited) = servers.join_next().await {
                if let Ok((task, Err(e))) = exited {
                    warn!(task, error = %e, "Task failed during shutdown");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(?grace, "Graceful shutdown timed out, aborting remaining tasks");
            controllers.abort_all();
            servers.abort_all();
        }

        leading.store(false, Ordering::SeqCst);
        metrics.set_leader(false);
        state.send_replace(ManagerState::Terminated);
        info!("Manager stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockCache, MockStore};
    use crate::controller::{Action, ReconcileError, Request};
    use crate::health::Ping;
    use crate::registry::gvk_of;
    use crate::webhook::{TypedWebhook, Webhook};
    use async_trait::async_trait;
    use crds::v1alpha3::{Cluster, Machine};

    struct Noop;

    #[async_trait]
    impl Reconciler for Noop {
        async fn reconcile(&self, _request: &Request, _client: &SplitClient) -> Result<Action, ReconcileError> {
            Ok(Action::await_change())
        }
    }

    struct AllowMachines;

    impl Webhook for AllowMachines {
        type Object = Machine;
    }

    fn registry() -> Arc<TypeRegistry> {
        let mut builder = TypeRegistry::builder();
        builder
            .register::<Cluster>()
            .unwrap()
            .register::<Machine>()
            .unwrap();
        builder.build()
    }

    async fn build_manager(options: ManagerOptions) -> Manager {
        let registry = registry();
        // never contacted unless a controller starts watching
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        let kube_client = kube::Client::try_from(config).unwrap();
        let cache = Arc::new(InformerCache::new());
        let store = Arc::new(MockStore::new());
        let client = SplitClient::new(registry.clone(), Arc::new(MockCache::new()), store.clone(), store);
        Manager::from_parts(registry, kube_client, client, cache, options)
            .await
            .unwrap()
    }

    fn webhook_mode() -> ManagerOptions {
        ManagerOptions {
            mode: BootMode::Webhook {
                port: NonZeroU16::new(9443).unwrap(),
                cert_dir: PathBuf::from("/nonexistent"),
            },
            ..ManagerOptions::default()
        }
    }

    #[tokio::test]
    async fn test_new_manager_is_configured() {
        let manager = build_manager(ManagerOptions::default()).await;

        assert_eq!(*manager.state().borrow(), ManagerState::Configured);
        assert_eq!(
            manager.health_checks().readyz_names(),
            vec!["informer-sync", "apiserver"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_controller_is_rejected() {
        let mut manager = build_manager(ManagerOptions::default()).await;
        let gvk = gvk_of::<Machine>();

        manager
            .register_reconciler("machine", &gvk, Arc::new(Noop), ControllerOptions::concurrency(10))
            .unwrap();
        let err = manager
            .register_reconciler("machine-2", &gvk, Arc::new(Noop), ControllerOptions::concurrency(10))
            .unwrap_err();

        assert!(matches!(err, ManagerError::DuplicateController(_)));
        assert_eq!(manager.bindings().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kind_and_zero_concurrency_are_rejected() {
        let mut manager = build_manager(ManagerOptions::default()).await;
        let unknown = GroupVersionKind::gvk("cluster.x-k8s.io", "v1alpha3", "MachineSet");

        assert!(matches!(
            manager.register_reconciler("ms", &unknown, Arc::new(Noop), ControllerOptions::default()),
            Err(ManagerError::UnknownKind(_))
        ));
        assert!(matches!(
            manager.register_reconciler("m", &gvk_of::<Machine>(), Arc::new(Noop), ControllerOptions::concurrency(0)),
            Err(ManagerError::InvalidConcurrency(_))
        ));
    }

    #[tokio::test]
    async fn test_modes_are_exclusive() {
        let mut reconcile = build_manager(ManagerOptions::default()).await;
        assert!(matches!(
            reconcile.register_webhook(Arc::new(TypedWebhook::new(AllowMachines))),
            Err(ManagerError::ModeMismatch { what: "webhook", .. })
        ));

        let mut webhook = build_manager(webhook_mode()).await;
        assert!(matches!(
            webhook.register_reconciler("m", &gvk_of::<Machine>(), Arc::new(Noop), ControllerOptions::default()),
            Err(ManagerError::ModeMismatch { what: "reconciler", .. })
        ));
        webhook
            .register_webhook(Arc::new(TypedWebhook::new(AllowMachines)))
            .unwrap();
        assert_eq!(webhook.webhook_kinds(), vec![gvk_of::<Machine>()]);
    }

    #[tokio::test]
    async fn test_custom_checks_reject_duplicates() {
        let mut manager = build_manager(ManagerOptions::default()).await;

        manager.add_readyz_check("ping", Ping).unwrap();
        manager.add_healthz_check("ping", Ping).unwrap();
        assert!(matches!(
            manager.add_readyz_check("informer-sync", Ping),
            Err(ManagerError::Health(_))
        ));
    }

    #[tokio::test]
    async fn test_start_fails_when_caches_never_sync() {
        let mut manager = build_manager(ManagerOptions {
            cache_sync_timeout: Duration::from_millis(300),
            graceful_shutdown_timeout: Duration::from_secs(2),
            ..ManagerOptions::default()
        })
        .await;
        manager
            .register_reconciler("machine", &gvk_of::<Machine>(), Arc::new(Noop), ControllerOptions::concurrency(2))
            .unwrap();
        let mut state = manager.state();

        let result = manager.start(std::future::pending()).await;

        assert!(matches!(result, Err(ManagerError::CacheSync(_))));
        assert_eq!(*state.borrow_and_update(), ManagerState::Terminated);
    }

    #[tokio::test]
    async fn test_start_fails_without_webhook_certificates() {
        let mut manager = build_manager(webhook_mode()).await;
        manager
            .register_webhook(Arc::new(TypedWebhook::new(AllowMachines)))
            .unwrap();
        let state = manager.state();

        let result = manager.start(std::future::pending()).await;

        assert!(matches!(result, Err(ManagerError::Webhook(WebhookError::Tls { .. }))));
        assert_eq!(*state.borrow(), ManagerState::Terminated);
    }

    #[tokio::test]
    async fn test_start_stops_on_shutdown_signal() {
        let manager = build_manager(ManagerOptions::default()).await;
        let state = manager.state();

        manager.start(async {}).await.unwrap();

        assert_eq!(*state.borrow(), ManagerState::Terminated, "shutdown should end in Terminated");
    }

    #[tokio::test]
    async fn test_listeners_resolve_host_names() {
        let manager = build_manager(ManagerOptions {
            metrics_addr: Some("localhost:0".to_string()),
            health_addr: Some("127.0.0.1:0".to_string()),
            ..ManagerOptions::default()
        })
        .await;

        assert!(manager.metrics_listener.is_some(), "localhost should resolve");
        assert!(manager.health_listener.is_some());
    }

    #[tokio::test]
    async fn test_taken_port_is_a_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = bind("metrics", Some(&addr)).await.unwrap_err();

        assert!(matches!(err, ManagerError::Bind { endpoint: "metrics", .. }));
    }
}
