//! Controller bindings.
//!
//! A [`ControllerBinding`] ties a [`Reconciler`] to one registered kind.
//! Once the manager starts, each binding becomes a `kube_runtime`
//! [`Controller`] over [`DynamicObject`]s of that kind: its reflector store
//! feeds the shared informer cache and its scheduler provides the work queue.
//!
//! The queue deduplicates requests per object and never runs two reconciles
//! for the same object at once; `max_concurrent_reconciles` bounds how many
//! distinct objects are reconciled in parallel.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube_runtime::controller::{Config as ControllerConfig, Error as ControllerRunError};
use kube_runtime::reflector::Store;
use kube_runtime::{watcher, Controller};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use kube_runtime::controller::Action;

use crate::backoff::{KeyedBackoff, DEFAULT_MIN_BACKOFF};
use crate::cache::InformerCache;
use crate::client::{ClientError, ObjectKey, SplitClient};
use crate::metrics::ManagerMetrics;
use crate::registry::RegisteredKind;

/// Identifies the object to reconcile.
pub type Request = ObjectKey;

/// Failure returned by a reconciler.
///
/// The request is requeued after `requeue_after` when set, otherwise after
/// the object's next backoff step.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ReconcileError {
    message: String,
    requeue_after: Option<Duration>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ReconcileError {
    /// Error with a message and no cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requeue_after: None,
            source: None,
        }
    }

    /// Overrides the backoff for this failure.
    #[must_use]
    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = Some(delay);
        self
    }

    /// Requested delay, if any.
    pub fn requeue_hint(&self) -> Option<Duration> {
        self.requeue_after
    }
}

impl From<ClientError> for ReconcileError {
    fn from(err: ClientError) -> Self {
        Self {
            message: err.to_string(),
            requeue_after: None,
            source: Some(Box::new(err)),
        }
    }
}

/// Drives one kind towards its desired state.
///
/// Called with the key of an object that changed, was resynced or was
/// requeued. The object may have been deleted in the meantime.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Reconciles one object.
    async fn reconcile(&self, request: &Request, client: &SplitClient) -> Result<Action, ReconcileError>;
}

/// Per-controller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Upper bound on parallel reconciles of distinct objects
    pub max_concurrent_reconciles: u16,
    /// Quiet period before a burst of events is reconciled
    pub debounce: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 1,
            debounce: Duration::ZERO,
        }
    }
}

impl ControllerOptions {
    /// Options with the given concurrency bound.
    pub fn concurrency(max_concurrent_reconciles: u16) -> Self {
        Self {
            max_concurrent_reconciles,
            ..Self::default()
        }
    }
}

/// A reconciler bound to a kind.
pub struct ControllerBinding {
    name: String,
    kind: RegisteredKind,
    options: ControllerOptions,
    worker: Arc<dyn Reconciler>,
}

impl fmt::Debug for ControllerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerBinding")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ControllerBinding {
    pub(crate) fn new(
        name: String,
        kind: RegisteredKind,
        options: ControllerOptions,
        worker: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            name,
            kind,
            options,
            worker,
        }
    }

    /// Controller name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind being reconciled.
    pub fn kind(&self) -> &RegisteredKind {
        &self.kind
    }

    /// Tuning options.
    pub fn options(&self) -> ControllerOptions {
        self.options
    }

    /// Builds the controller, publishes its store into `cache` and returns
    /// the future that runs it until `cancel` fires.
    pub(crate) fn into_task(
        self,
        kube_client: kube::Client,
        namespace: Option<&str>,
        context: TaskContext,
    ) -> impl Future<Output = ()> + Send + use<> {
        let resource = self.kind.resource().clone();
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(kube_client, ns, &resource),
            None => Api::all_with(kube_client, &resource),
        };
        self.drive(Controller::new_with(api, watcher::Config::default(), resource), context)
    }

    /// Applies the binding's tuning, resync and shutdown to `controller`.
    fn drive(
        self,
        controller: Controller<DynamicObject>,
        context: TaskContext,
    ) -> impl Future<Output = ()> + Send + use<> {
        let config = ControllerConfig::default()
            .concurrency(self.options.max_concurrent_reconciles)
            .debounce(self.options.debounce);
        let controller = controller
            .with_config(config)
            .reconcile_all_on(resync_trigger(context.sync_period, context.cancel.clone()))
            .graceful_shutdown_on(shutdown(context.cancel.clone()));
        let store = controller.store();
        context.cache.insert_store(self.kind.gvk().clone(), store.clone());
        context
            .metrics
            .set_max_concurrent(&self.name, self.options.max_concurrent_reconciles);

        let name = self.name.clone();
        let dispatch_context = Arc::new(DispatchContext {
            name: self.name,
            worker: self.worker,
            client: context.client,
            metrics: context.metrics,
            backoff: KeyedBackoff::default(),
            store,
        });

        async move {
            info!(controller = %name, "Starting controller");
            controller
                .run(dispatch, error_policy, dispatch_context)
                .for_each(|res| {
                    let name = name.clone();
                    async move {
                        match res {
                            Ok((object, _)) => debug!(controller = %name, object = %object, "Reconciled"),
                            // already logged by dispatch
                            Err(ControllerRunError::ReconcilerFailed(..)) => {}
                            Err(e) => warn!(controller = %name, error = %e, "Controller error"),
                        }
                    }
                })
                .await;
            info!(controller = %name, "Controller stopped");
        }
    }
}

/// Shared pieces every binding needs at start.
pub(crate) struct TaskContext {
    pub(crate) client: SplitClient,
    pub(crate) cache: Arc<InformerCache>,
    pub(crate) metrics: ManagerMetrics,
    pub(crate) sync_period: Duration,
    pub(crate) cancel: CancellationToken,
}

async fn shutdown(cancel: CancellationToken) {
    cancel.cancelled().await;
}

/// Fires every `period` so every cached object is requeued.
fn resync_trigger(
    period: Duration,
    cancel: CancellationToken,
) -> futures::channel::mpsc::Receiver<()> {
    let (mut tx, rx) = futures::channel::mpsc::channel(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    // a full channel means a resync is already pending
                    if tx.try_send(()).is_err() && tx.is_closed() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

struct DispatchContext {
    name: String,
    worker: Arc<dyn Reconciler>,
    client: SplitClient,
    metrics: ManagerMetrics,
    backoff: KeyedBackoff,
    store: Store<DynamicObject>,
}

impl DispatchContext {
    fn live_keys(&self) -> HashSet<ObjectKey> {
        self.store
            .state()
            .iter()
            .filter_map(|object| ObjectKey::from_object(object.as_ref()))
            .collect()
    }
}

async fn dispatch(
    object: Arc<DynamicObject>,
    ctx: Arc<DispatchContext>,
) -> Result<Action, ReconcileError> {
    let Some(request) = ObjectKey::from_object(object.as_ref()) else {
        return Err(ReconcileError::new("object has no name"));
    };

    let _active = ctx.metrics.track_active(&ctx.name);
    let timer = ctx.metrics.start_timer(&ctx.name);
    debug!(controller = %ctx.name, object = %request, "Reconciling");
    let result = ctx.worker.reconcile(&request, &ctx.client).await;
    timer.observe_duration();

    match &result {
        Ok(_) => {
            ctx.metrics.record_success(&ctx.name);
            ctx.backoff.reset(&request);
        }
        Err(e) => {
            ctx.metrics.record_error(&ctx.name);
            error!(controller = %ctx.name, object = %request, error = %e, "Reconciliation failed");
        }
    }
    result
}

fn error_policy(object: Arc<DynamicObject>, err: &ReconcileError, ctx: Arc<DispatchContext>) -> Action {
    // deleted objects are never reconciled again, so their sequences would
    // otherwise stay forever
    let live = ctx.live_keys();
    ctx.backoff.retain(|key| live.contains(key));

    let delay = match (err.requeue_hint(), ObjectKey::from_object(object.as_ref())) {
        (Some(delay), _) => delay,
        (None, Some(key)) if live.contains(&key) => ctx.backoff.next(&key),
        (None, _) => DEFAULT_MIN_BACKOFF,
    };
    debug!(controller = %ctx.name, ?delay, "Requeueing after error");
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockCache, MockStore};
    use crate::registry::{gvk_of, TypeRegistry};
    use crds::v1alpha3::Machine;
    use kube_runtime::reflector::store::Writer;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Flaky {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Reconciler for Flaky {
        async fn reconcile(&self, request: &Request, _client: &SplitClient) -> Result<Action, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ReconcileError::new(format!("{request} is broken")))
            } else {
                Ok(Action::await_change())
            }
        }
    }

    /// Records how reconciles overlap.
    #[derive(Default)]
    struct Tracker {
        active: AtomicUsize,
        peak: AtomicUsize,
        overlaps: AtomicUsize,
        in_flight: Mutex<HashSet<ObjectKey>>,
        calls: Mutex<HashMap<ObjectKey, usize>>,
    }

    #[async_trait]
    impl Reconciler for Tracker {
        async fn reconcile(&self, request: &Request, _client: &SplitClient) -> Result<Action, ReconcileError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            let fresh = self.in_flight.lock().unwrap().insert(request.clone());
            if !fresh {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            *self.calls.lock().unwrap().entry(request.clone()).or_default() += 1;

            tokio::time::sleep(Duration::from_millis(40)).await;

            self.in_flight.lock().unwrap().remove(request);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Action::await_change())
        }
    }

    fn machine_kind() -> (Arc<TypeRegistry>, RegisteredKind) {
        let mut builder = TypeRegistry::builder();
        builder.register::<Machine>().unwrap();
        let registry = builder.build();
        let kind = registry.get(&gvk_of::<Machine>()).unwrap().clone();
        (registry, kind)
    }

    fn split_client(registry: Arc<TypeRegistry>) -> SplitClient {
        let store = Arc::new(MockStore::new());
        SplitClient::new(registry, Arc::new(MockCache::new()), store.clone(), store)
    }

    fn machine(kind: &RegisteredKind, name: &str) -> DynamicObject {
        DynamicObject::new(name, kind.resource()).within("default")
    }

    fn synced_writer(kind: &RegisteredKind, objects: &[DynamicObject]) -> Writer<DynamicObject> {
        let mut writer = Writer::new(kind.resource().clone());
        writer.apply_watcher_event(&watcher::Event::Init);
        for object in objects {
            writer.apply_watcher_event(&watcher::Event::InitApply(object.clone()));
        }
        writer.apply_watcher_event(&watcher::Event::InitDone);
        writer
    }

    fn context(
        fail: bool,
        objects: &[&str],
    ) -> (Arc<DispatchContext>, Arc<Flaky>, RegisteredKind, Writer<DynamicObject>) {
        let (registry, kind) = machine_kind();
        let objects: Vec<_> = objects.iter().map(|name| machine(&kind, name)).collect();
        let writer = synced_writer(&kind, &objects);
        let worker = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail,
        });
        let ctx = Arc::new(DispatchContext {
            name: "machine".to_string(),
            worker: worker.clone(),
            client: split_client(registry),
            metrics: ManagerMetrics::new().unwrap(),
            backoff: KeyedBackoff::default(),
            store: writer.as_reader(),
        });
        (ctx, worker, kind, writer)
    }

    #[tokio::test]
    async fn test_dispatch_passes_request_key() {
        let (ctx, worker, kind, _writer) = context(false, &["m-0"]);
        let object = Arc::new(machine(&kind, "m-0"));

        let action = dispatch(object, ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(worker.calls.load(Ordering::SeqCst), 1);
        assert!(ctx.backoff.is_empty());
    }

    #[tokio::test]
    async fn test_failures_back_off_per_object() {
        let (ctx, _, kind, _writer) = context(true, &["m-1"]);
        let object = Arc::new(machine(&kind, "m-1"));

        let err = dispatch(object.clone(), ctx.clone()).await.unwrap_err();
        assert_eq!(err.to_string(), "default/m-1 is broken");

        let delays: Vec<Action> = (0..3)
            .map(|_| error_policy(object.clone(), &err, ctx.clone()))
            .collect();
        assert_eq!(
            delays,
            vec![
                Action::requeue(Duration::from_secs(5)),
                Action::requeue(Duration::from_secs(5)),
                Action::requeue(Duration::from_secs(10)),
            ]
        );
    }

    #[tokio::test]
    async fn test_deleted_objects_leave_the_backoff_table() {
        let (ctx, _, kind, mut writer) = context(true, &["m-2", "m-3"]);
        let kept = Arc::new(machine(&kind, "m-2"));
        let deleted = Arc::new(machine(&kind, "m-3"));
        let err = ReconcileError::new("broken");
        error_policy(kept.clone(), &err, ctx.clone());
        error_policy(deleted.clone(), &err, ctx.clone());
        assert_eq!(ctx.backoff.len(), 2);

        writer.apply_watcher_event(&watcher::Event::Delete(deleted.as_ref().clone()));
        error_policy(kept, &err, ctx.clone());

        assert_eq!(ctx.backoff.len(), 1, "the deleted object's sequence should be dropped");
        assert_eq!(
            error_policy(deleted, &err, ctx.clone()),
            Action::requeue(DEFAULT_MIN_BACKOFF)
        );
        assert_eq!(ctx.backoff.len(), 1, "a deleted object is not tracked again");
    }

    #[tokio::test]
    async fn test_requeue_hint_overrides_backoff() {
        let (ctx, _, kind, _writer) = context(true, &["m-4"]);
        let object = Arc::new(machine(&kind, "m-4"));
        let err = ReconcileError::new("waiting").requeue_after(Duration::from_secs(42));

        assert_eq!(
            error_policy(object, &err, ctx.clone()),
            Action::requeue(Duration::from_secs(42))
        );
        assert!(ctx.backoff.is_empty(), "A hinted requeue must not advance the backoff");
    }

    #[tokio::test]
    async fn test_nameless_object_is_rejected() {
        let (ctx, worker, kind, _writer) = context(false, &[]);
        let mut object = machine(&kind, "x");
        object.metadata.name = None;

        assert!(dispatch(Arc::new(object), ctx).await.is_err());
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_controller_bounds_concurrency_and_resyncs() {
        let (registry, kind) = machine_kind();
        let objects: Vec<_> = (0..6).map(|i| machine(&kind, &format!("m-{i}"))).collect();
        let writer = synced_writer(&kind, &objects);
        // every object is announced twice
        let events: Vec<Result<DynamicObject, watcher::Error>> =
            objects.iter().chain(&objects).cloned().map(Ok).collect();
        let trigger = futures::stream::iter(events).chain(futures::stream::pending());
        let controller = Controller::for_stream_with(trigger, writer.as_reader(), kind.resource().clone());

        let tracker = Arc::new(Tracker::default());
        let binding = ControllerBinding::new(
            "machine".to_string(),
            kind,
            ControllerOptions::concurrency(2),
            tracker.clone(),
        );
        let cancel = CancellationToken::new();
        let cache = Arc::new(InformerCache::new());
        let context = TaskContext {
            client: split_client(registry),
            cache: cache.clone(),
            metrics: ManagerMetrics::new().unwrap(),
            sync_period: Duration::from_millis(300),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(binding.drive(controller, context));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("controller should stop after cancel")
            .unwrap();

        assert_eq!(tracker.peak.load(Ordering::SeqCst), 2, "at most two reconciles at once");
        assert_eq!(
            tracker.overlaps.load(Ordering::SeqCst),
            0,
            "an object must never be reconciled twice at once"
        );
        let calls = tracker.calls.lock().unwrap();
        assert_eq!(calls.len(), 6);
        assert!(
            calls.values().all(|&n| n >= 3),
            "initial pass plus two resyncs should reach every object: {calls:?}"
        );
        assert_eq!(cache.kinds().len(), 1, "the store is published to the cache");
    }
}
