//! Diagnostics endpoint
//!
//! Auxiliary HTTP server started when a profiler address is configured. It
//! runs detached from the manager; callers log its failure and move on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::InformerCache;
use crate::manager::ManagerState;

/// One controller binding as shown by `/debug/manager`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ControllerSummary {
    /// Controller name
    pub name: String,
    /// Watched kind label
    pub kind: String,
    /// Concurrency bound
    pub max_concurrent_reconciles: u16,
}

/// Read-only view of the manager served by the diagnostics endpoint.
#[derive(Debug, Clone)]
pub struct DiagnosticsState {
    state: watch::Receiver<ManagerState>,
    controllers: Vec<ControllerSummary>,
    webhooks: Vec<String>,
    cache: Arc<InformerCache>,
    leading: Arc<AtomicBool>,
}

#[derive(Debug, Serialize)]
struct ManagerReport {
    state: ManagerState,
    leader: bool,
    cache_synced: bool,
    cached_kinds: Vec<String>,
    controllers: Vec<ControllerSummary>,
    webhooks: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RuntimeReport {
    workers: usize,
    alive_tasks: usize,
    global_queue_depth: usize,
}

impl DiagnosticsState {
    pub(crate) fn new(
        state: watch::Receiver<ManagerState>,
        controllers: Vec<ControllerSummary>,
        webhooks: Vec<String>,
        cache: Arc<InformerCache>,
        leading: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            controllers,
            webhooks,
            cache,
            leading,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    /// Registered controllers.
    pub fn controllers(&self) -> &[ControllerSummary] {
        &self.controllers
    }
}

async fn manager_report(State(diag): State<Arc<DiagnosticsState>>) -> Json<ManagerReport> {
    Json(ManagerReport {
        state: diag.state(),
        leader: diag.leading.load(Ordering::SeqCst),
        cache_synced: diag.cache.is_synced(),
        cached_kinds: diag.cache.kinds(),
        controllers: diag.controllers.clone(),
        webhooks: diag.webhooks.clone(),
    })
}

async fn runtime_report() -> Json<RuntimeReport> {
    let metrics = tokio::runtime::Handle::current().metrics();
    Json(RuntimeReport {
        workers: metrics.num_workers(),
        alive_tasks: metrics.num_alive_tasks(),
        global_queue_depth: metrics.global_queue_depth(),
    })
}

/// Routes served by the diagnostics endpoint.
pub fn router(state: DiagnosticsState) -> Router {
    Router::new()
        .route("/debug/manager", get(manager_report))
        .route("/debug/runtime", get(runtime_report))
        .with_state(Arc::new(state))
}

/// Serves diagnostics on `addr` (`host:port`) until `cancel` fires.
pub async fn serve(addr: &str, state: DiagnosticsState, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Diagnostics endpoint listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state(current: ManagerState) -> (watch::Sender<ManagerState>, DiagnosticsState) {
        let (tx, rx) = watch::channel(current);
        let diag = DiagnosticsState::new(
            rx,
            vec![ControllerSummary {
                name: "machine".to_string(),
                kind: "Machine.v1alpha3.cluster.x-k8s.io".to_string(),
                max_concurrent_reconciles: 10,
            }],
            Vec::new(),
            Arc::new(InformerCache::new()),
            Arc::new(AtomicBool::new(true)),
        );
        (tx, diag)
    }

    async fn get_json(router: Router, uri: &str) -> serde_json::Value {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri} should answer 200");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_manager_report_tracks_state() {
        let (tx, diag) = state(ManagerState::Configured);
        let router = router(diag);

        let report = get_json(router.clone(), "/debug/manager").await;
        assert_eq!(report["state"], "Configured");
        assert_eq!(report["leader"], true);
        assert_eq!(report["controllers"][0]["name"], "machine");
        assert_eq!(report["controllers"][0]["max_concurrent_reconciles"], 10);

        tx.send_replace(ManagerState::Running);
        let report = get_json(router, "/debug/manager").await;
        assert_eq!(report["state"], "Running", "report should follow state changes");
    }

    #[tokio::test]
    async fn test_runtime_report() {
        let (_tx, diag) = state(ManagerState::Running);

        let report = get_json(router(diag), "/debug/runtime").await;

        assert!(report["workers"].as_u64().unwrap() >= 1);
        assert!(report.get("alive_tasks").is_some());
    }

    #[tokio::test]
    async fn test_serve_reports_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let (_tx, diag) = state(ManagerState::Running);

        let result = serve(&addr, diag, CancellationToken::new()).await;

        assert!(result.is_err(), "binding a used port should fail");
    }
}
