//! Prometheus metrics for the manager and its controllers.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use tracing::warn;

const NAMESPACE: &str = "capi_manager";

/// Manager metric set, cheap to clone.
#[derive(Clone, Debug)]
pub struct ManagerMetrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_errors: IntCounterVec,
    reconcile_time: HistogramVec,
    active_workers: IntGaugeVec,
    max_concurrent: IntGaugeVec,
    leader: IntGauge,
}

impl ManagerMetrics {
    /// Creates and registers every metric on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("reconcile_total", "Total number of reconciliations per controller")
                .namespace(NAMESPACE),
            &["controller", "result"],
        )?;
        let reconcile_errors = IntCounterVec::new(
            Opts::new("reconcile_errors_total", "Total number of reconciliation errors per controller")
                .namespace(NAMESPACE),
            &["controller"],
        )?;
        let reconcile_time = HistogramVec::new(
            HistogramOpts::new("reconcile_time_seconds", "Length of time per reconciliation per controller")
                .namespace(NAMESPACE)
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["controller"],
        )?;
        let active_workers = IntGaugeVec::new(
            Opts::new("active_workers", "Number of currently running reconciles per controller")
                .namespace(NAMESPACE),
            &["controller"],
        )?;
        let max_concurrent = IntGaugeVec::new(
            Opts::new("max_concurrent_reconciles", "Maximum number of concurrent reconciles per controller")
                .namespace(NAMESPACE),
            &["controller"],
        )?;
        let leader = IntGauge::with_opts(
            Opts::new("leader_status", "Whether this replica holds the leader lease").namespace(NAMESPACE),
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;
        registry.register(Box::new(reconcile_time.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(max_concurrent.clone()))?;
        registry.register(Box::new(leader.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_errors,
            reconcile_time,
            active_workers,
            max_concurrent,
            leader,
        })
    }

    /// Underlying registry, for callers that add their own collectors.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Records a controller's concurrency bound.
    pub fn set_max_concurrent(&self, controller: &str, bound: u16) {
        self.max_concurrent
            .with_label_values(&[controller])
            .set(i64::from(bound));
    }

    /// Marks one worker busy until the guard drops.
    pub fn track_active(&self, controller: &str) -> ActiveGuard {
        let gauge = self.active_workers.with_label_values(&[controller]);
        gauge.inc();
        ActiveGuard(gauge)
    }

    /// Starts timing a reconcile.
    pub fn start_timer(&self, controller: &str) -> HistogramTimer {
        self.reconcile_time
            .with_label_values(&[controller])
            .start_timer()
    }

    /// Counts a finished reconcile.
    pub fn record_success(&self, controller: &str) {
        self.reconcile_total
            .with_label_values(&[controller, "success"])
            .inc();
    }

    /// Counts a failed reconcile.
    pub fn record_error(&self, controller: &str) {
        self.reconcile_total
            .with_label_values(&[controller, "error"])
            .inc();
        self.reconcile_errors.with_label_values(&[controller]).inc();
    }

    /// Publishes leadership.
    pub fn set_leader(&self, leading: bool) {
        self.leader.set(i64::from(leading));
    }

    /// Renders every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    #[cfg(test)]
    fn active(&self, controller: &str) -> i64 {
        self.active_workers.with_label_values(&[controller]).get()
    }
}

/// Decrements the active worker gauge on drop.
#[derive(Debug)]
pub struct ActiveGuard(IntGauge);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Router serving `GET /metrics`.
pub fn router(metrics: ManagerMetrics) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(metrics)
}

async fn serve_metrics(State(metrics): State<ManagerMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_active_guard_tracks_workers() {
        let metrics = ManagerMetrics::new().unwrap();

        let first = metrics.track_active("machine");
        let second = metrics.track_active("machine");
        assert_eq!(metrics.active("machine"), 2);

        drop(first);
        drop(second);
        assert_eq!(metrics.active("machine"), 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_counters() {
        let metrics = ManagerMetrics::new().unwrap();
        metrics.record_success("cluster");
        metrics.record_error("cluster");
        metrics.set_max_concurrent("cluster", 10);

        let response = router(metrics)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#"capi_manager_reconcile_total{controller="cluster",result="success"} 1"#));
        assert!(text.contains(r#"capi_manager_reconcile_errors_total{controller="cluster"} 1"#));
        assert!(text.contains(r#"capi_manager_max_concurrent_reconciles{controller="cluster"} 10"#));
    }
}
