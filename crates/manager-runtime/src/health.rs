//! Liveness and readiness probes.
//!
//! `GET /healthz` and `GET /readyz` run every registered check of that
//! probe and answer 200 when all pass, 500 otherwise. `/healthz/{name}` and
//! `/readyz/{name}` run a single check. Failing responses list each check
//! as `[+]name ok` or `[-]name failed: reason`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use thiserror::Error;

use crate::client::SplitClient;

/// Errors raised when registering checks.
#[derive(Debug, Error)]
pub enum HealthError {
    /// Check names must be unique per probe
    #[error("{probe} check {name} is already registered")]
    Duplicate {
        /// `healthz` or `readyz`
        probe: &'static str,
        /// Check name
        name: String,
    },

    /// Check names become URL segments
    #[error("{probe} check name {name:?} is invalid")]
    InvalidName {
        /// `healthz` or `readyz`
        probe: &'static str,
        /// Check name
        name: String,
    },
}

/// A single named probe check.
#[async_trait]
pub trait Checker: Send + Sync {
    /// `Ok` when healthy, otherwise a short reason.
    async fn check(&self) -> Result<(), String>;
}

/// Always passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ping;

#[async_trait]
impl Checker for Ping {
    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Passes once its flag is raised.
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<AtomicBool>,
    reason: &'static str,
}

impl Gate {
    /// Gate over `open`, failing with `reason` while it is lowered.
    pub fn new(open: Arc<AtomicBool>, reason: &'static str) -> Self {
        Self { open, reason }
    }
}

#[async_trait]
impl Checker for Gate {
    async fn check(&self) -> Result<(), String> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(self.reason.to_string())
        }
    }
}

/// Passes while the API server answers within `timeout`.
#[derive(Debug, Clone)]
pub struct ApiServerCheck {
    client: SplitClient,
    timeout: Duration,
}

impl ApiServerCheck {
    /// Check pinging through `client`.
    pub fn new(client: SplitClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Checker for ApiServerCheck {
    async fn check(&self) -> Result<(), String> {
        match tokio::time::timeout(self.timeout, self.client.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no answer within {:?}", self.timeout)),
        }
    }
}

type NamedChecks = Vec<(String, Arc<dyn Checker>)>;

/// Registered liveness and readiness checks.
#[derive(Default, Clone)]
pub struct HealthChecks {
    healthz: NamedChecks,
    readyz: NamedChecks,
}

impl std::fmt::Debug for HealthChecks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecks")
            .field("healthz", &self.healthz_names())
            .field("readyz", &self.readyz_names())
            .finish()
    }
}

fn add(
    checks: &mut NamedChecks,
    probe: &'static str,
    name: &str,
    checker: Arc<dyn Checker>,
) -> Result<(), HealthError> {
    if name.is_empty() || name.contains('/') {
        return Err(HealthError::InvalidName {
            probe,
            name: name.to_string(),
        });
    }
    if checks.iter().any(|(existing, _)| existing == name) {
        return Err(HealthError::Duplicate {
            probe,
            name: name.to_string(),
        });
    }
    checks.push((name.to_string(), checker));
    Ok(())
}

impl HealthChecks {
    /// Adds a liveness check.
    pub fn add_healthz(&mut self, name: &str, checker: Arc<dyn Checker>) -> Result<(), HealthError> {
        add(&mut self.healthz, "healthz", name, checker)
    }

    /// Adds a readiness check.
    pub fn add_readyz(&mut self, name: &str, checker: Arc<dyn Checker>) -> Result<(), HealthError> {
        add(&mut self.readyz, "readyz", name, checker)
    }

    /// Names of the liveness checks, in registration order.
    pub fn healthz_names(&self) -> Vec<&str> {
        self.healthz.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Names of the readiness checks, in registration order.
    pub fn readyz_names(&self) -> Vec<&str> {
        self.readyz.iter().map(|(n, _)| n.as_str()).collect()
    }
}

async fn evaluate(checks: &[&(String, Arc<dyn Checker>)]) -> Response {
    let mut healthy = true;
    let mut lines = Vec::new();
    for (name, checker) in checks.iter().copied() {
        match checker.check().await {
            Ok(()) => lines.push(format!("[+]{name} ok")),
            Err(reason) => {
                healthy = false;
                lines.push(format!("[-]{name} failed: {reason}"));
            }
        }
    }
    if healthy {
        (StatusCode::OK, "ok").into_response()
    } else {
        lines.push("check failed".to_string());
        (StatusCode::INTERNAL_SERVER_ERROR, lines.join("\n")).into_response()
    }
}

async fn all(checks: &NamedChecks) -> Response {
    let all: Vec<_> = checks.iter().collect();
    evaluate(&all).await
}

async fn single(checks: &NamedChecks, name: &str) -> Response {
    let matching: Vec<_> = checks.iter().filter(|(n, _)| n == name).collect();
    if matching.is_empty() {
        return (StatusCode::NOT_FOUND, format!("no check named {name}")).into_response();
    }
    evaluate(&matching).await
}

async fn healthz(State(checks): State<Arc<HealthChecks>>) -> Response {
    all(&checks.healthz).await
}

async fn healthz_one(State(checks): State<Arc<HealthChecks>>, Path(name): Path<String>) -> Response {
    single(&checks.healthz, &name).await
}

async fn readyz(State(checks): State<Arc<HealthChecks>>) -> Response {
    all(&checks.readyz).await
}

async fn readyz_one(State(checks): State<Arc<HealthChecks>>, Path(name): Path<String>) -> Response {
    single(&checks.readyz, &name).await
}

/// Router serving both probes.
pub fn router(checks: Arc<HealthChecks>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/healthz/{name}", get(healthz_one))
        .route("/readyz", get(readyz))
        .route("/readyz/{name}", get(readyz_one))
        .with_state(checks)
}
