//! Admission webhook server
//!
//! Serves defaulting (mutating) and validating admission reviews over HTTPS
//! for every registered kind. Paths follow the usual convention:
//! `/mutate-<group>-<version>-<kind>` and `/validate-<group>-<version>-<kind>`,
//! with dots in the group replaced by dashes and the kind lowercased.
//!
//! The serving certificate is read from `tls.crt` and `tls.key` in the
//! configured certificate directory.

mod typed;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::kind_label;

pub use typed::{TypedWebhook, Webhook};

/// Reason an admission request is refused.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The object breaks a rule
    #[error("{0}")]
    Denied(String),

    /// The object does not decode into its registered type
    #[error("failed to decode {kind}: {source}")]
    Decode {
        /// Kind label
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

impl AdmissionError {
    /// Denial with a message.
    pub fn denied(message: impl Into<String>) -> Self {
        Self::Denied(message.into())
    }
}

/// Errors from the webhook server.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// A handler for the kind is already registered
    #[error("webhook for {0} is already registered")]
    Duplicate(String),

    /// Serving certificate could not be loaded
    #[error("failed to load serving certificate from {dir}: {source}")]
    Tls {
        /// Certificate directory
        dir: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The HTTPS listener failed
    #[error("webhook server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Admission logic for one kind, working on dynamic objects.
pub trait AdmissionHandler: Send + Sync + 'static {
    /// Kind this handler admits.
    fn gvk(&self) -> GroupVersionKind;

    /// JSON patch that applies defaults to `object`; empty when nothing changes.
    fn default(&self, object: &DynamicObject) -> Result<json_patch::Patch, AdmissionError>;

    /// Accepts or refuses a change.
    fn validate(
        &self,
        operation: &Operation,
        old: Option<&DynamicObject>,
        new: Option<&DynamicObject>,
    ) -> Result<(), AdmissionError>;
}

fn path_suffix(gvk: &GroupVersionKind) -> String {
    format!(
        "{}-{}-{}",
        gvk.group.replace('.', "-"),
        gvk.version,
        gvk.kind.to_lowercase()
    )
}

/// Path of the defaulting endpoint for a kind.
pub fn mutate_path(gvk: &GroupVersionKind) -> String {
    format!("/mutate-{}", path_suffix(gvk))
}

/// Path of the validating endpoint for a kind.
pub fn validate_path(gvk: &GroupVersionKind) -> String {
    format!("/validate-{}", path_suffix(gvk))
}

fn review_defaulting(
    handler: &dyn AdmissionHandler,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };
    let response = AdmissionResponse::from(&request);
    let Some(object) = request.object.as_ref() else {
        return response.into_review();
    };

    let response = match handler.default(object) {
        Ok(patch) if patch.0.is_empty() => response,
        Ok(patch) => {
            debug!(uid = %request.uid, operations = patch.0.len(), "Applying defaults");
            match response.with_patch(patch) {
                Ok(patched) => patched,
                Err(e) => AdmissionResponse::from(&request).deny(format!("patch serialization error: {e}")),
            }
        }
        Err(e) => {
            warn!(uid = %request.uid, error = %e, "Defaulting failed");
            response.deny(e.to_string())
        }
    };
    response.into_review()
}

fn review_validation(
    handler: &dyn AdmissionHandler,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };
    let response = AdmissionResponse::from(&request);
    match handler.validate(
        &request.operation,
        request.old_object.as_ref(),
        request.object.as_ref(),
    ) {
        Ok(()) => response.into_review(),
        Err(e) => {
            debug!(uid = %request.uid, reason = %e, "Admission denied");
            response.deny(e.to_string()).into_review()
        }
    }
}

/// HTTPS server for every registered admission handler.
pub struct WebhookServer {
    port: NonZeroU16,
    cert_dir: PathBuf,
    handlers: BTreeMap<String, Arc<dyn AdmissionHandler>>,
}

impl std::fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookServer")
            .field("port", &self.port)
            .field("cert_dir", &self.cert_dir)
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WebhookServer {
    /// Server listening on `port` with certificates from `cert_dir`.
    pub fn new(port: NonZeroU16, cert_dir: PathBuf) -> Self {
        Self {
            port,
            cert_dir,
            handlers: BTreeMap::new(),
        }
    }

    /// Adds a handler; one per kind.
    pub fn register(&mut self, handler: Arc<dyn AdmissionHandler>) -> Result<(), WebhookError> {
        let label = kind_label(&handler.gvk());
        if self.handlers.contains_key(&label) {
            return Err(WebhookError::Duplicate(label));
        }
        debug!(kind = %label, "Registered webhook");
        self.handlers.insert(label, handler);
        Ok(())
    }

    /// Kinds with a registered handler, ordered by label.
    pub fn kinds(&self) -> Vec<GroupVersionKind> {
        self.handlers.values().map(|h| h.gvk()).collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Router with a defaulting and a validating route per kind.
    pub fn router(&self) -> Router {
        let mut router = Router::new();
        for handler in self.handlers.values() {
            let gvk = handler.gvk();
            let defaulting = handler.clone();
            let validating = handler.clone();
            router = router
                .route(
                    &mutate_path(&gvk),
                    post(move |Json(review): Json<AdmissionReview<DynamicObject>>| {
                        let handler = defaulting.clone();
                        async move { Json(review_defaulting(handler.as_ref(), review)) }
                    }),
                )
                .route(
                    &validate_path(&gvk),
                    post(move |Json(review): Json<AdmissionReview<DynamicObject>>| {
                        let handler = validating.clone();
                        async move { Json(review_validation(handler.as_ref(), review)) }
                    }),
                );
        }
        router
    }

    /// Serves until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), WebhookError> {
        let cert = self.cert_dir.join("tls.crt");
        let key = self.cert_dir.join("tls.key");
        let tls = RustlsConfig::from_pem_file(&cert, &key)
            .await
            .map_err(|source| WebhookError::Tls {
                dir: self.cert_dir.clone(),
                source,
            })?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port.get()));
        let app = self.router();
        let handle = axum_server::Handle::new();
        let shutdown = handle.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        info!(addr = %addr, kinds = self.handlers.len(), "Starting webhook server");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .map_err(WebhookError::Serve)
    }
}
