//! Controller manager runtime
//!
//! Shared plumbing for the cluster lifecycle manager:
//!
//! - [`registry`]: the set of kinds the process understands
//! - [`client`]: split client, reads from [`cache`] and writes to the API server
//! - [`manager`]: lifecycle, controller and webhook registration
//! - [`controller`]: reconciler trait and per-kind bindings
//! - [`webhook`]: admission handlers and the TLS server
//! - [`health`], [`metrics`], [`diagnostics`]: HTTP side endpoints
//! - [`leader`]: lease based leader election

pub mod backoff;
pub mod cache;
pub mod client;
pub mod controller;
pub mod diagnostics;
pub mod health;
pub mod leader;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod webhook;

pub use cache::InformerCache;
pub use client::{ClientError, ObjectKey, SplitClient};
pub use controller::{Action, ControllerOptions, ReconcileError, Reconciler, Request};
pub use manager::{BootMode, Manager, ManagerError, ManagerOptions, ManagerState};
pub use registry::{RegisteredKind, TypeRegistry};
pub use webhook::{AdmissionError, AdmissionHandler, TypedWebhook, Webhook};
