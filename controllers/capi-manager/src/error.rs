//! Boot errors.
//!
//! Every variant names the stage that failed so `main` can log one line
//! saying where startup stopped.

use manager_runtime::registry::RegistryError;
use manager_runtime::ManagerError;
use thiserror::Error;

use crate::config::ConfigError;

/// Fatal errors raised while starting or running the manager.
#[derive(Debug, Error)]
pub enum BootError {
    /// Flags did not resolve into settings
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A kind failed to register
    #[error("failed to build the type registry: {0}")]
    Scheme(#[from] RegistryError),

    /// No kubeconfig or in-cluster config
    #[error("failed to load Kubernetes config: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),

    /// Manager construction failed
    #[error("unable to create manager: {0}")]
    Manager(#[source] ManagerError),

    /// Probe check registration failed
    #[error("unable to set up health checks: {0}")]
    Check(#[source] ManagerError),

    /// Reconciler registration failed
    #[error("unable to create controller {name}: {source}")]
    Controller {
        /// Controller name
        name: &'static str,
        /// Underlying error
        #[source]
        source: ManagerError,
    },

    /// Webhook registration failed
    #[error("unable to create webhook for {kind}: {source}")]
    Webhook {
        /// Kind label
        kind: String,
        /// Underlying error
        #[source]
        source: ManagerError,
    },

    /// The run loop ended with an error
    #[error("problem running manager: {0}")]
    Run(#[source] ManagerError),
}

impl BootError {
    /// Short name of the failed stage, used as a log field.
    pub fn stage(&self) -> &'static str {
        match self {
            BootError::Config(_) => "configuration",
            BootError::Scheme(_) => "scheme",
            BootError::KubeConfig(_) => "kubeconfig",
            BootError::Manager(_) => "manager",
            BootError::Check(_) => "health-checks",
            BootError::Controller { .. } => "controller",
            BootError::Webhook { .. } => "webhook",
            BootError::Run(_) => "run",
        }
    }
}
