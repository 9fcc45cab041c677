//! Boot mode selection and registration.

use manager_runtime::health::Ping;
use manager_runtime::registry::kind_label;
use manager_runtime::{BootMode, Manager};
use tracing::info;

use crate::config::ConcurrencyBounds;
use crate::error::BootError;
use crate::{reconciler, webhooks};

/// Registers the `ping` liveness and readiness checks.
pub fn setup_checks(manager: &mut Manager) -> Result<(), BootError> {
    manager.add_healthz_check("ping", Ping).map_err(BootError::Check)?;
    manager.add_readyz_check("ping", Ping).map_err(BootError::Check)?;
    Ok(())
}

/// Registers reconcilers or webhooks depending on the boot mode, never both.
pub fn setup_workers(manager: &mut Manager, bounds: &ConcurrencyBounds) -> Result<(), BootError> {
    match manager.mode() {
        BootMode::Reconcile => setup_reconcilers(manager, bounds),
        BootMode::Webhook { .. } => setup_webhooks(manager),
    }
}

fn setup_reconcilers(manager: &mut Manager, bounds: &ConcurrencyBounds) -> Result<(), BootError> {
    for registration in reconciler::registrations(bounds) {
        manager
            .register_reconciler(
                registration.name,
                &registration.gvk,
                registration.worker,
                registration.options,
            )
            .map_err(|source| BootError::Controller {
                name: registration.name,
                source,
            })?;
    }
    info!(controllers = manager.bindings().len(), "Reconcilers registered");
    Ok(())
}

fn setup_webhooks(manager: &mut Manager) -> Result<(), BootError> {
    for handler in webhooks::all() {
        let kind = kind_label(&handler.gvk());
        manager
            .register_webhook(handler)
            .map_err(|source| BootError::Webhook { kind, source })?;
    }
    info!(webhooks = manager.webhook_kinds().len(), "Webhooks registered");
    Ok(())
}
