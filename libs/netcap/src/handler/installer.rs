use std::sync::Arc;

use super::factory::{InterceptionFactory, WrappingFactory};
use super::registry::FactoryRegistry;
use crate::error::InstallError;

/// How [`install_stream_handler_factory`] ended up installing interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The slot was empty and now holds the interception factory.
    Installed,
    /// A pre-existing factory was composed with interception.
    Wrapped,
    /// Inspecting or wrapping failed; the interception factory was installed directly.
    InstalledAfterFallback,
    /// Nothing could be installed. HTTP traffic is not observed.
    Failed,
}

impl InstallOutcome {
    #[must_use]
    pub fn is_installed(self) -> bool {
        self != Self::Failed
    }
}

/// Install `factory` into `registry`, composing with any factory already there.
///
/// Never fails loudly: every failure is logged and reflected in the outcome.
#[must_use]
pub fn install_stream_handler_factory(registry: &dyn FactoryRegistry, factory: InterceptionFactory) -> InstallOutcome {
    match registry.current() {
        Ok(None) => match registry.set(Arc::new(factory)) {
            Ok(()) => {
                tracing::info!(target: "netcap::installer", "stream handler factory installed");
                InstallOutcome::Installed
            }
            Err(e) => install_failed(&e),
        },
        Ok(Some(existing)) => {
            let wrapping = Arc::new(WrappingFactory::new(existing, factory.clone()));
            match registry.clear().and_then(|()| registry.set(wrapping)) {
                Ok(()) => {
                    tracing::info!(target: "netcap::installer", "existing stream handler factory wrapped");
                    InstallOutcome::Wrapped
                }
                Err(e) => {
                    tracing::warn!(target: "netcap::installer", error = %e, "could not wrap existing factory");
                    install_directly(registry, factory)
                }
            }
        }
        Err(e) => {
            tracing::warn!(target: "netcap::installer", error = %e, "could not inspect stream handler registry");
            install_directly(registry, factory)
        }
    }
}

fn install_directly(registry: &dyn FactoryRegistry, factory: InterceptionFactory) -> InstallOutcome {
    match registry.set(Arc::new(factory)) {
        Ok(()) => {
            tracing::info!(target: "netcap::installer", "stream handler factory installed after fallback");
            InstallOutcome::InstalledAfterFallback
        }
        Err(e) => install_failed(&e),
    }
}

fn install_failed(err: &InstallError) -> InstallOutcome {
    tracing::warn!(
        target: "netcap::installer",
        error = %err,
        "stream handler factory not installed, network requests will not be captured"
    );
    InstallOutcome::Failed
}
