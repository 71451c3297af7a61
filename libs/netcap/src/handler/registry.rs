use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use super::{StreamHandler, StreamHandlerFactory};
use crate::error::InstallError;

/// The slot holding the process's stream-handler factory.
///
/// The slot is set-once: [`FactoryRegistry::set`] refuses to overwrite an
/// occupied slot, so replacing a factory takes an explicit `clear` first.
pub trait FactoryRegistry: Send + Sync {
    /// Factory currently installed, if any.
    ///
    /// # Errors
    /// Returns [`InstallError::Introspection`] when the slot cannot be read.
    fn current(&self) -> Result<Option<Arc<dyn StreamHandlerFactory>>, InstallError>;

    /// Empty the slot.
    ///
    /// # Errors
    /// Returns [`InstallError::Introspection`] when the slot cannot be modified.
    fn clear(&self) -> Result<(), InstallError>;

    /// Install `factory` into an empty slot.
    ///
    /// # Errors
    /// Returns [`InstallError::AlreadySet`] when the slot is occupied.
    fn set(&self, factory: Arc<dyn StreamHandlerFactory>) -> Result<(), InstallError>;

    /// Handler the installed factory provides for `protocol`.
    ///
    /// `None` means the platform default handler applies.
    fn handler_for(&self, protocol: &str) -> Option<Arc<dyn StreamHandler>> {
        let factory = self.current().ok().flatten()?;
        match factory.create_stream_handler(protocol) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::debug!(target: "netcap::installer", protocol, error = %e, "factory declined protocol");
                None
            }
        }
    }
}

/// In-memory factory slot.
#[derive(Default)]
pub struct SlotRegistry {
    slot: RwLock<Option<Arc<dyn StreamHandlerFactory>>>,
}

impl SlotRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for SlotRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("occupied", &self.slot.read().is_some())
            .finish()
    }
}

impl FactoryRegistry for SlotRegistry {
    fn current(&self) -> Result<Option<Arc<dyn StreamHandlerFactory>>, InstallError> {
        Ok(self.slot.read().clone())
    }

    fn clear(&self) -> Result<(), InstallError> {
        *self.slot.write() = None;
        Ok(())
    }

    fn set(&self, factory: Arc<dyn StreamHandlerFactory>) -> Result<(), InstallError> {
        let mut slot = self.slot.write();
        if slot.is_some() {
            return Err(InstallError::AlreadySet);
        }
        *slot = Some(factory);
        Ok(())
    }
}

static PROCESS_SLOT: LazyLock<SlotRegistry> = LazyLock::new(SlotRegistry::new);

/// The process-wide factory slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRegistry;

impl FactoryRegistry for ProcessRegistry {
    fn current(&self) -> Result<Option<Arc<dyn StreamHandlerFactory>>, InstallError> {
        PROCESS_SLOT.current()
    }

    fn clear(&self) -> Result<(), InstallError> {
        PROCESS_SLOT.clear()
    }

    fn set(&self, factory: Arc<dyn StreamHandlerFactory>) -> Result<(), InstallError> {
        PROCESS_SLOT.set(factory)
    }
}
