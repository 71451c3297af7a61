//! Stream-handler factory plumbing: the process-wide slot that decides which
//! handler opens connections for a URL scheme, and the factories that route
//! HTTP(S) connections through [`InstrumentedConnection`](crate::InstrumentedConnection).

mod factory;
mod installer;
mod registry;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use url::Url;

use crate::connection::UrlConnection;
use crate::error::BoxError;

pub use factory::{InterceptingHandler, InterceptionFactory, WrappingFactory};
pub use installer::{InstallOutcome, install_stream_handler_factory};
pub use registry::{FactoryRegistry, ProcessRegistry, SlotRegistry};

/// Proxy to open a connection through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proxy {
    Direct,
    Http(SocketAddr),
    Socks(SocketAddr),
}

/// Opens connections for one URL scheme.
pub trait StreamHandler: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// # Errors
    /// Whatever the underlying transport reports.
    fn open_connection(&self, url: &Url, proxy: Option<Proxy>) -> io::Result<UrlConnection>;
}

/// Produces stream handlers per scheme.
pub trait StreamHandlerFactory: Send + Sync {
    /// Handler for `protocol`, or `None` to let the platform use its default.
    ///
    /// # Errors
    /// Factory-specific failures; callers treat them like `None`.
    fn create_stream_handler(&self, protocol: &str) -> Result<Option<Arc<dyn StreamHandler>>, BoxError>;
}
