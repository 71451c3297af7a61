use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use url::Url;

use super::{Proxy, StreamHandler, StreamHandlerFactory};
use crate::connection::{InstrumentedConnection, UrlConnection};
use crate::context::NetworkContext;
use crate::error::BoxError;

/// Handler that instruments every HTTP(S) connection its inner handler opens.
pub struct InterceptingHandler {
    inner: Arc<dyn StreamHandler>,
    ctx: NetworkContext,
}

impl InterceptingHandler {
    #[must_use]
    pub fn new(inner: Arc<dyn StreamHandler>, ctx: NetworkContext) -> Self {
        Self { inner, ctx }
    }
}

impl fmt::Debug for InterceptingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptingHandler").finish_non_exhaustive()
    }
}

impl StreamHandler for InterceptingHandler {
    fn open_connection(&self, url: &Url, proxy: Option<Proxy>) -> io::Result<UrlConnection> {
        let connection = match self.inner.open_connection(url, proxy)? {
            UrlConnection::Http(conn) => UrlConnection::Http(Box::new(InstrumentedConnection::new(conn, &self.ctx))),
            UrlConnection::Https(conn) => {
                UrlConnection::Https(Box::new(InstrumentedConnection::new(conn, &self.ctx)))
            }
            other @ UrlConnection::Other(_) => other,
        };
        Ok(connection)
    }
}

/// Factory handing out [`InterceptingHandler`]s over the platform's own handlers.
#[derive(Clone)]
pub struct InterceptionFactory {
    ctx: NetworkContext,
    base: BTreeMap<String, Arc<dyn StreamHandler>>,
}

impl InterceptionFactory {
    #[must_use]
    pub fn new(ctx: NetworkContext) -> Self {
        Self {
            ctx,
            base: BTreeMap::new(),
        }
    }

    /// Register the platform handler used for `protocol` (`http`, `https`).
    #[must_use]
    pub fn with_handler(mut self, protocol: &str, handler: Arc<dyn StreamHandler>) -> Self {
        self.base.insert(protocol.to_ascii_lowercase(), handler);
        self
    }

    #[must_use]
    pub fn context(&self) -> &NetworkContext {
        &self.ctx
    }

    fn intercepting(&self, handler: Arc<dyn StreamHandler>) -> Arc<dyn StreamHandler> {
        Arc::new(InterceptingHandler::new(handler, self.ctx.clone()))
    }
}

impl fmt::Debug for InterceptionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionFactory")
            .field("protocols", &self.base.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl StreamHandlerFactory for InterceptionFactory {
    fn create_stream_handler(&self, protocol: &str) -> Result<Option<Arc<dyn StreamHandler>>, BoxError> {
        Ok(self
            .base
            .get(&protocol.to_ascii_lowercase())
            .map(|handler| self.intercepting(Arc::clone(handler))))
    }
}

/// Factory composing a pre-existing factory with interception.
///
/// The original factory is asked first and its handler is wrapped. When it
/// fails or declines, the interception factory's own handler is used.
pub struct WrappingFactory {
    original: Arc<dyn StreamHandlerFactory>,
    interception: InterceptionFactory,
}

impl WrappingFactory {
    #[must_use]
    pub fn new(original: Arc<dyn StreamHandlerFactory>, interception: InterceptionFactory) -> Self {
        Self { original, interception }
    }
}

impl fmt::Debug for WrappingFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappingFactory")
            .field("interception", &self.interception)
            .finish_non_exhaustive()
    }
}

impl StreamHandlerFactory for WrappingFactory {
    fn create_stream_handler(&self, protocol: &str) -> Result<Option<Arc<dyn StreamHandler>>, BoxError> {
        match self.original.create_stream_handler(protocol) {
            Ok(Some(handler)) => Ok(Some(self.interception.intercepting(handler))),
            Ok(None) => self.interception.create_stream_handler(protocol),
            Err(e) => {
                tracing::warn!(
                    target: "netcap::installer",
                    protocol,
                    error = %e,
                    "existing stream handler factory failed, using own handler"
                );
                self.interception.create_stream_handler(protocol)
            }
        }
    }
}
