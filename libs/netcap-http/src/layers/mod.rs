//! Tower layers observing calls at the application and network levels.

mod application;
mod network;

use std::sync::Arc;

use netcap::NetworkContext;

use crate::call::{ClientClock, SystemClientClock};

pub use application::{ApplicationCaptureLayer, ApplicationCaptureService};
pub use network::{NetworkCaptureLayer, NetworkCaptureService};

/// The two cooperating capture layers of one client stack.
///
/// Register [`application`](Self::application) outermost and
/// [`network`](Self::network) innermost, next to the transport:
///
/// ```ignore
/// let layers = NetworkCaptureLayers::new(ctx);
/// let service = ServiceBuilder::new()
///     .layer(layers.application())
///     .layer(RetryLayer::new(policy))
///     .layer(layers.network())
///     .service(client);
/// ```
#[derive(Clone)]
pub struct NetworkCaptureLayers {
    ctx: NetworkContext,
    client_clock: Arc<dyn ClientClock>,
}

impl NetworkCaptureLayers {
    #[must_use]
    pub fn new(ctx: NetworkContext) -> Self {
        Self {
            ctx,
            client_clock: Arc::new(SystemClientClock),
        }
    }

    /// Use the clock the wrapped client stamps its own timestamps with.
    #[must_use]
    pub fn with_client_clock(mut self, clock: Arc<dyn ClientClock>) -> Self {
        self.client_clock = clock;
        self
    }

    #[must_use]
    pub fn application(&self) -> ApplicationCaptureLayer {
        ApplicationCaptureLayer::new(self.ctx.clone())
    }

    #[must_use]
    pub fn network(&self) -> NetworkCaptureLayer {
        NetworkCaptureLayer::new(self.ctx.clone()).with_client_clock(Arc::clone(&self.client_clock))
    }
}

impl std::fmt::Debug for NetworkCaptureLayers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCaptureLayers")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Text value of a request header, if present and visible ASCII.
fn header_text(headers: &http::HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
}
