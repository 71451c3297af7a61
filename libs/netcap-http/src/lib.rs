#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Tower layers reporting outbound HTTP calls made through a service stack
//!
//! Two cooperating layers report each call as one
//! [`NetworkRequestRecord`](netcap::NetworkRequestRecord):
//! - [`ApplicationCaptureLayer`], registered outermost, reports calls that fail
//!   before a response reaches the application and returns the error unchanged
//! - [`NetworkCaptureLayer`], registered next to the transport, reports every
//!   exchange that produced a response
//!
//! Both report under the call id stamped by the application layer, so a call
//! is delivered once even when the response body is captured after the fact.
//!
//! # Transparent Decompression
//!
//! For calls approved by the capture rules, gzip responses are decompressed
//! as they stream and `Content-Encoding`/`Content-Length` are removed, so the
//! captured body is the decoded one. Other responses are left untouched.
//!
//! # Example
//!
//! ```ignore
//! use netcap::NetworkContext;
//! use netcap_http::NetworkCaptureLayers;
//! use tower::ServiceBuilder;
//!
//! let layers = NetworkCaptureLayers::new(NetworkContext::builder().build()?);
//! let service = ServiceBuilder::new()
//!     .layer(layers.application())
//!     .layer(layers.network())
//!     .service(client);
//! ```

mod body;
mod call;
mod error;
mod layers;

pub use body::{BufferedBody, CaptureBody, GzipDecodingBody, ResponseBody};
pub use call::{CallContext, ClientClock, SystemClientClock};
pub use error::PathOverrideError;
pub use layers::{
    ApplicationCaptureLayer, ApplicationCaptureService, NetworkCaptureLayer, NetworkCaptureLayers,
    NetworkCaptureService,
};
