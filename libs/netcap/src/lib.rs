#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Transparent outbound HTTP(S) request telemetry
//!
//! Wraps the platform's blocking HTTP connection primitive so that every
//! request the host application makes is reported as one
//! [`NetworkRequestRecord`]: URL, method, timing, byte counts, status or
//! failure, and optionally captured headers and bodies.
//!
//! - [`InstrumentedConnection`] wraps an [`HttpConnection`] or
//!   [`SecureHttpConnection`] and behaves exactly like it
//! - [`install_stream_handler_factory`] routes every connection the process
//!   opens through the wrapper, composing with any factory already installed
//! - [`CountingReader`] / [`CountingWriter`] count body bytes without
//!   changing what the host reads or writes
//! - [`path_override::resolve`] applies the `x-emb-path` header to reported URLs
//!
//! Telemetry never changes host-visible behavior: failures inside this crate
//! are logged under the `netcap::*` tracing targets and dropped.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use netcap::{InMemorySink, InterceptionFactory, NetworkContext, ProcessRegistry};
//!
//! let sink = Arc::new(InMemorySink::new());
//! let ctx = NetworkContext::builder().sink(sink.clone()).build()?;
//! let factory = InterceptionFactory::new(ctx)
//!     .with_handler("http", platform_http_handler)
//!     .with_handler("https", platform_https_handler);
//! let outcome = netcap::install_stream_handler_factory(&ProcessRegistry, factory);
//! assert!(outcome.is_installed());
//! ```

mod capture;
mod clock;
mod config;
mod connection;
mod context;
mod error;
mod handler;
pub mod path_override;
mod record;
mod rules;
mod sink;
mod stream;
pub mod trace;

pub use capture::{
    CaptureAssembler, CapturePart, CapturedHeaders, InvalidHeaderText, NetworkCaptureData, flatten_header_lists,
    flatten_header_map, partial_capture_message,
};
pub use clock::{NormalizedClock, SdkClock, system_millis};
pub use config::{DEFAULT_MAX_CAPTURED_BODY_BYTES, DEFAULT_TRACE_ID_HEADER, NetworkCaptureConfig};
pub use connection::{
    AccessEvent, ConnectionState, HeaderFields, HttpConnection, InstrumentedConnection, SecureHttpConnection,
    Transition, UrlConnection,
};
pub use context::{NetworkContext, NetworkContextBuilder};
pub use error::{
    BoxError, InstallError, RuleError, SinkError, UNKNOWN_ERROR_KIND, UNKNOWN_ERROR_MESSAGE, UNKNOWN_STATE_KIND,
    UNKNOWN_STATE_MESSAGE, describe_failure, io_kind_name,
};
pub use handler::{
    FactoryRegistry, InstallOutcome, InterceptingHandler, InterceptionFactory, ProcessRegistry, Proxy, SlotRegistry,
    StreamHandler, StreamHandlerFactory, WrappingFactory, install_stream_handler_factory,
};
pub use record::{HttpMethod, NetworkRequestRecord, RequestOutcome, RequestSummary, UnsupportedMethod};
pub use rules::{CaptureRule, CaptureRuleSet, CaptureRules, NETWORK_ERROR_STATUS, NoCapture};
pub use sink::{DeliverySink, InMemorySink};
pub use stream::{
    CompletionCallback, CountingReader, CountingWriter, MarkableReader, RequestBody, RequestStream, ResponseStream,
    StreamCompletion, WriteTally,
};
pub use trace::{RandomTraceparent, TRACEPARENT_HEADER, TraceparentSource};
