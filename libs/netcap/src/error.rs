use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Boxed error type used at collaborator seams.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Error kind reported when a transport failure has no recognizable cause.
pub const UNKNOWN_ERROR_KIND: &str = "Unknown";

/// Message reported when a transport failure carries no message of its own.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An error occurred during the execution of this network request";

/// Error kind reported when a connection finished without a known response.
pub const UNKNOWN_STATE_KIND: &str = "UnknownState";

/// Message paired with [`UNKNOWN_STATE_KIND`].
pub const UNKNOWN_STATE_MESSAGE: &str = "HTTP response state unknown";

/// Failure raised by a [`DeliverySink`](crate::DeliverySink).
///
/// Sink failures never reach host code; the context logs and drops them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SinkError {
    /// The sink is not accepting records (shut down, full, ...)
    #[error("delivery sink unavailable: {0}")]
    Unavailable(String),

    /// The record could not be handed to the backing pipeline
    #[error("delivery failed: {0}")]
    Delivery(#[source] BoxError),
}

/// Failure while installing the stream-handler factory.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InstallError {
    /// The registry slot already holds a factory and cannot be overwritten
    #[error("a stream handler factory is already installed")]
    AlreadySet,

    /// The registry could not be inspected or modified
    #[error("stream handler registry is not accessible: {0}")]
    Introspection(#[source] BoxError),
}

/// Invalid capture rule configuration.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RuleError {
    /// The URL pattern of a rule does not compile
    #[error("capture rule '{id}' has an invalid url pattern")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },
}

/// Describe a transport failure as an `(error kind, error message)` pair.
///
/// The kind is the name of the `io::ErrorKind` of the first I/O error found
/// in the source chain, or [`UNKNOWN_ERROR_KIND`]. The message is the
/// outermost error's display text, or [`UNKNOWN_ERROR_MESSAGE`] when empty.
#[must_use]
pub fn describe_failure(err: &(dyn StdError + 'static)) -> (String, String) {
    let kind = find_io_error(err).map_or(UNKNOWN_ERROR_KIND, |io| io_kind_name(io.kind()));
    let message = err.to_string();
    let message = if message.trim().is_empty() {
        UNKNOWN_ERROR_MESSAGE.to_owned()
    } else {
        message
    };
    (kind.to_owned(), message)
}

fn find_io_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a io::Error> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            return Some(io);
        }
        current = e.source();
    }
    None
}

/// Stable name for an I/O error kind.
#[must_use]
pub fn io_kind_name(kind: io::ErrorKind) -> &'static str {
    match kind {
        io::ErrorKind::NotFound => "NotFound",
        io::ErrorKind::PermissionDenied => "PermissionDenied",
        io::ErrorKind::ConnectionRefused => "ConnectionRefused",
        io::ErrorKind::ConnectionReset => "ConnectionReset",
        io::ErrorKind::ConnectionAborted => "ConnectionAborted",
        io::ErrorKind::NotConnected => "NotConnected",
        io::ErrorKind::AddrInUse => "AddrInUse",
        io::ErrorKind::AddrNotAvailable => "AddrNotAvailable",
        io::ErrorKind::BrokenPipe => "BrokenPipe",
        io::ErrorKind::AlreadyExists => "AlreadyExists",
        io::ErrorKind::WouldBlock => "WouldBlock",
        io::ErrorKind::InvalidInput => "InvalidInput",
        io::ErrorKind::InvalidData => "InvalidData",
        io::ErrorKind::TimedOut => "TimedOut",
        io::ErrorKind::WriteZero => "WriteZero",
        io::ErrorKind::Interrupted => "Interrupted",
        io::ErrorKind::Unsupported => "Unsupported",
        io::ErrorKind::UnexpectedEof => "UnexpectedEof",
        io::ErrorKind::OutOfMemory => "OutOfMemory",
        _ => "Other",
    }
}
