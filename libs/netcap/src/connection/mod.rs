//! Interception of the platform's blocking HTTP connection primitive.
//!
//! [`HttpConnection`] is the capability surface of a platform connection;
//! [`SecureHttpConnection`] adds the TLS read-through accessors.
//! [`InstrumentedConnection`] wraps either one and reports exactly one
//! [`NetworkRequestRecord`](crate::NetworkRequestRecord) per connection.

mod interception;
mod instrumented;
mod state;

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::ServerCertVerifier;
use rustls_pki_types::CertificateDer;
use url::Url;

use crate::stream::{RequestBody, ResponseStream};

pub use instrumented::InstrumentedConnection;
pub use state::{AccessEvent, ConnectionState, Transition};

/// Response or request headers, name to values in arrival order.
pub type HeaderFields = BTreeMap<String, Vec<String>>;

/// Blocking HTTP connection as provided by the platform.
///
/// Response accessors implicitly send the request if it has not been sent.
pub trait HttpConnection: Send + Sync {
    fn url(&self) -> Url;

    fn request_method(&self) -> http::Method;

    /// Change the request method.
    ///
    /// # Errors
    /// Fails once the request has been sent.
    fn set_request_method(&self, method: http::Method) -> io::Result<()>;

    fn request_property(&self, name: &str) -> Option<String>;

    fn request_properties(&self) -> HeaderFields;

    /// Replace a request header.
    fn set_request_property(&self, name: &str, value: &str);

    /// Append a request header value.
    fn add_request_property(&self, name: &str, value: &str);

    /// Open the connection.
    ///
    /// # Errors
    /// Transport failures (DNS, refused, TLS, ...).
    fn connect(&self) -> io::Result<()>;

    fn disconnect(&self);

    /// Response status code.
    ///
    /// # Errors
    /// Transport failures, or a response that is not valid HTTP.
    fn response_code(&self) -> io::Result<u16>;

    /// Reason phrase of the status line.
    ///
    /// # Errors
    /// Transport failures.
    fn response_message(&self) -> io::Result<Option<String>>;

    /// All response headers.
    ///
    /// # Errors
    /// Transport failures.
    fn header_fields(&self) -> io::Result<HeaderFields>;

    /// Last value of a response header; `None` on failure or absence.
    fn header_field(&self, name: &str) -> Option<String>;

    /// Value of the n-th response header line.
    fn header_field_at(&self, index: usize) -> Option<String>;

    /// Name of the n-th response header line.
    fn header_field_key(&self, index: usize) -> Option<String>;

    /// Declared response length, `None` when unknown.
    ///
    /// # Errors
    /// Transport failures.
    fn content_length(&self) -> io::Result<Option<u64>>;

    fn content_encoding(&self) -> Option<String>;

    fn content_type(&self) -> Option<String>;

    /// Response body.
    ///
    /// # Errors
    /// Transport failures and error statuses.
    fn input_stream(&self) -> io::Result<Box<dyn ResponseStream>>;

    /// Body of an error response, if there is one.
    fn error_stream(&self) -> Option<Box<dyn ResponseStream>>;

    /// Request body stream.
    ///
    /// # Errors
    /// Fails when the method does not allow a body or the transport fails.
    fn output_stream(&self) -> io::Result<RequestBody>;

    fn connect_timeout(&self) -> Option<Duration>;

    fn set_connect_timeout(&self, timeout: Option<Duration>);

    fn read_timeout(&self) -> Option<Duration>;

    fn set_read_timeout(&self, timeout: Option<Duration>);

    fn use_caches(&self) -> bool;

    fn set_use_caches(&self, use_caches: bool);
}

/// HTTPS connection: TLS session details on top of [`HttpConnection`].
pub trait SecureHttpConnection: HttpConnection {
    /// Negotiated cipher suite name.
    fn cipher_suite(&self) -> Option<String>;

    /// Certificates presented by the server.
    ///
    /// # Errors
    /// Fails before the TLS handshake completed.
    fn peer_certificates(&self) -> io::Result<Vec<CertificateDer<'static>>>;

    /// Certificates sent to the server, if client authentication was used.
    fn local_certificates(&self) -> Option<Vec<CertificateDer<'static>>>;

    /// TLS configuration used to open the socket.
    fn tls_config(&self) -> Option<Arc<rustls::ClientConfig>>;

    fn set_tls_config(&self, config: Arc<rustls::ClientConfig>);

    /// Verifier checking the server certificate against the host name.
    fn server_cert_verifier(&self) -> Option<Arc<dyn ServerCertVerifier>>;

    fn set_server_cert_verifier(&self, verifier: Arc<dyn ServerCertVerifier>);
}

impl<T: HttpConnection + ?Sized> HttpConnection for Box<T> {
    fn url(&self) -> Url {
        (**self).url()
    }

    fn request_method(&self) -> http::Method {
        (**self).request_method()
    }

    fn set_request_method(&self, method: http::Method) -> io::Result<()> {
        (**self).set_request_method(method)
    }

    fn request_property(&self, name: &str) -> Option<String> {
        (**self).request_property(name)
    }

    fn request_properties(&self) -> HeaderFields {
        (**self).request_properties()
    }

    fn set_request_property(&self, name: &str, value: &str) {
        (**self).set_request_property(name, value);
    }

    fn add_request_property(&self, name: &str, value: &str) {
        (**self).add_request_property(name, value);
    }

    fn connect(&self) -> io::Result<()> {
        (**self).connect()
    }

    fn disconnect(&self) {
        (**self).disconnect();
    }

    fn response_code(&self) -> io::Result<u16> {
        (**self).response_code()
    }

    fn response_message(&self) -> io::Result<Option<String>> {
        (**self).response_message()
    }

    fn header_fields(&self) -> io::Result<HeaderFields> {
        (**self).header_fields()
    }

    fn header_field(&self, name: &str) -> Option<String> {
        (**self).header_field(name)
    }

    fn header_field_at(&self, index: usize) -> Option<String> {
        (**self).header_field_at(index)
    }

    fn header_field_key(&self, index: usize) -> Option<String> {
        (**self).header_field_key(index)
    }

    fn content_length(&self) -> io::Result<Option<u64>> {
        (**self).content_length()
    }

    fn content_encoding(&self) -> Option<String> {
        (**self).content_encoding()
    }

    fn content_type(&self) -> Option<String> {
        (**self).content_type()
    }

    fn input_stream(&self) -> io::Result<Box<dyn ResponseStream>> {
        (**self).input_stream()
    }

    fn error_stream(&self) -> Option<Box<dyn ResponseStream>> {
        (**self).error_stream()
    }

    fn output_stream(&self) -> io::Result<RequestBody> {
        (**self).output_stream()
    }

    fn connect_timeout(&self) -> Option<Duration> {
        (**self).connect_timeout()
    }

    fn set_connect_timeout(&self, timeout: Option<Duration>) {
        (**self).set_connect_timeout(timeout);
    }

    fn read_timeout(&self) -> Option<Duration> {
        (**self).read_timeout()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) {
        (**self).set_read_timeout(timeout);
    }

    fn use_caches(&self) -> bool {
        (**self).use_caches()
    }

    fn set_use_caches(&self, use_caches: bool) {
        (**self).set_use_caches(use_caches);
    }
}

impl<T: SecureHttpConnection + ?Sized> SecureHttpConnection for Box<T> {
    fn cipher_suite(&self) -> Option<String> {
        (**self).cipher_suite()
    }

    fn peer_certificates(&self) -> io::Result<Vec<CertificateDer<'static>>> {
        (**self).peer_certificates()
    }

    fn local_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        (**self).local_certificates()
    }

    fn tls_config(&self) -> Option<Arc<rustls::ClientConfig>> {
        (**self).tls_config()
    }

    fn set_tls_config(&self, config: Arc<rustls::ClientConfig>) {
        (**self).set_tls_config(config);
    }

    fn server_cert_verifier(&self) -> Option<Arc<dyn ServerCertVerifier>> {
        (**self).server_cert_verifier()
    }

    fn set_server_cert_verifier(&self, verifier: Arc<dyn ServerCertVerifier>) {
        (**self).set_server_cert_verifier(verifier);
    }
}

/// Connection produced by a stream handler.
pub enum UrlConnection {
    Http(Box<dyn HttpConnection>),
    Https(Box<dyn SecureHttpConnection>),
    /// Non-HTTP scheme (file, jar, ...); never instrumented
    Other(Box<dyn std::any::Any + Send + Sync>),
}

impl std::fmt::Debug for UrlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(c) => f.debug_tuple("Http").field(&c.url().as_str()).finish(),
            Self::Https(c) => f.debug_tuple("Https").field(&c.url().as_str()).finish(),
            Self::Other(_) => f.write_str("Other"),
        }
    }
}
