use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::ServerCertVerifier;
use rustls_pki_types::CertificateDer;
use url::Url;

use super::interception::{InterceptionCore, is_compression_header, strip_compression_headers};
use super::state::{AccessEvent, ConnectionState};
use super::{HeaderFields, HttpConnection, SecureHttpConnection};
use crate::context::NetworkContext;
use crate::stream::{RequestBody, ResponseStream};

/// Platform connection wrapped for telemetry.
///
/// Behaves exactly like the wrapped connection. Every response accessor is
/// also an [`AccessEvent`]; the first event that can finalize builds and
/// reports the request record, and later ones only delegate.
///
/// When request-size capture is on and the caller did not choose an
/// encoding, `Accept-Encoding: gzip` is requested and the response is
/// decompressed here, with `Content-Encoding`/`Content-Length` hidden.
pub struct InstrumentedConnection<C: HttpConnection + 'static> {
    core: Arc<InterceptionCore<C>>,
}

impl<C: HttpConnection + 'static> InstrumentedConnection<C> {
    #[must_use]
    pub fn new(conn: C, ctx: &NetworkContext) -> Self {
        Self {
            core: Arc::new(InterceptionCore::new(conn, ctx)),
        }
    }

    /// The wrapped connection.
    #[must_use]
    pub fn get_ref(&self) -> &C {
        self.core.conn()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Run a response accessor: prepare, delegate, then signal the access.
    fn observe<T>(&self, access: impl FnOnce(&C) -> io::Result<T>) -> io::Result<T> {
        self.core.prepare_request();
        let result = access(self.core.conn());
        if let Err(e) = &result {
            self.core.note_access_error(e);
        }
        self.core.on_access_event(AccessEvent::ResponseMetadata);
        result
    }

    fn observe_infallible<T>(&self, access: impl FnOnce(&C) -> T) -> T {
        self.core.prepare_request();
        let value = access(self.core.conn());
        self.core.on_access_event(AccessEvent::ResponseMetadata);
        value
    }

    /// Translate a host-visible header index into the wrapped connection's index.
    fn visible_index(&self, index: usize) -> Option<usize> {
        if !self.core.transparent_gzip() {
            return Some(index);
        }
        let conn = self.core.conn();
        let mut visible = 0;
        for actual in 0.. {
            let key = conn.header_field_key(actual);
            if key.is_none() && conn.header_field_at(actual).is_none() {
                return None;
            }
            if key.as_deref().is_some_and(is_compression_header) {
                continue;
            }
            if visible == index {
                return Some(actual);
            }
            visible += 1;
        }
        None
    }
}

impl<C: HttpConnection + 'static> std::fmt::Debug for InstrumentedConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedConnection")
            .field("url", &self.core.conn().url().as_str())
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

impl<C: HttpConnection + 'static> HttpConnection for InstrumentedConnection<C> {
    fn url(&self) -> Url {
        self.core.conn().url()
    }

    fn request_method(&self) -> http::Method {
        self.core.conn().request_method()
    }

    fn set_request_method(&self, method: http::Method) -> io::Result<()> {
        self.core.conn().set_request_method(method)
    }

    fn request_property(&self, name: &str) -> Option<String> {
        self.core.conn().request_property(name)
    }

    fn request_properties(&self) -> HeaderFields {
        self.core.conn().request_properties()
    }

    fn set_request_property(&self, name: &str, value: &str) {
        self.core.conn().set_request_property(name, value);
    }

    fn add_request_property(&self, name: &str, value: &str) {
        self.core.conn().add_request_property(name, value);
    }

    fn connect(&self) -> io::Result<()> {
        self.core.prepare_request();
        self.core.on_access_event(AccessEvent::Connect);
        let result = self.core.conn().connect();
        if let Err(e) = &result {
            self.core.note_access_error(e);
        }
        result
    }

    fn disconnect(&self) {
        self.core.on_access_event(AccessEvent::Disconnect);
        self.core.conn().disconnect();
    }

    fn response_code(&self) -> io::Result<u16> {
        self.observe(HttpConnection::response_code)
    }

    fn response_message(&self) -> io::Result<Option<String>> {
        self.observe(HttpConnection::response_message)
    }

    fn header_fields(&self) -> io::Result<HeaderFields> {
        let headers = self.observe(HttpConnection::header_fields)?;
        if self.core.transparent_gzip() {
            Ok(strip_compression_headers(headers))
        } else {
            Ok(headers)
        }
    }

    fn header_field(&self, name: &str) -> Option<String> {
        let value = self.observe_infallible(|c| c.header_field(name));
        if is_compression_header(name) && self.core.transparent_gzip() {
            return None;
        }
        value
    }

    fn header_field_at(&self, index: usize) -> Option<String> {
        self.observe_infallible(|_| ());
        self.visible_index(index)
            .and_then(|actual| self.core.conn().header_field_at(actual))
    }

    fn header_field_key(&self, index: usize) -> Option<String> {
        self.observe_infallible(|_| ());
        self.visible_index(index)
            .and_then(|actual| self.core.conn().header_field_key(actual))
    }

    fn content_length(&self) -> io::Result<Option<u64>> {
        let length = self.observe(HttpConnection::content_length)?;
        if self.core.transparent_gzip() {
            Ok(None)
        } else {
            Ok(length)
        }
    }

    fn content_encoding(&self) -> Option<String> {
        let encoding = self.observe_infallible(HttpConnection::content_encoding);
        if self.core.transparent_gzip() {
            None
        } else {
            encoding
        }
    }

    fn content_type(&self) -> Option<String> {
        self.observe_infallible(HttpConnection::content_type)
    }

    fn input_stream(&self) -> io::Result<Box<dyn ResponseStream>> {
        self.core.prepare_request();
        let result = match self.core.conn().input_stream() {
            Ok(stream) => Ok(InterceptionCore::wrap_response(&self.core, stream)),
            Err(e) => {
                self.core.note_stream_error(&e);
                Err(e)
            }
        };
        self.core.on_access_event(AccessEvent::ResponseStream);
        result
    }

    fn error_stream(&self) -> Option<Box<dyn ResponseStream>> {
        self.core.prepare_request();
        let stream = self
            .core
            .conn()
            .error_stream()
            .map(|s| InterceptionCore::wrap_response(&self.core, s));
        self.core.on_access_event(AccessEvent::ResponseStream);
        stream
    }

    fn output_stream(&self) -> io::Result<RequestBody> {
        self.core.prepare_request();
        self.core.on_access_event(AccessEvent::RequestStream);
        self.core.request_body()
    }

    fn connect_timeout(&self) -> Option<Duration> {
        self.core.conn().connect_timeout()
    }

    fn set_connect_timeout(&self, timeout: Option<Duration>) {
        self.core.conn().set_connect_timeout(timeout);
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.core.conn().read_timeout()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.core.conn().set_read_timeout(timeout);
    }

    fn use_caches(&self) -> bool {
        self.core.conn().use_caches()
    }

    fn set_use_caches(&self, use_caches: bool) {
        self.core.conn().set_use_caches(use_caches);
    }
}

impl<C: SecureHttpConnection + 'static> SecureHttpConnection for InstrumentedConnection<C> {
    fn cipher_suite(&self) -> Option<String> {
        self.core.conn().cipher_suite()
    }

    fn peer_certificates(&self) -> io::Result<Vec<CertificateDer<'static>>> {
        self.core.conn().peer_certificates()
    }

    fn local_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.core.conn().local_certificates()
    }

    fn tls_config(&self) -> Option<Arc<rustls::ClientConfig>> {
        self.core.conn().tls_config()
    }

    fn set_tls_config(&self, config: Arc<rustls::ClientConfig>) {
        self.core.conn().set_tls_config(config);
    }

    fn server_cert_verifier(&self) -> Option<Arc<dyn ServerCertVerifier>> {
        self.core.conn().server_cert_verifier()
    }

    fn set_server_cert_verifier(&self, verifier: Arc<dyn ServerCertVerifier>) {
        self.core.conn().set_server_cert_verifier(verifier);
    }
}
