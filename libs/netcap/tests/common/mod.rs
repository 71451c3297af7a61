#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use std::io::{self, Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use netcap::{
    CaptureRules, HeaderFields, HttpConnection, HttpMethod, InMemorySink, NetworkCaptureConfig, NetworkContext,
    RequestBody, RequestStream, ResponseStream, SdkClock, SecureHttpConnection, TraceparentSource,
};
use parking_lot::Mutex;
use rustls::client::danger::ServerCertVerifier;
use rustls_pki_types::CertificateDer;
use url::Url;

pub const FIXED_TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

/// Clock advancing 10ms per reading.
#[derive(Debug, Default)]
pub struct StepClock(AtomicU64);

impl SdkClock for StepClock {
    fn now_millis(&self) -> u64 {
        1_700_000_000_000 + self.0.fetch_add(10, Ordering::SeqCst)
    }
}

pub struct FixedTraceparent;

impl TraceparentSource for FixedTraceparent {
    fn generate(&self) -> String {
        FIXED_TRACEPARENT.to_owned()
    }
}

pub struct AlwaysCapture;

impl CaptureRules for AlwaysCapture {
    fn should_capture_body(&self, _url: &str, _method: HttpMethod) -> bool {
        true
    }
}

pub struct TestContext {
    pub ctx: NetworkContext,
    pub sink: Arc<InMemorySink>,
}

pub fn context(config: NetworkCaptureConfig) -> TestContext {
    let sink = Arc::new(InMemorySink::new());
    let ctx = NetworkContext::builder()
        .config(config)
        .clock(Arc::new(StepClock::default()))
        .sink(sink.clone())
        .traceparent_source(Arc::new(FixedTraceparent))
        .build()
        .unwrap();
    TestContext { ctx, sink }
}

pub fn capturing_context(config: NetworkCaptureConfig) -> TestContext {
    let sink = Arc::new(InMemorySink::new());
    let ctx = NetworkContext::builder()
        .config(config)
        .clock(Arc::new(StepClock::default()))
        .sink(sink.clone())
        .capture_rules(Arc::new(AlwaysCapture))
        .traceparent_source(Arc::new(FixedTraceparent))
        .build()
        .unwrap();
    TestContext { ctx, sink }
}

pub fn size_capture() -> NetworkCaptureConfig {
    NetworkCaptureConfig {
        request_size_capture: true,
        ..NetworkCaptureConfig::default()
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Request body sink shared between the mock and the test.
#[derive(Clone, Default)]
pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RequestStream for SharedBuffer {}

/// Canned server behavior for [`MockConnection`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Every response accessor fails with this kind
    pub transport_error: Option<io::ErrorKind>,
    /// `input_stream` fails with this kind
    pub stream_error: Option<io::ErrorKind>,
    /// Status, header and length reads fail with this kind
    pub header_error: Option<io::ErrorKind>,
}

impl MockResponse {
    pub fn ok(body: &[u8]) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".to_owned(), "text/plain".to_owned()),
                ("Content-Length".to_owned(), body.len().to_string()),
            ],
            body: body.to_vec(),
            transport_error: None,
            stream_error: None,
            header_error: None,
        }
    }

    pub fn gzipped(body: &[u8]) -> Self {
        let compressed = gzip(body);
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".to_owned(), "text/plain".to_owned()),
                ("Content-Encoding".to_owned(), "gzip".to_owned()),
                ("Content-Length".to_owned(), compressed.len().to_string()),
                ("X-Request-Id".to_owned(), "abc".to_owned()),
            ],
            body: compressed,
            transport_error: None,
            stream_error: None,
            header_error: None,
        }
    }

    pub fn failing(kind: io::ErrorKind) -> Self {
        Self {
            transport_error: Some(kind),
            ..Self::ok(b"")
        }
    }
}

#[derive(Debug, Default)]
pub struct MockCalls {
    pub connect: usize,
    pub disconnect: usize,
    pub response_code: usize,
    pub input_stream: usize,
    pub output_stream: usize,
}

#[derive(Debug)]
struct MockState {
    method: http::Method,
    properties: HeaderFields,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    use_caches: bool,
}

/// Platform connection double; also usable as an HTTPS connection.
pub struct MockConnection {
    url: Url,
    response: MockResponse,
    state: Mutex<MockState>,
    pub calls: Arc<Mutex<MockCalls>>,
    pub sent: SharedBuffer,
    pub peer_certs: Vec<CertificateDer<'static>>,
}

impl MockConnection {
    pub fn new(url: &str, response: MockResponse) -> Self {
        Self {
            url: Url::parse(url).unwrap(),
            response,
            state: Mutex::new(MockState {
                method: http::Method::GET,
                properties: HeaderFields::new(),
                connect_timeout: None,
                read_timeout: None,
                use_caches: true,
            }),
            calls: Arc::new(Mutex::new(MockCalls::default())),
            sent: SharedBuffer::default(),
            peer_certs: vec![CertificateDer::from(vec![0x30, 0x82, 0x01, 0x0a])],
        }
    }

    fn fail(&self) -> io::Result<()> {
        match self.response.transport_error {
            Some(kind) => Err(io::Error::new(kind, "connection refused by peer")),
            None => Ok(()),
        }
    }

    fn fail_header_read(&self) -> io::Result<()> {
        self.fail()?;
        match self.response.header_error {
            Some(kind) => Err(io::Error::new(kind, "header read failed")),
            None => Ok(()),
        }
    }

    fn find_property(properties: &HeaderFields, name: &str) -> Option<String> {
        properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.last().cloned())
    }
}

impl HttpConnection for MockConnection {
    fn url(&self) -> Url {
        self.url.clone()
    }

    fn request_method(&self) -> http::Method {
        self.state.lock().method.clone()
    }

    fn set_request_method(&self, method: http::Method) -> io::Result<()> {
        self.state.lock().method = method;
        Ok(())
    }

    fn request_property(&self, name: &str) -> Option<String> {
        Self::find_property(&self.state.lock().properties, name)
    }

    fn request_properties(&self) -> HeaderFields {
        self.state.lock().properties.clone()
    }

    fn set_request_property(&self, name: &str, value: &str) {
        self.state
            .lock()
            .properties
            .insert(name.to_owned(), vec![value.to_owned()]);
    }

    fn add_request_property(&self, name: &str, value: &str) {
        self.state
            .lock()
            .properties
            .entry(name.to_owned())
            .or_default()
            .push(value.to_owned());
    }

    fn connect(&self) -> io::Result<()> {
        self.calls.lock().connect += 1;
        self.fail()
    }

    fn disconnect(&self) {
        self.calls.lock().disconnect += 1;
    }

    fn response_code(&self) -> io::Result<u16> {
        self.calls.lock().response_code += 1;
        self.fail_header_read()?;
        Ok(self.response.status)
    }

    fn response_message(&self) -> io::Result<Option<String>> {
        self.fail()?;
        Ok(Some("OK".to_owned()))
    }

    fn header_fields(&self) -> io::Result<HeaderFields> {
        self.fail_header_read()?;
        let mut fields = HeaderFields::new();
        for (name, value) in &self.response.headers {
            fields.entry(name.clone()).or_default().push(value.clone());
        }
        Ok(fields)
    }

    fn header_field(&self, name: &str) -> Option<String> {
        self.fail().ok()?;
        self.response
            .headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn header_field_at(&self, index: usize) -> Option<String> {
        self.response.headers.get(index).map(|(_, v)| v.clone())
    }

    fn header_field_key(&self, index: usize) -> Option<String> {
        self.response.headers.get(index).map(|(k, _)| k.clone())
    }

    fn content_length(&self) -> io::Result<Option<u64>> {
        self.fail_header_read()?;
        Ok(self.header_field("Content-Length").and_then(|v| v.parse().ok()))
    }

    fn content_encoding(&self) -> Option<String> {
        self.header_field("Content-Encoding")
    }

    fn content_type(&self) -> Option<String> {
        self.header_field("Content-Type")
    }

    fn input_stream(&self) -> io::Result<Box<dyn ResponseStream>> {
        self.calls.lock().input_stream += 1;
        self.fail()?;
        if let Some(kind) = self.response.stream_error {
            return Err(io::Error::new(kind, "stream reset"));
        }
        Ok(Box::new(Cursor::new(self.response.body.clone())))
    }

    fn error_stream(&self) -> Option<Box<dyn ResponseStream>> {
        (self.response.status >= 400).then(|| Box::new(Cursor::new(self.response.body.clone())) as Box<dyn ResponseStream>)
    }

    fn output_stream(&self) -> io::Result<RequestBody> {
        self.calls.lock().output_stream += 1;
        Ok(RequestBody::new(self.sent.clone()))
    }

    fn connect_timeout(&self) -> Option<Duration> {
        self.state.lock().connect_timeout
    }

    fn set_connect_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().connect_timeout = timeout;
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.state.lock().read_timeout
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().read_timeout = timeout;
    }

    fn use_caches(&self) -> bool {
        self.state.lock().use_caches
    }

    fn set_use_caches(&self, use_caches: bool) {
        self.state.lock().use_caches = use_caches;
    }
}

impl SecureHttpConnection for MockConnection {
    fn cipher_suite(&self) -> Option<String> {
        Some("TLS13_AES_128_GCM_SHA256".to_owned())
    }

    fn peer_certificates(&self) -> io::Result<Vec<CertificateDer<'static>>> {
        Ok(self.peer_certs.clone())
    }

    fn local_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        None
    }

    fn tls_config(&self) -> Option<Arc<rustls::ClientConfig>> {
        None
    }

    fn set_tls_config(&self, _config: Arc<rustls::ClientConfig>) {}

    fn server_cert_verifier(&self) -> Option<Arc<dyn ServerCertVerifier>> {
        None
    }

    fn set_server_cert_verifier(&self, _verifier: Arc<dyn ServerCertVerifier>) {}
}
