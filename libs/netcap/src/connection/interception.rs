use std::convert::Infallible;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use flate2::read::GzDecoder;
use parking_lot::Mutex;
use url::Url;

use super::state::{AccessEvent, ConnectionState};
use super::{HeaderFields, HttpConnection};
use crate::capture::{CaptureAssembler, CapturePart, NetworkCaptureData, flatten_header_lists};
use crate::context::NetworkContext;
use crate::error::{UNKNOWN_STATE_KIND, UNKNOWN_STATE_MESSAGE, describe_failure};
use crate::path_override::{self, PATH_OVERRIDE_HEADER, QueryHandling};
use crate::record::{HttpMethod, NetworkRequestRecord, RequestSummary};
use crate::stream::{
    CompletionCallback, CountingReader, CountingWriter, RequestBody, ResponseStream, StreamCompletion, WriteTally,
};
use crate::trace::TRACEPARENT_HEADER;

pub(super) const ACCEPT_ENCODING: &str = "Accept-Encoding";
const CONTENT_ENCODING: &str = "Content-Encoding";
const CONTENT_LENGTH: &str = "Content-Length";

/// `(error kind, error message)` of an observed failure.
type Failure = (String, String);

/// Value initialized at most once under double-checked locking.
///
/// A failed initialization leaves the slot empty so a later call may retry.
struct Cached<T> {
    value: OnceLock<T>,
    lock: Mutex<()>,
}

impl<T> Cached<T> {
    fn new() -> Self {
        Self {
            value: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    fn get(&self) -> Option<&T> {
        self.value.get()
    }

    fn get_or_try<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(v) = self.value.get() {
            return Ok(v);
        }
        let _guard = self.lock.lock();
        if let Some(v) = self.value.get() {
            return Ok(v);
        }
        let v = init()?;
        Ok(self.value.get_or_init(|| v))
    }
}

/// Request-side facts gathered once, before the request is sent.
#[derive(Debug, Clone, Default)]
struct RequestSnapshot {
    injected_gzip: bool,
    trace_id: Option<String>,
    traceparent: Option<String>,
    path_override: Option<String>,
    headers: Option<HeaderFields>,
}

/// Shared state behind an instrumented connection and its streams.
pub(super) struct InterceptionCore<C: HttpConnection> {
    conn: C,
    ctx: NetworkContext,
    active: bool,
    wrap_streams: bool,
    capture_limit: usize,
    created_at: u64,
    state: Mutex<ConnectionState>,
    finalized: AtomicBool,
    request: OnceLock<RequestSnapshot>,
    headers: Cached<HeaderFields>,
    status: Cached<u16>,
    length: Cached<Option<u64>>,
    transparent_gzip: OnceLock<bool>,
    stream_error: Mutex<Option<Failure>>,
    access_error: Mutex<Option<Failure>>,
    request_body: Mutex<Option<(RequestBody, Option<Arc<WriteTally>>)>>,
    response_body: Mutex<Option<StreamCompletion>>,
}

impl<C: HttpConnection> InterceptionCore<C> {
    pub(super) fn new(conn: C, ctx: &NetworkContext) -> Self {
        let active = ctx.is_enabled();
        Self {
            conn,
            ctx: ctx.clone(),
            active,
            wrap_streams: active && ctx.config().request_size_capture,
            capture_limit: ctx.config().max_captured_body_bytes,
            created_at: ctx.now_millis(),
            state: Mutex::new(ConnectionState::Created),
            finalized: AtomicBool::new(false),
            request: OnceLock::new(),
            headers: Cached::new(),
            status: Cached::new(),
            length: Cached::new(),
            transparent_gzip: OnceLock::new(),
            stream_error: Mutex::new(None),
            access_error: Mutex::new(None),
            request_body: Mutex::new(None),
            response_body: Mutex::new(None),
        }
    }

    pub(super) fn conn(&self) -> &C {
        &self.conn
    }

    pub(super) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Single entry point for everything that can move the connection along.
    pub(super) fn on_access_event(&self, event: AccessEvent) {
        if !self.active {
            return;
        }
        let transition = {
            let mut state = self.state.lock();
            let transition = state.on_event(event, self.wrap_streams);
            *state = transition.next;
            transition
        };
        if transition.cache_metadata {
            self.cache_response_metadata();
        }
        if transition.finalize {
            self.finalize();
        }
    }

    /// Gather request-side facts and inject headers, once, before dispatch.
    pub(super) fn prepare_request(&self) {
        if self.active {
            self.request.get_or_init(|| self.snapshot_request(true));
        }
    }

    fn snapshot_request(&self, inject: bool) -> RequestSnapshot {
        let config = self.ctx.config();
        let mut injected_gzip = false;
        if inject && self.wrap_streams && self.conn.request_property(ACCEPT_ENCODING).is_none() {
            self.conn.set_request_property(ACCEPT_ENCODING, "gzip");
            injected_gzip = true;
        }
        let traceparent = if config.span_forwarding {
            match self.conn.request_property(TRACEPARENT_HEADER) {
                Some(existing) => Some(existing),
                None if inject => {
                    let generated = self.ctx.generate_traceparent();
                    self.conn.set_request_property(TRACEPARENT_HEADER, &generated);
                    Some(generated)
                }
                None => None,
            }
        } else {
            None
        };
        RequestSnapshot {
            injected_gzip,
            trace_id: self.conn.request_property(&config.trace_id_header),
            traceparent,
            path_override: self.conn.request_property(PATH_OVERRIDE_HEADER),
            headers: self.capture_approved().then(|| self.conn.request_properties()),
        }
    }

    fn capture_approved(&self) -> bool {
        self.active
            && HttpMethod::try_from(&self.conn.request_method())
                .is_ok_and(|method| self.ctx.should_capture_body(self.conn.url().as_str(), method))
    }

    /// Whether this layer asked for gzip and must decompress and hide the encoding.
    pub(super) fn transparent_gzip(&self) -> bool {
        self.request.get().is_some_and(|r| r.injected_gzip)
            && *self.transparent_gzip.get_or_init(|| {
                self.conn
                    .content_encoding()
                    .is_some_and(|e| e.trim().eq_ignore_ascii_case("gzip"))
            })
    }

    pub(super) fn note_access_error(&self, err: &io::Error) {
        *self.access_error.lock() = Some(describe_failure(err));
    }

    pub(super) fn note_stream_error(&self, err: &io::Error) {
        *self.stream_error.lock() = Some(describe_failure(err));
    }

    fn cache_response_metadata(&self) {
        let hide = self.transparent_gzip();
        let headers = self.headers.get_or_try(|| {
            self.conn
                .header_fields()
                .map(|h| if hide { strip_compression_headers(h) } else { h })
        });
        if let Err(e) = headers {
            self.note_access_error(&e);
        }
        if let Err(e) = self.status.get_or_try(|| self.conn.response_code()) {
            self.note_access_error(&e);
        }
        if let Err(e) = self.length.get_or_try(|| self.conn.content_length()) {
            self.note_access_error(&e);
        }
    }

    /// Whether the response can carry a body at all.
    fn response_has_body(&self) -> bool {
        if self.conn.request_method() == http::Method::HEAD {
            return false;
        }
        let status = match self.status.get_or_try(|| self.conn.response_code()) {
            Ok(status) => *status,
            Err(e) => {
                self.note_access_error(&e);
                return false;
            }
        };
        let bodyless_status = (100..200).contains(&status) || status == 204 || status == 304;
        let empty = matches!(self.length.get_or_try(|| self.conn.content_length()), Ok(Some(0)));
        !bodyless_status && !empty
    }

    /// Route a response stream through decompression and byte counting.
    pub(super) fn wrap_response(core: &Arc<Self>, stream: Box<dyn ResponseStream>) -> Box<dyn ResponseStream>
    where
        C: 'static,
    {
        if !core.wrap_streams {
            return stream;
        }
        let reader: Box<dyn Read + Send> = if core.transparent_gzip() && core.response_has_body() {
            Box::new(GzDecoder::new(stream))
        } else {
            Box::new(stream)
        };
        let owner = Arc::clone(core);
        let on_complete: CompletionCallback = Arc::new(move |completion| owner.on_stream_completed(completion));
        Box::new(CountingReader::new(
            reader,
            core.capture_approved(),
            core.capture_limit,
            on_complete,
        ))
    }

    fn on_stream_completed(&self, completion: StreamCompletion) {
        {
            let mut slot = self.response_body.lock();
            if slot.is_none() {
                *slot = Some(completion);
            }
        }
        self.on_access_event(AccessEvent::StreamCompleted);
    }

    /// Request body stream, wrapped on first use and shared afterwards.
    pub(super) fn request_body(&self) -> io::Result<RequestBody> {
        let mut slot = self.request_body.lock();
        if let Some((body, _)) = slot.as_ref() {
            return Ok(body.clone());
        }
        let inner = self.conn.output_stream()?;
        let (body, tally) = if self.wrap_streams {
            let writer = CountingWriter::new(inner, self.capture_approved(), self.capture_limit);
            let tally = writer.tally();
            (RequestBody::new(writer), Some(tally))
        } else {
            (inner, None)
        };
        *slot = Some((body.clone(), tally));
        Ok(body)
    }

    fn bytes_sent(&self) -> u64 {
        self.request_body
            .lock()
            .as_ref()
            .and_then(|(_, tally)| tally.as_ref())
            .map_or(0, |t| t.count())
    }

    fn bytes_received(&self) -> u64 {
        if let Some(completion) = self.response_body.lock().as_ref() {
            return completion.bytes_read;
        }
        self.length.get().copied().flatten().unwrap_or(0)
    }

    /// Build and report the record. Runs at most once per connection.
    fn finalize(&self) {
        if self
            .finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let end = self.ctx.now_millis();
        let method = match HttpMethod::try_from(&self.conn.request_method()) {
            Ok(method) => method,
            Err(e) => {
                tracing::warn!(target: "netcap::connection", error = %e, "not reporting request");
                return;
            }
        };
        let url = self.conn.url();
        let request = self
            .request
            .get()
            .cloned()
            .unwrap_or_else(|| self.snapshot_request(false));
        let reported_url = path_override::resolve(url.as_str(), request.path_override.as_deref(), QueryHandling::Drop);
        let capture_data = self
            .ctx
            .should_capture_body(url.as_str(), method)
            .then(|| self.assemble_capture(&url, &request));

        let summary = RequestSummary::new(reported_url, method, self.created_at, end)
            .with_trace_id(request.trace_id)
            .with_traceparent(request.traceparent)
            .with_capture_data(capture_data);

        let stream_error = self.stream_error.lock().clone();
        let access_error = self.access_error.lock().clone();
        let record = match (stream_error, access_error, self.status.get()) {
            (None, None, Some(&status)) => {
                NetworkRequestRecord::from_completed_request(summary, self.bytes_sent(), self.bytes_received(), status)
            }
            (stream_error, access_error, _) => {
                let (kind, message) = stream_error
                    .or(access_error)
                    .unwrap_or_else(|| (UNKNOWN_STATE_KIND.to_owned(), UNKNOWN_STATE_MESSAGE.to_owned()));
                NetworkRequestRecord::from_incomplete_request(summary, kind, message)
            }
        };
        tracing::debug!(
            target: "netcap::connection",
            url = record.url(),
            completed = record.is_completed(),
            "reporting connection request"
        );
        self.ctx.report(url.as_str(), record);
    }

    fn assemble_capture(&self, url: &Url, request: &RequestSnapshot) -> NetworkCaptureData {
        let mut assembler = CaptureAssembler::new();
        assembler.step(CapturePart::ResponseHeaders, |data| {
            let headers = self.headers.get().ok_or("response headers were never read")?;
            data.response_headers = Some(flatten_header_lists(headers));
            Ok::<(), &str>(())
        });
        assembler.step(CapturePart::RequestHeaders, |data| {
            let headers = request.headers.as_ref().ok_or("request headers were not recorded")?;
            data.request_headers = Some(flatten_header_lists(headers));
            Ok::<(), &str>(())
        });
        assembler.step(CapturePart::QueryParameters, |data| {
            data.request_query = url.query().map(str::to_owned);
            Ok::<(), Infallible>(())
        });
        assembler.step(CapturePart::RequestBody, |data| {
            data.request_body = self
                .request_body
                .lock()
                .as_ref()
                .and_then(|(_, tally)| tally.as_ref())
                .and_then(|t| t.captured());
            Ok::<(), Infallible>(())
        });
        assembler.step(CapturePart::ResponseBody, |data| match self.response_body.lock().as_ref() {
            Some(completion) if completion.failed => Err("response body stream failed"),
            Some(completion) => {
                data.response_body.clone_from(&completion.body);
                Ok(())
            }
            None => Ok(()),
        });
        assembler.finish()
    }
}

impl<C: HttpConnection> Drop for InterceptionCore<C> {
    fn drop(&mut self) {
        self.on_access_event(AccessEvent::Released);
    }
}

pub(super) fn is_compression_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(CONTENT_ENCODING) || name.eq_ignore_ascii_case(CONTENT_LENGTH)
}

pub(super) fn strip_compression_headers(mut headers: HeaderFields) -> HeaderFields {
    headers.retain(|name, _| !is_compression_header(name));
    headers
}
