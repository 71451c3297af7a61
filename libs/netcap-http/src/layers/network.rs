use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use netcap::path_override::{PATH_OVERRIDE_HEADER, QueryHandling, resolve};
use netcap::{
    BoxError, CaptureAssembler, CapturePart, HttpMethod, NetworkCaptureData, NetworkContext, NetworkRequestRecord,
    RequestSummary, TRACEPARENT_HEADER, flatten_header_map,
};
use tower::{Layer, Service};

use super::header_text;
use crate::body::{BufferedBody, CaptureBody, GzipDecodingBody, ResponseBody};
use crate::call::{CallContext, ClientClock, SystemClientClock, clock_offset, to_sdk_time};

const EVENT_STREAM: &str = "text/event-stream";

/// Innermost capture layer: reports every exchange that produced a
/// response, as seen on the wire.
///
/// - injects a generated `traceparent` when span forwarding is on and the
///   request carries none
/// - sizes the response from `Content-Length`, buffering it when the header
///   is missing (never for `text/event-stream`)
/// - decompresses gzip responses approved for capture, hiding
///   `Content-Encoding` and `Content-Length`
/// - re-reports the call once the captured response body has been read
#[derive(Clone)]
pub struct NetworkCaptureLayer {
    ctx: NetworkContext,
    client_clock: Arc<dyn ClientClock>,
}

impl NetworkCaptureLayer {
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
}

impl fmt::Debug for NetworkCaptureLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCaptureLayer")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for NetworkCaptureLayer {
    type Service = NetworkCaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        NetworkCaptureService {
            inner,
            ctx: self.ctx.clone(),
            client_clock: Arc::clone(&self.client_clock),
        }
    }
}

/// Service reporting completed exchanges
#[derive(Clone)]
pub struct NetworkCaptureService<S> {
    inner: S,
    ctx: NetworkContext,
    client_clock: Arc<dyn ClientClock>,
}

impl<S> fmt::Debug for NetworkCaptureService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCaptureService")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// The request as it went out, kept until the response is in.
struct SentRequest {
    call: CallContext,
    url: String,
    method: HttpMethod,
    headers: HeaderMap,
    query: Option<String>,
    body: Full<Bytes>,
    bytes_sent: u64,
    trace_id: Option<String>,
    traceparent: Option<String>,
    path_override: Option<String>,
}

impl SentRequest {
    fn snapshot(ctx: &NetworkContext, method: HttpMethod, req: &Request<Full<Bytes>>) -> Self {
        let headers = req.headers();
        let config = ctx.config();
        Self {
            call: req
                .extensions()
                .get::<CallContext>()
                .cloned()
                .unwrap_or_else(|| CallContext::start(ctx)),
            url: req.uri().to_string(),
            method,
            headers: headers.clone(),
            query: req.uri().query().map(str::to_owned),
            body: req.body().clone(),
            bytes_sent: req.body().size_hint().exact().unwrap_or(0),
            trace_id: header_text(headers, &config.trace_id_header),
            traceparent: config
                .span_forwarding
                .then(|| header_text(headers, TRACEPARENT_HEADER))
                .flatten(),
            path_override: header_text(headers, PATH_OVERRIDE_HEADER),
        }
    }

    /// Acquire the capturable parts, response body excluded.
    async fn capture(&self, response_headers: &HeaderMap, limit: usize) -> NetworkCaptureData {
        let Ok(body) = self.body.clone().collect().await;
        let body = body.to_bytes();

        let mut assembler = CaptureAssembler::new();
        assembler.step(CapturePart::ResponseHeaders, |data| {
            flatten_header_map(response_headers).map(|h| data.response_headers = Some(h))
        });
        assembler.step(CapturePart::RequestHeaders, |data| {
            flatten_header_map(&self.headers).map(|h| data.request_headers = Some(h))
        });
        assembler.step(CapturePart::QueryParameters, |data| {
            data.request_query.clone_from(&self.query);
            Ok::<(), Infallible>(())
        });
        assembler.step(CapturePart::RequestBody, |data| {
            data.request_body = Some(body[..body.len().min(limit)].to_vec());
            Ok::<(), Infallible>(())
        });
        assembler.finish()
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(EVENT_STREAM))
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
}

/// Whether a response to `method` with `status` can carry a body.
fn promises_body(method: HttpMethod, status: StatusCode, declared: Option<u64>) -> bool {
    method != HttpMethod::Head
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
        && declared != Some(0)
}

fn box_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    response.map(|body| body.map_err(Into::into).boxed())
}

fn inject_traceparent(ctx: &NetworkContext, req: &mut Request<Full<Bytes>>) {
    if !ctx.config().span_forwarding || req.headers().contains_key(TRACEPARENT_HEADER) {
        return;
    }
    match HeaderValue::try_from(ctx.generate_traceparent()) {
        Ok(value) => {
            req.headers_mut().insert(TRACEPARENT_HEADER, value);
        }
        Err(e) => {
            tracing::debug!(target: "netcap_http::network", error = %e, "generated traceparent is not a header value");
        }
    }
}

/// Size, decode and report a response, returning what the caller sees.
async fn complete<B>(
    ctx: &NetworkContext,
    sent: SentRequest,
    (start_time_ms, end_time_ms): (u64, u64),
    response: Response<B>,
) -> Response<ResponseBody>
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (mut parts, body) = response.into_parts();
    let mut body = body.map_err(Into::into).boxed();

    let declared = declared_length(&parts.headers);
    let bytes_received = match declared {
        Some(len) => len,
        None if is_event_stream(&parts.headers) => 0,
        None => {
            let buffered = BufferedBody::read(body).await;
            let len = buffered.complete_len().unwrap_or(0);
            body = buffered.boxed();
            len
        }
    };

    let has_body = promises_body(sent.method, parts.status, declared);
    let capture = ctx.should_capture_body(&sent.url, sent.method);
    if capture && has_body && is_gzip(&parts.headers) {
        parts.headers.remove(CONTENT_ENCODING);
        parts.headers.remove(CONTENT_LENGTH);
        body = GzipDecodingBody::new(body).boxed();
    }

    let limit = ctx.config().max_captured_body_bytes;
    let capture_data = if capture {
        Some(sent.capture(&parts.headers, limit).await)
    } else {
        None
    };

    let key = sent.call.id().to_owned();
    let summary = RequestSummary::new(
        resolve(&sent.url, sent.path_override.as_deref(), QueryHandling::Keep),
        sent.method,
        start_time_ms,
        end_time_ms,
    )
    .with_trace_id(sent.trace_id)
    .with_traceparent(sent.traceparent)
    .with_capture_data(capture_data);
    let record =
        NetworkRequestRecord::from_completed_request(summary, sent.bytes_sent, bytes_received, parts.status.as_u16());

    let awaits_body = has_body && record.capture_data().is_some_and(NetworkCaptureData::is_complete);
    tracing::trace!(
        target: "netcap_http::network",
        call_id = %key,
        status = parts.status.as_u16(),
        bytes_received,
        awaits_body,
        "exchange completed"
    );
    if awaits_body {
        ctx.report_deduplicated(&key, &sent.url, record.clone());
        body = CaptureBody::new(body, limit, ctx.clone(), key, record).boxed();
    } else {
        ctx.report_deduplicated(&key, &sent.url, record);
    }
    Response::from_parts(parts, body)
}

impl<S, ResBody> Service<Request<Full<Bytes>>> for NetworkCaptureService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + Sync + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<ResponseBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Full<Bytes>>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let method = if self.ctx.is_enabled() {
            HttpMethod::try_from(req.method())
                .inspect_err(|e| {
                    tracing::debug!(target: "netcap_http::network", error = %e, "not observing exchange");
                })
                .ok()
        } else {
            None
        };
        let Some(method) = method else {
            return Box::pin(async move { inner.call(req).await.map(box_response) });
        };

        let ctx = self.ctx.clone();
        let clock = Arc::clone(&self.client_clock);
        let offset_before = clock_offset(ctx.now_millis(), clock.now_millis());
        inject_traceparent(&ctx, &mut req);
        let sent = SentRequest::snapshot(&ctx, method, &req);

        Box::pin(async move {
            let sent_at = clock.now_millis();
            let response = inner.call(req).await?;
            let received_at = clock.now_millis();
            let offset_after = clock_offset(ctx.now_millis(), clock.now_millis());
            let times = (to_sdk_time(sent_at, offset_before), to_sdk_time(received_at, offset_after));
            Ok(complete(&ctx, sent, times, response).await)
        })
    }
}
