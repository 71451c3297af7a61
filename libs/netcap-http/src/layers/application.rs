use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{Request, Response};
use netcap::path_override::{PATH_OVERRIDE_HEADER, QueryHandling, resolve};
use netcap::{HttpMethod, NetworkContext, NetworkRequestRecord, RequestSummary, TRACEPARENT_HEADER, describe_failure};
use tower::{Layer, Service};

use super::header_text;
use crate::call::CallContext;
use crate::error::PathOverrideError;

/// Outermost capture layer: reports calls that fail before a response
/// reaches the application.
///
/// The inner service's error is only inspected and reaches the caller
/// as-is. A [`PathOverrideError`] anywhere in its source chain supplies the
/// reported path and the cause the failure is described by.
#[derive(Clone, Debug)]
pub struct ApplicationCaptureLayer {
    ctx: NetworkContext,
}

impl ApplicationCaptureLayer {
    #[must_use]
    pub fn new(ctx: NetworkContext) -> Self {
        Self { ctx }
    }
}

impl<S> Layer<S> for ApplicationCaptureLayer {
    type Service = ApplicationCaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApplicationCaptureService {
            inner,
            ctx: self.ctx.clone(),
        }
    }
}

/// Service reporting failed calls as incomplete requests
#[derive(Clone, Debug)]
pub struct ApplicationCaptureService<S> {
    inner: S,
    ctx: NetworkContext,
}

/// What the application asked for, kept until the call settles.
struct PendingCall {
    call: CallContext,
    url: String,
    method: HttpMethod,
    path_override: Option<String>,
    trace_id: Option<String>,
    traceparent: Option<String>,
}

impl PendingCall {
    fn observe<B>(ctx: &NetworkContext, req: &mut Request<B>) -> Option<Self> {
        if !ctx.is_enabled() {
            return None;
        }
        let method = match HttpMethod::try_from(req.method()) {
            Ok(method) => method,
            Err(e) => {
                tracing::debug!(target: "netcap_http::application", error = %e, "not observing call");
                return None;
            }
        };
        let call = CallContext::start(ctx);
        req.extensions_mut().insert(call.clone());

        let headers = req.headers();
        let config = ctx.config();
        Some(Self {
            call,
            url: req.uri().to_string(),
            method,
            path_override: header_text(headers, PATH_OVERRIDE_HEADER),
            trace_id: header_text(headers, &config.trace_id_header),
            traceparent: config
                .span_forwarding
                .then(|| header_text(headers, TRACEPARENT_HEADER))
                .flatten(),
        })
    }

    fn report_failure(self, ctx: &NetworkContext, err: &(dyn StdError + 'static)) {
        let Self {
            call,
            url,
            method,
            path_override,
            trace_id,
            traceparent,
        } = self;
        let (path, cause) = match PathOverrideError::find(err) {
            Some(overridden) => (Some(overridden.path()), overridden.cause()),
            None => (path_override.as_deref(), err),
        };
        let (kind, message) = describe_failure(cause);
        tracing::debug!(
            target: "netcap_http::application",
            call_id = call.id(),
            error_kind = %kind,
            "call failed before a response"
        );

        let summary = RequestSummary::new(
            resolve(&url, path, QueryHandling::Keep),
            method,
            call.start_time_ms(),
            ctx.now_millis(),
        )
        .with_trace_id(trace_id)
        .with_traceparent(traceparent);
        let record = NetworkRequestRecord::from_incomplete_request(summary, kind, message);
        ctx.report_deduplicated(call.id(), &url, record);
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ApplicationCaptureService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: StdError + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let pending = PendingCall::observe(&self.ctx, &mut req);
        let ctx = self.ctx.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            inner.call(req).await.inspect_err(|err| {
                if let Some(pending) = pending {
                    pending.report_failure(&ctx, err);
                }
            })
        })
    }
}
