//! Response bodies handed back to the caller.

use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use flate2::write::GzDecoder;
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use netcap::{BoxError, NetworkContext, NetworkRequestRecord};
use pin_project_lite::pin_project;

/// Type-erased response body returned by [`NetworkCaptureService`](crate::NetworkCaptureService).
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// A body read to its end and replayed from memory.
///
/// A failure while reading is replayed after the bytes that arrived before it.
#[derive(Debug)]
pub struct BufferedBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
    error: Option<BoxError>,
}

impl BufferedBody {
    /// Drain `body`.
    pub async fn read(mut body: ResponseBody) -> Self {
        let mut data = BytesMut::new();
        let mut trailers = None;
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => match frame.into_data() {
                    Ok(chunk) => data.extend_from_slice(&chunk),
                    Err(frame) => trailers = frame.into_trailers().ok(),
                },
                Err(e) => {
                    return Self {
                        data: Some(data.freeze()),
                        trailers,
                        error: Some(e),
                    };
                }
            }
        }
        Self {
            data: Some(data.freeze()),
            trailers,
            error: None,
        }
    }

    /// Buffered length, `None` if reading failed.
    #[must_use]
    pub fn complete_len(&self) -> Option<u64> {
        if self.error.is_some() {
            return None;
        }
        Some(self.data.as_ref().map_or(0, |d| d.len() as u64))
    }
}

impl Body for BufferedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        if let Some(data) = this.data.take().filter(|d| !d.is_empty()) {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        if let Some(e) = this.error.take() {
            return Poll::Ready(Some(Err(e)));
        }
        Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))))
    }

    fn is_end_stream(&self) -> bool {
        self.data.as_ref().is_none_or(Bytes::is_empty) && self.error.is_none() && self.trailers.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match (&self.data, &self.error) {
            (Some(data), None) => SizeHint::with_exact(data.len() as u64),
            (None, None) => SizeHint::with_exact(0),
            _ => SizeHint::default(),
        }
    }
}

pin_project! {
    /// Body decompressing a gzip-encoded inner body as it streams.
    pub struct GzipDecodingBody {
        #[pin]
        inner: ResponseBody,
        decoder: GzDecoder<Vec<u8>>,
        trailers: Option<HeaderMap>,
        saw_data: bool,
        finished: bool,
    }
}

impl GzipDecodingBody {
    #[must_use]
    pub fn new(inner: ResponseBody) -> Self {
        Self {
            inner,
            decoder: GzDecoder::new(Vec::new()),
            trailers: None,
            saw_data: false,
            finished: false,
        }
    }
}

fn take_decoded(decoder: &mut GzDecoder<Vec<u8>>) -> Option<Bytes> {
    let out = std::mem::take(decoder.get_mut());
    (!out.is_empty()).then(|| Bytes::from(out))
}

impl Body for GzipDecodingBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let mut this = self.project();
        loop {
            if *this.finished {
                return Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))));
            }
            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(chunk) => {
                        *this.saw_data = true;
                        if let Err(e) = this.decoder.write_all(&chunk).and_then(|()| this.decoder.flush()) {
                            *this.finished = true;
                            return Poll::Ready(Some(Err(e.into())));
                        }
                        if let Some(out) = take_decoded(this.decoder) {
                            return Poll::Ready(Some(Ok(Frame::data(out))));
                        }
                    }
                    Err(frame) => *this.trailers = frame.into_trailers().ok(),
                },
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    *this.finished = true;
                    if !*this.saw_data {
                        continue;
                    }
                    if let Err(e) = this.decoder.try_finish() {
                        return Poll::Ready(Some(Err(e.into())));
                    }
                    if let Some(out) = take_decoded(this.decoder) {
                        return Poll::Ready(Some(Ok(Frame::data(out))));
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished && self.trailers.is_none()
    }
}

/// Report waiting for the response body to be read.
struct PendingReport {
    ctx: NetworkContext,
    key: String,
    record: NetworkRequestRecord,
}

impl PendingReport {
    fn complete(self, body: Vec<u8>) {
        self.ctx
            .replace_deduplicated(&self.key, self.record.with_response_body(body));
    }

    fn fail(self) {
        tracing::debug!(target: "netcap_http::network", key = %self.key, "response body failed before capture completed");
        self.ctx
            .replace_deduplicated(&self.key, self.record.with_response_body_failure());
    }
}

pin_project! {
    /// Body copying what the caller reads, re-reporting the call with the
    /// captured response body once the body ends.
    pub struct CaptureBody {
        #[pin]
        inner: ResponseBody,
        captured: Vec<u8>,
        limit: usize,
        pending: Option<PendingReport>,
    }
}

impl CaptureBody {
    /// Wrap `inner`; `record` is re-reported under `key` once it ends.
    ///
    /// An inner body that is already at its end reports immediately.
    #[must_use]
    pub fn new(inner: ResponseBody, limit: usize, ctx: NetworkContext, key: String, record: NetworkRequestRecord) -> Self {
        let mut body = Self {
            inner,
            captured: Vec::new(),
            limit,
            pending: Some(PendingReport { ctx, key, record }),
        };
        if body.inner.is_end_stream()
            && let Some(pending) = body.pending.take()
        {
            pending.complete(Vec::new());
        }
        body
    }
}

impl Body for CaptureBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let mut this = self.project();
        let polled = ready!(this.inner.as_mut().poll_frame(cx));
        match &polled {
            Some(Ok(frame)) => {
                if let Some(chunk) = frame.data_ref() {
                    let room = this.limit.saturating_sub(this.captured.len());
                    this.captured.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                if this.inner.is_end_stream()
                    && let Some(pending) = this.pending.take()
                {
                    pending.complete(std::mem::take(this.captured));
                }
            }
            Some(Err(_)) => {
                if let Some(pending) = this.pending.take() {
                    pending.fail();
                }
            }
            None => {
                if let Some(pending) = this.pending.take() {
                    pending.complete(std::mem::take(this.captured));
                }
            }
        }
        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
