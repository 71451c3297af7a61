use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::NetworkCaptureData;

/// HTTP method of an observed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl HttpMethod {
    /// Upper-case wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The method string is not one of the nine recorded methods.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported http method '{0}'")]
pub struct UnsupportedMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "CONNECT" => Self::Connect,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            "PATCH" => Self::Patch,
            _ => return Err(UnsupportedMethod(s.to_owned())),
        };
        Ok(method)
    }
}

impl TryFrom<&http::Method> for HttpMethod {
    type Error = UnsupportedMethod;

    fn try_from(method: &http::Method) -> Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Head => Self::HEAD,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Delete => Self::DELETE,
            HttpMethod::Connect => Self::CONNECT,
            HttpMethod::Options => Self::OPTIONS,
            HttpMethod::Trace => Self::TRACE,
            HttpMethod::Patch => Self::PATCH,
        }
    }
}

/// Fields shared by completed and incomplete records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub url: String,
    pub method: HttpMethod,
    /// Start time in SDK-clock milliseconds
    pub start_time_ms: u64,
    /// End time in SDK-clock milliseconds
    pub end_time_ms: u64,
    pub trace_id: Option<String>,
    pub w3c_traceparent: Option<String>,
    pub capture_data: Option<NetworkCaptureData>,
}

impl RequestSummary {
    /// Summary with no correlation ids and no captured data.
    #[must_use]
    pub fn new(url: impl Into<String>, method: HttpMethod, start_time_ms: u64, end_time_ms: u64) -> Self {
        Self {
            url: url.into(),
            method,
            start_time_ms,
            end_time_ms,
            trace_id: None,
            w3c_traceparent: None,
            capture_data: None,
        }
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    #[must_use]
    pub fn with_traceparent(mut self, traceparent: Option<String>) -> Self {
        self.w3c_traceparent = traceparent;
        self
    }

    #[must_use]
    pub fn with_capture_data(mut self, capture_data: Option<NetworkCaptureData>) -> Self {
        self.capture_data = capture_data;
        self
    }
}

/// How the request ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// A response status was obtained
    Completed {
        bytes_sent: u64,
        bytes_received: u64,
        status_code: u16,
    },
    /// The request failed before a response status was known
    Incomplete {
        error_kind: String,
        error_message: String,
    },
}

/// Immutable description of one finished outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRequestRecord {
    url: String,
    method: HttpMethod,
    start_time_ms: u64,
    end_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    w3c_traceparent: Option<String>,
    #[serde(flatten)]
    outcome: RequestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    capture_data: Option<NetworkCaptureData>,
}

impl NetworkRequestRecord {
    /// Record for a request that produced a response status.
    #[must_use]
    pub fn from_completed_request(
        summary: RequestSummary,
        bytes_sent: u64,
        bytes_received: u64,
        status_code: u16,
    ) -> Self {
        Self::build(
            summary,
            RequestOutcome::Completed {
                bytes_sent,
                bytes_received,
                status_code,
            },
        )
    }

    /// Record for a request that failed before a response status was known.
    #[must_use]
    pub fn from_incomplete_request(
        summary: RequestSummary,
        error_kind: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self::build(
            summary,
            RequestOutcome::Incomplete {
                error_kind: error_kind.into(),
                error_message: error_message.into(),
            },
        )
    }

    fn build(summary: RequestSummary, outcome: RequestOutcome) -> Self {
        let RequestSummary {
            url,
            method,
            start_time_ms,
            end_time_ms,
            trace_id,
            w3c_traceparent,
            capture_data,
        } = summary;
        Self {
            url,
            method,
            start_time_ms,
            end_time_ms,
            trace_id,
            w3c_traceparent,
            outcome,
            capture_data,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn start_time_ms(&self) -> u64 {
        self.start_time_ms
    }

    #[must_use]
    pub fn end_time_ms(&self) -> u64 {
        self.end_time_ms
    }

    /// Elapsed time, zero if the clock readings are out of order.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms.saturating_sub(self.start_time_ms)
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    #[must_use]
    pub fn w3c_traceparent(&self) -> Option<&str> {
        self.w3c_traceparent.as_deref()
    }

    #[must_use]
    pub fn outcome(&self) -> &RequestOutcome {
        &self.outcome
    }

    #[must_use]
    pub fn capture_data(&self) -> Option<&NetworkCaptureData> {
        self.capture_data.as_ref()
    }

    /// Same record with the response body added to its capture data.
    ///
    /// No-op for records without capture data.
    #[must_use]
    pub fn with_response_body(mut self, body: Vec<u8>) -> Self {
        self.capture_data = self.capture_data.map(|data| data.with_response_body(body));
        self
    }

    /// Same record with the response body marked as not captured.
    #[must_use]
    pub fn with_response_body_failure(mut self) -> Self {
        self.capture_data = self.capture_data.map(NetworkCaptureData::with_response_body_failure);
        self
    }

    /// Response status for completed records.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self.outcome {
            RequestOutcome::Completed { status_code, .. } => Some(status_code),
            RequestOutcome::Incomplete { .. } => None,
        }
    }

    #[must_use]
    pub fn bytes_sent(&self) -> Option<u64> {
        match self.outcome {
            RequestOutcome::Completed { bytes_sent, .. } => Some(bytes_sent),
            RequestOutcome::Incomplete { .. } => None,
        }
    }

    #[must_use]
    pub fn bytes_received(&self) -> Option<u64> {
        match self.outcome {
            RequestOutcome::Completed { bytes_received, .. } => Some(bytes_received),
            RequestOutcome::Incomplete { .. } => None,
        }
    }

    /// Error kind for incomplete records.
    #[must_use]
    pub fn error_kind(&self) -> Option<&str> {
        match &self.outcome {
            RequestOutcome::Incomplete { error_kind, .. } => Some(error_kind),
            RequestOutcome::Completed { .. } => None,
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            RequestOutcome::Incomplete { error_message, .. } => Some(error_message),
            RequestOutcome::Completed { .. } => None,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RequestOutcome::Completed { .. })
    }
}
