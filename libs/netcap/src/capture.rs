//! Captured request/response payloads and their step-wise assembly.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Flattened header map: one string per header name.
pub type CapturedHeaders = BTreeMap<String, String>;

const PARTIAL_CAPTURE_PREFIX: &str = "There were errors in capturing the following part(s) of the network call: ";

/// The five independently capturable parts of a call, in acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapturePart {
    ResponseHeaders,
    RequestHeaders,
    QueryParameters,
    RequestBody,
    ResponseBody,
}

impl CapturePart {
    pub const ALL: [Self; 5] = [
        Self::ResponseHeaders,
        Self::RequestHeaders,
        Self::QueryParameters,
        Self::RequestBody,
        Self::ResponseBody,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ResponseHeaders => "Response Headers",
            Self::RequestHeaders => "Request Headers",
            Self::QueryParameters => "Query Parameters",
            Self::RequestBody => "Request Body",
            Self::ResponseBody => "Response Body",
        }
    }
}

impl fmt::Display for CapturePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Headers and bodies captured for a call approved by capture rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkCaptureData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<CapturedHeaders>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_body")]
    pub request_body: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<CapturedHeaders>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_body")]
    pub response_body: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl NetworkCaptureData {
    /// Fill in the response body once it has been read.
    ///
    /// Ignored when an earlier part already failed, since the error message
    /// reports the body as missing.
    #[must_use]
    pub fn with_response_body(mut self, body: Vec<u8>) -> Self {
        if self.error_message.is_none() && self.response_body.is_none() {
            self.response_body = Some(body);
        }
        self
    }

    /// Mark the response body as not captured.
    #[must_use]
    pub fn with_response_body_failure(mut self) -> Self {
        if self.error_message.is_none() {
            self.error_message = Some(partial_capture_message(&[CapturePart::ResponseBody]));
        }
        self
    }

    /// Whether every part was acquired.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error_message.is_none()
    }
}

#[allow(clippy::ref_option)]
fn serialize_body<S: Serializer>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match body {
        Some(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

/// Error message naming the parts that could not be captured.
#[must_use]
pub fn partial_capture_message(missing: &[CapturePart]) -> String {
    let parts: Vec<String> = missing.iter().map(|p| format!("'{p}'")).collect();
    format!("{PARTIAL_CAPTURE_PREFIX}{}", parts.join(", "))
}

/// Acquires capture parts in order and stops at the first failure.
///
/// Parts acquired before the failure are kept; the resulting error message
/// lists the failed part and every part after it.
#[derive(Debug, Default)]
pub struct CaptureAssembler {
    data: NetworkCaptureData,
    failed_at: Option<CapturePart>,
}

impl CaptureAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one acquisition step.
    ///
    /// Skipped once any earlier step has failed.
    pub fn step<E, F>(&mut self, part: CapturePart, acquire: F)
    where
        E: fmt::Display,
        F: FnOnce(&mut NetworkCaptureData) -> Result<(), E>,
    {
        if self.failed_at.is_some() {
            return;
        }
        if let Err(e) = acquire(&mut self.data) {
            tracing::debug!(target: "netcap::capture", part = part.label(), error = %e, "capture part unavailable");
            self.failed_at = Some(part);
        }
    }

    #[must_use]
    pub fn failed_at(&self) -> Option<CapturePart> {
        self.failed_at
    }

    /// Finish assembly.
    #[must_use]
    pub fn finish(self) -> NetworkCaptureData {
        let mut data = self.data;
        if let Some(failed) = self.failed_at {
            let missing: Vec<CapturePart> = CapturePart::ALL.into_iter().filter(|p| *p >= failed).collect();
            data.error_message = Some(partial_capture_message(&missing));
        }
        data
    }
}

/// A header value could not be represented as text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("header '{0}' has a non-text value")]
pub struct InvalidHeaderText(pub String);

/// Flatten an `http` header map, concatenating repeated values in order.
///
/// # Errors
/// Returns [`InvalidHeaderText`] if any value is not valid UTF-8.
pub fn flatten_header_map(headers: &http::HeaderMap) -> Result<CapturedHeaders, InvalidHeaderText> {
    let mut out = CapturedHeaders::new();
    for (name, value) in headers {
        let text = std::str::from_utf8(value.as_bytes()).map_err(|_| InvalidHeaderText(name.as_str().to_owned()))?;
        out.entry(name.as_str().to_owned()).or_default().push_str(text);
    }
    Ok(out)
}

/// Flatten a name to values listing, concatenating values per name.
#[must_use]
pub fn flatten_header_lists<'a, I, V>(headers: I) -> CapturedHeaders
where
    I: IntoIterator<Item = (&'a String, V)>,
    V: IntoIterator<Item = &'a String>,
{
    headers
        .into_iter()
        .map(|(name, values)| (name.clone(), values.into_iter().map(String::as_str).collect::<String>()))
        .collect()
}
