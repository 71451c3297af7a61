use serde::{Deserialize, Serialize};

use crate::rules::CaptureRule;

/// Default header read for a caller-supplied correlation id.
pub const DEFAULT_TRACE_ID_HEADER: &str = "x-emb-trace-id";

/// Default bound on buffered body bytes kept for capture (1 MiB).
pub const DEFAULT_MAX_CAPTURED_BODY_BYTES: usize = 1024 * 1024;

/// Network capture configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkCaptureConfig {
    /// Request header holding the caller's trace id (default: `x-emb-trace-id`)
    pub trace_id_header: String,

    /// Generate and forward a W3C `traceparent` when the request has none (default: false)
    pub span_forwarding: bool,

    /// Count request and response bytes through wrapped streams (default: false)
    ///
    /// When enabled, the connection layer asks for gzip itself if the caller
    /// expressed no encoding preference and decompresses transparently so the
    /// uncompressed size can be reported.
    pub request_size_capture: bool,

    /// Upper bound on body bytes buffered for capture (default: 1 MiB)
    ///
    /// Counting is unaffected; only the captured copy is truncated.
    pub max_captured_body_bytes: usize,

    /// Rules deciding which calls may have headers and bodies captured
    pub capture_rules: Vec<CaptureRule>,

    /// URLs under this prefix never have bodies captured
    pub excluded_url_prefix: Option<String>,
}

impl Default for NetworkCaptureConfig {
    fn default() -> Self {
        Self {
            trace_id_header: DEFAULT_TRACE_ID_HEADER.to_owned(),
            span_forwarding: false,
            request_size_capture: false,
            max_captured_body_bytes: DEFAULT_MAX_CAPTURED_BODY_BYTES,
            capture_rules: Vec::new(),
            excluded_url_prefix: None,
        }
    }
}
