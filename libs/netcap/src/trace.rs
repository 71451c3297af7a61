//! W3C trace-parent generation for forwarded spans.

use rand::Rng;

/// Header carrying the W3C trace-parent.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Source of fresh trace-parent values.
pub trait TraceparentSource: Send + Sync {
    fn generate(&self) -> String;
}

/// Random `00-<trace id>-<span id>-01` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTraceparent;

impl TraceparentSource for RandomTraceparent {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        let trace_id: u128 = loop {
            let id = rng.random::<u128>();
            if id != 0 {
                break id;
            }
        };
        let span_id: u64 = loop {
            let id = rng.random::<u64>();
            if id != 0 {
                break id;
            }
        };
        format!("00-{trace_id:032x}-{span_id:016x}-01")
    }
}

/// Whether a value has the `version-traceid-spanid-flags` shape.
#[must_use]
pub fn is_valid_traceparent(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    let [version, trace_id, span_id, flags] = parts.as_slice() else {
        return false;
    };
    let hex = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    hex(version, 2)
        && *version != "ff"
        && hex(trace_id, 32)
        && trace_id.bytes().any(|b| b != b'0')
        && hex(span_id, 16)
        && span_id.bytes().any(|b| b != b'0')
        && hex(flags, 2)
}
