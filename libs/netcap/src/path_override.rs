//! Caller-supplied path overrides used to normalize reported URLs.
//!
//! A request may carry the [`PATH_OVERRIDE_HEADER`] header with a relative
//! path such as `/v1/users/{id}`. When valid, the reported URL uses that path
//! in place of the real one. The request itself is never changed.

use url::Url;

/// Header carrying the path override.
pub const PATH_OVERRIDE_HEADER: &str = "x-emb-path";

/// Longest accepted override, in characters.
pub const MAX_PATH_OVERRIDE_LEN: usize = 1024;

/// Whether the query string of the original URL survives the override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryHandling {
    Keep,
    Drop,
}

/// Check an override candidate.
///
/// Valid overrides are non-empty ASCII of at most [`MAX_PATH_OVERRIDE_LEN`]
/// characters, start with `/` and only use unreserved characters, sub-delims,
/// `:`, `@`, `/`, `%` and template braces.
#[must_use]
pub fn is_valid_path_override(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() <= MAX_PATH_OVERRIDE_LEN
        && candidate.is_ascii()
        && candidate.starts_with('/')
        && candidate.bytes().all(is_path_byte)
}

fn is_path_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.'
                | b'_'
                | b'~'
                | b'!'
                | b'$'
                | b'&'
                | b'\''
                | b'('
                | b')'
                | b'*'
                | b'+'
                | b','
                | b';'
                | b'='
                | b':'
                | b'@'
                | b'/'
                | b'%'
                | b'{'
                | b'}'
        )
}

/// Resolve the URL to report for a request.
///
/// Returns `original` unchanged when there is no candidate, the candidate is
/// invalid, or the original URL cannot be rebuilt. Never fails.
#[must_use]
pub fn resolve(original: &str, candidate: Option<&str>, query: QueryHandling) -> String {
    let Some(candidate) = candidate else {
        return original.to_owned();
    };
    if !is_valid_path_override(candidate) {
        tracing::debug!(target: "netcap::path_override", "ignoring invalid path override");
        return original.to_owned();
    }
    rebuild(original, candidate, query).unwrap_or_else(|| original.to_owned())
}

fn rebuild(original: &str, path: &str, query: QueryHandling) -> Option<String> {
    let url = Url::parse(original).ok()?;
    let host = url.host()?;
    let mut out = format!("{}://{host}", url.scheme());
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(path);
    if query == QueryHandling::Keep
        && let Some(q) = url.query()
    {
        out.push('?');
        out.push_str(q);
    }
    Some(out)
}
