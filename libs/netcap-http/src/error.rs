use std::error::Error as StdError;

use netcap::BoxError;
use thiserror::Error;

/// Failure carrying the path a call should be reported under.
///
/// Layers below [`ApplicationCaptureLayer`](crate::ApplicationCaptureLayer)
/// wrap a failure in this error to have it reported with `path` (for example
/// `/users/{id}`) in place of the request's own path. The error reaches the
/// caller unchanged.
#[derive(Error, Debug)]
#[error("request to '{path}' failed: {source}")]
pub struct PathOverrideError {
    path: String,
    #[source]
    source: BoxError,
}

impl PathOverrideError {
    #[must_use]
    pub fn new(path: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The failure that ended the call.
    #[must_use]
    pub fn cause(&self) -> &(dyn StdError + 'static) {
        &*self.source
    }

    #[must_use]
    pub fn into_source(self) -> BoxError {
        self.source
    }

    /// First path override found in `err`'s source chain.
    #[must_use]
    pub fn find<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Self> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(found) = e.downcast_ref::<Self>() {
                return Some(found);
            }
            current = e.source();
        }
        None
    }
}
