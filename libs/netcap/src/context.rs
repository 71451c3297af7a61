//! Handle passed into every wrapper and layer.
//!
//! Bundles configuration with the external collaborators (clock, delivery
//! sink, capture rules, trace-parent source) so nothing reaches for a global.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::clock::{NormalizedClock, SdkClock};
use crate::config::NetworkCaptureConfig;
use crate::error::RuleError;
use crate::record::{HttpMethod, NetworkRequestRecord};
use crate::rules::{CaptureRuleSet, CaptureRules};
use crate::sink::{DeliverySink, InMemorySink};
use crate::trace::{RandomTraceparent, TraceparentSource};

struct Inner {
    config: NetworkCaptureConfig,
    clock: Arc<dyn SdkClock>,
    sink: Arc<dyn DeliverySink>,
    rules: Arc<dyn CaptureRules>,
    traceparent: Arc<dyn TraceparentSource>,
    enabled: AtomicBool,
}

/// Shared capture context. Cheap to clone.
#[derive(Clone)]
pub struct NetworkContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkContext")
            .field("config", &self.inner.config)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl NetworkContext {
    #[must_use]
    pub fn builder() -> NetworkContextBuilder {
        NetworkContextBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &NetworkCaptureConfig {
        &self.inner.config
    }

    /// Whether newly created wrappers should observe and report.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Toggle reporting for wrappers created from now on.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Current SDK time in milliseconds.
    #[must_use]
    pub fn now_millis(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    #[must_use]
    pub fn should_capture_body(&self, url: &str, method: HttpMethod) -> bool {
        self.inner.rules.should_capture_body(url, method)
    }

    #[must_use]
    pub fn generate_traceparent(&self) -> String {
        self.inner.traceparent.generate()
    }

    /// Hand a record to the delivery sink. Failures are logged, never returned.
    ///
    /// `request_url` is where the request actually went; capture rules are
    /// charged against it rather than the reported, possibly overridden, URL.
    pub fn report(&self, request_url: &str, record: NetworkRequestRecord) {
        self.note_capture(request_url, &record);
        if let Err(e) = self.inner.sink.record(record) {
            tracing::warn!(target: "netcap::context", error = %e, "failed to deliver network request record");
        }
    }

    /// Like [`report`](Self::report), replacing any earlier record with `key`.
    pub fn report_deduplicated(&self, key: &str, request_url: &str, record: NetworkRequestRecord) {
        self.note_capture(request_url, &record);
        self.deliver_deduplicated(key, record);
    }

    /// Replace the record already reported under `key`.
    ///
    /// Capture rules are not charged again; the call was accounted for when
    /// it was first reported.
    pub fn replace_deduplicated(&self, key: &str, record: NetworkRequestRecord) {
        self.deliver_deduplicated(key, record);
    }

    fn deliver_deduplicated(&self, key: &str, record: NetworkRequestRecord) {
        if let Err(e) = self.inner.sink.record_deduplicated(key, record) {
            tracing::warn!(target: "netcap::context", key, error = %e, "failed to deliver network request record");
        }
    }

    fn note_capture(&self, request_url: &str, record: &NetworkRequestRecord) {
        if record.capture_data().is_some() {
            self.inner.rules.on_captured(request_url, record);
        }
    }
}

/// Builder for [`NetworkContext`].
///
/// Unset collaborators fall back to [`NormalizedClock`], [`InMemorySink`],
/// a [`CaptureRuleSet`] built from the configuration and [`RandomTraceparent`].
#[derive(Default)]
pub struct NetworkContextBuilder {
    config: NetworkCaptureConfig,
    clock: Option<Arc<dyn SdkClock>>,
    sink: Option<Arc<dyn DeliverySink>>,
    rules: Option<Arc<dyn CaptureRules>>,
    traceparent: Option<Arc<dyn TraceparentSource>>,
    disabled: bool,
}

impl NetworkContextBuilder {
    #[must_use]
    pub fn config(mut self, config: NetworkCaptureConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn SdkClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn capture_rules(mut self, rules: Arc<dyn CaptureRules>) -> Self {
        self.rules = Some(rules);
        self
    }

    #[must_use]
    pub fn traceparent_source(mut self, source: Arc<dyn TraceparentSource>) -> Self {
        self.traceparent = Some(source);
        self
    }

    /// Start with reporting switched off.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Build the context.
    ///
    /// # Errors
    /// Returns [`RuleError`] if no rules were supplied and a configured
    /// capture rule does not compile.
    pub fn build(self) -> Result<NetworkContext, RuleError> {
        let rules = match self.rules {
            Some(rules) => rules,
            None => Arc::new(CaptureRuleSet::new(
                &self.config.capture_rules,
                self.config.excluded_url_prefix.clone(),
            )?),
        };
        Ok(NetworkContext {
            inner: Arc::new(Inner {
                clock: self.clock.unwrap_or_else(|| Arc::new(NormalizedClock::new())),
                sink: self.sink.unwrap_or_else(|| Arc::new(InMemorySink::new())),
                traceparent: self.traceparent.unwrap_or_else(|| Arc::new(RandomTraceparent)),
                rules,
                enabled: AtomicBool::new(!self.disabled),
                config: self.config,
            }),
        })
    }
}
