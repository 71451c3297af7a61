//! Capture rules: which calls may have headers and bodies captured.

use std::collections::HashMap;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::record::{HttpMethod, NetworkRequestRecord};

/// Status value used to match rules against incomplete records.
pub const NETWORK_ERROR_STATUS: i32 = -1;

/// Policy deciding whether a call may have its payloads captured.
///
/// Answers are advisory and may be asked for several times per request.
pub trait CaptureRules: Send + Sync {
    fn should_capture_body(&self, url: &str, method: HttpMethod) -> bool;

    /// Called once per call whose record carries captured data.
    ///
    /// `request_url` is the URL the request went to, before any path override
    /// rewrote the reported one.
    fn on_captured(&self, _request_url: &str, _record: &NetworkRequestRecord) {}
}

/// Rules that never approve capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapture;

impl CaptureRules for NoCapture {
    fn should_capture_body(&self, _url: &str, _method: HttpMethod) -> bool {
        false
    }
}

/// One capture rule as delivered by remote configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRule {
    pub id: String,
    /// Pattern searched anywhere in the request URL
    pub url_regex: String,
    pub methods: Vec<HttpMethod>,
    /// Rule is expired unless this is positive
    pub expires_in_secs: u64,
    /// Number of captures this rule allows
    pub max_count: u32,
    /// Status codes that consume a capture; `-1` matches incomplete calls
    pub status_codes: Vec<i32>,
    /// Minimum call duration that consumes a capture, 0 for any
    pub min_duration_ms: u64,
}

impl Default for CaptureRule {
    fn default() -> Self {
        Self {
            id: String::new(),
            url_regex: String::new(),
            methods: Vec::new(),
            expires_in_secs: 1,
            max_count: 1,
            status_codes: vec![200],
            min_duration_ms: 0,
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    rule: CaptureRule,
    pattern: Regex,
}

impl CompiledRule {
    fn applies_to(&self, url: &str, method: HttpMethod) -> bool {
        self.rule.methods.contains(&method) && self.rule.expires_in_secs > 0 && self.pattern.is_match(url)
    }

    fn consumed_by(&self, status: i32, duration_ms: u64) -> bool {
        self.rule.status_codes.contains(&status)
            && (self.rule.min_duration_ms == 0 || duration_ms >= self.rule.min_duration_ms)
    }
}

/// Rule-based capture policy with per-rule remaining counts.
#[derive(Debug)]
pub struct CaptureRuleSet {
    rules: Vec<CompiledRule>,
    excluded_url_prefix: Option<String>,
    remaining: Mutex<HashMap<String, u32>>,
}

impl CaptureRuleSet {
    /// Compile a rule set.
    ///
    /// # Errors
    /// Returns [`RuleError::InvalidPattern`] if a rule's URL pattern does not compile.
    pub fn new(rules: &[CaptureRule], excluded_url_prefix: Option<String>) -> Result<Self, RuleError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.url_regex)
                    .map(|pattern| CompiledRule {
                        rule: rule.clone(),
                        pattern,
                    })
                    .map_err(|source| RuleError::InvalidPattern {
                        id: rule.id.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            excluded_url_prefix,
            remaining: Mutex::new(HashMap::new()),
        })
    }

    /// Captures left for a rule.
    #[must_use]
    pub fn remaining(&self, id: &str) -> Option<u32> {
        let remaining = self.remaining.lock();
        self.rules
            .iter()
            .find(|r| r.rule.id == id)
            .map(|r| remaining.get(id).copied().unwrap_or(r.rule.max_count))
    }

    fn is_excluded(&self, url: &str) -> bool {
        self.excluded_url_prefix.as_deref().is_some_and(|prefix| url.starts_with(prefix))
    }
}

impl CaptureRules for CaptureRuleSet {
    fn should_capture_body(&self, url: &str, method: HttpMethod) -> bool {
        if self.is_excluded(url) {
            return false;
        }
        let remaining = self.remaining.lock();
        self.rules.iter().any(|r| {
            r.applies_to(url, method) && remaining.get(&r.rule.id).copied().unwrap_or(r.rule.max_count) > 0
        })
    }

    fn on_captured(&self, request_url: &str, record: &NetworkRequestRecord) {
        if self.is_excluded(request_url) {
            return;
        }
        let status = record.status_code().map_or(NETWORK_ERROR_STATUS, i32::from);
        let duration = record.duration_ms();
        let mut remaining = self.remaining.lock();
        let consumed = self.rules.iter().find(|r| {
            r.applies_to(request_url, record.method())
                && remaining.get(&r.rule.id).copied().unwrap_or(r.rule.max_count) > 0
                && r.consumed_by(status, duration)
        });
        if let Some(rule) = consumed {
            let left = remaining.entry(rule.rule.id.clone()).or_insert(rule.rule.max_count);
            *left = left.saturating_sub(1);
            tracing::debug!(target: "netcap::rules", rule = %rule.rule.id, remaining = *left, "capture rule consumed");
        }
    }
}
