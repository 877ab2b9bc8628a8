//! Per-span limits applied on the ingest path before a span is persisted.
//!
//! [`AttributeLimiter`] caps the rendered length of every attribute value,
//! [`ComponentRateLimiter`] bounds how many spans one instrumentation
//! component can emit per period, and [`SpanFilter`] lets the host rewrite or
//! reject spans.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model::span::{AttributeValue, Span};

pub const DEFAULT_MAX_ATTRIBUTE_LENGTH: usize = 4096;
pub const DEFAULT_COMPONENT_SPAN_LIMIT: usize = 100;
pub const DEFAULT_COMPONENT_LIMIT_PERIOD: Duration = Duration::from_secs(30);

/// Attribute key used to group spans for rate limiting.
pub const COMPONENT_ATTRIBUTE: &str = "component";

/// Host hook that may rewrite a span or return `None` to reject it.
pub type SpanFilter = Arc<dyn Fn(Span) -> Option<Span> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct AttributeLimiter {
    max_length: usize,
}

impl Default for AttributeLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTRIBUTE_LENGTH)
    }
}

impl AttributeLimiter {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Returns at most `max_length` characters of `value`, keeping the prefix.
    pub fn limit<'a>(&self, value: &'a str) -> Cow<'a, str> {
        match value.char_indices().nth(self.max_length) {
            Some((cut, _)) => Cow::Owned(value[..cut].to_string()),
            None => Cow::Borrowed(value),
        }
    }

    /// Caps every attribute value and event name of `span` in place.
    /// Non-string values whose rendering is too long become truncated strings.
    pub fn limit_span(&self, span: &mut Span) {
        for value in span.attributes.values_mut() {
            let rendered = value.to_string();
            if let Cow::Owned(capped) = self.limit(&rendered) {
                *value = AttributeValue::String(capped);
            }
        }
        for event in &mut span.events {
            if let Cow::Owned(capped) = self.limit(&event.name) {
                event.name = capped;
            }
        }
    }
}

/// Counts spans per `component` attribute and rejects any above the limit
/// until the current period elapses.
#[derive(Debug)]
pub struct ComponentRateLimiter {
    max_per_period: usize,
    period: Duration,
    counts: HashMap<String, usize>,
    next_reset: Option<Instant>,
}

impl Default for ComponentRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_COMPONENT_SPAN_LIMIT, DEFAULT_COMPONENT_LIMIT_PERIOD)
    }
}

impl ComponentRateLimiter {
    pub fn new(max_per_period: usize, period: Duration) -> Self {
        Self {
            max_per_period,
            period,
            counts: HashMap::new(),
            next_reset: None,
        }
    }

    /// Returns true if the span may pass, false if it should be dropped.
    pub fn admit(&mut self, span: &Span, now: Instant) -> bool {
        match self.next_reset {
            Some(reset) if now <= reset => {}
            _ => {
                self.counts.clear();
                self.next_reset = Some(now + self.period);
            }
        }

        let component = span
            .attribute(COMPONENT_ATTRIBUTE)
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let count = self.counts.entry(component).or_insert(0);
        *count += 1;
        *count <= self.max_per_period
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::ids::{SpanId, TraceId};
    use crate::model::span::{SpanEvent, SpanKind, SpanStatus};

    fn span_with_attrs(attrs: &[(&str, AttributeValue)]) -> Span {
        Span {
            trace_id: TraceId::from_bytes([7; 16]),
            span_id: SpanId::from_bytes([8; 8]),
            parent_span_id: None,
            name: "op".into(),
            kind: SpanKind::Internal,
            start_time: Utc::now(),
            end_time: None,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            events: vec![],
            status: SpanStatus::Unset,
        }
    }

    #[test]
    fn caps_long_values_to_exact_prefix() {
        let limiter = AttributeLimiter::default();
        let long = "x".repeat(10_000);
        let capped = limiter.limit(&long);
        assert_eq!(capped.len(), 4096);
        assert!(long.starts_with(capped.as_ref()));
    }

    #[test]
    fn short_values_are_borrowed() {
        let limiter = AttributeLimiter::new(8);
        assert!(matches!(limiter.limit("12345678"), Cow::Borrowed(_)));
        assert_eq!(limiter.limit("123456789"), "12345678");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let limiter = AttributeLimiter::new(3);
        assert_eq!(limiter.limit("ééééé"), "ééé");
    }

    #[test]
    fn limit_span_rewrites_every_attribute() {
        let limiter = AttributeLimiter::new(4);
        let mut span = span_with_attrs(&[
            ("a", AttributeValue::from("abcdefgh")),
            ("b", AttributeValue::from(123_456i64)),
            ("c", AttributeValue::from("ok")),
        ]);
        span.events.push(SpanEvent {
            name: "long-event-name".into(),
            timestamp: Utc::now(),
        });

        limiter.limit_span(&mut span);

        assert_eq!(span.attribute("a"), Some(&AttributeValue::from("abcd")));
        assert_eq!(span.attribute("b"), Some(&AttributeValue::from("1234")));
        assert_eq!(span.attribute("c"), Some(&AttributeValue::from("ok")));
        assert_eq!(span.events[0].name, "long");
    }

    #[test]
    fn rate_limits_per_component_and_resets() {
        let mut limiter = ComponentRateLimiter::new(2, Duration::from_secs(30));
        let ui = span_with_attrs(&[(COMPONENT_ATTRIBUTE, AttributeValue::from("ui"))]);
        let http = span_with_attrs(&[(COMPONENT_ATTRIBUTE, AttributeValue::from("http"))]);
        let start = Instant::now();

        assert!(limiter.admit(&ui, start));
        assert!(limiter.admit(&ui, start));
        assert!(!limiter.admit(&ui, start));
        assert!(limiter.admit(&http, start));

        let later = start + Duration::from_secs(31);
        assert!(limiter.admit(&ui, later));
    }

    #[test]
    fn spans_without_component_share_a_bucket() {
        let mut limiter = ComponentRateLimiter::new(1, Duration::from_secs(30));
        let bare = span_with_attrs(&[]);
        let now = Instant::now();
        assert!(limiter.admit(&bare, now));
        assert!(!limiter.admit(&bare, now));
    }
}
