use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::config::Config;
use beacon_core::limits::{AttributeLimiter, ComponentRateLimiter, SpanFilter};
use beacon_core::model::span::Span;
use beacon_core::sampling::{RotatingSession, SessionProvider, SessionSampler};
use beacon_core::wire::encode_span;
use beacon_store::SpanStore;
use serde::Serialize;

/// Per-batch accounting of where each span went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub sampled_out: usize,
    pub filtered: usize,
    pub rate_limited: usize,
    pub encode_failed: usize,
    pub stored: usize,
    /// Spans lost to a failed insert.
    pub lost: usize,
    /// Rows the post-insert truncation check removed.
    pub truncated: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.received += other.received;
        self.sampled_out += other.sampled_out;
        self.filtered += other.filtered;
        self.rate_limited += other.rate_limited;
        self.encode_failed += other.encode_failed;
        self.stored += other.stored;
        self.lost += other.lost;
        self.truncated += other.truncated;
    }
}

/// When the store size is checked against its budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruncationPolicy {
    pub max_store_bytes: u64,
    /// Spans stored between checks.
    pub checkpoint: u64,
    pub interval: Duration,
}

impl TruncationPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_store_bytes: cfg.max_store_bytes,
            checkpoint: cfg.truncation_checkpoint.max(1),
            interval: cfg.truncation_check_interval,
        }
    }
}

/// Turns finished spans into persisted rows.
///
/// A batch goes through the session sampler, the component rate limiter, the
/// host filter and the attribute limiter, in that order, and is then encoded
/// and inserted in one transaction. Nothing here returns an error to the
/// producer; faults are logged and counted in the [`IngestReport`].
pub struct Ingestor {
    store: SpanStore,
    sampler: SessionSampler,
    sessions: Arc<dyn SessionProvider>,
    filter: Option<SpanFilter>,
    rate_limiter: ComponentRateLimiter,
    limiter: AttributeLimiter,
    policy: TruncationPolicy,
    stored_since_check: u64,
    last_check: Option<Instant>,
}

impl Ingestor {
    pub fn new(store: SpanStore, cfg: &Config) -> Self {
        Self {
            store,
            sampler: SessionSampler::new(cfg.session_sample_ratio),
            sessions: Arc::new(RotatingSession::new(
                cfg.session_max_age,
                cfg.session_inactivity,
            )),
            filter: None,
            rate_limiter: ComponentRateLimiter::new(
                cfg.component_span_limit,
                cfg.component_limit_period,
            ),
            limiter: AttributeLimiter::new(cfg.max_attribute_length),
            policy: TruncationPolicy::from_config(cfg),
            stored_since_check: 0,
            last_check: None,
        }
    }

    pub fn with_session_provider(mut self, sessions: Arc<dyn SessionProvider>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_sampler(mut self, sampler: SessionSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_filter(mut self, filter: SpanFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_truncation_policy(mut self, policy: TruncationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &SpanStore {
        &self.store
    }

    pub fn sampler(&self) -> &SessionSampler {
        &self.sampler
    }

    pub fn ingest(&mut self, span: Span) -> IngestReport {
        self.ingest_batch(vec![span])
    }

    pub fn ingest_batch(&mut self, spans: Vec<Span>) -> IngestReport {
        self.ingest_batch_at(spans, Instant::now())
    }

    fn ingest_batch_at(&mut self, spans: Vec<Span>, now: Instant) -> IngestReport {
        let mut report = IngestReport {
            received: spans.len(),
            ..IngestReport::default()
        };
        if spans.is_empty() {
            return report;
        }

        let session_id = self.sessions.session_id();
        let explicit = self.sessions.sampling_decision();
        if !self.sampler.should_sample(&session_id, explicit) {
            report.sampled_out = spans.len();
            return report;
        }

        let mut payloads = Vec::with_capacity(spans.len());
        for span in spans {
            // The component budget is spent before the host filter sees the span.
            if !self.rate_limiter.admit(&span, now) {
                report.rate_limited += 1;
                continue;
            }
            let mut span = match &self.filter {
                Some(filter) => match filter(span) {
                    Some(span) => span,
                    None => {
                        report.filtered += 1;
                        continue;
                    }
                },
                None => span,
            };
            self.limiter.limit_span(&mut span);
            match encode_span(&span) {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    tracing::warn!(error = ?e, span = %span.span_id, "dropping span that failed to encode");
                    report.encode_failed += 1;
                }
            }
        }

        if report.rate_limited > 0 {
            tracing::debug!(dropped = report.rate_limited, "component span limit reached");
        }
        if payloads.is_empty() {
            return report;
        }

        match self.store.insert(&payloads) {
            Ok(()) => {
                report.stored = payloads.len();
                report.truncated = self.check_truncation(payloads.len() as u64, now);
            }
            Err(e) => {
                tracing::warn!(error = ?e, spans = payloads.len(), "failed to persist span batch");
                report.lost = payloads.len();
            }
        }
        report
    }

    fn check_truncation(&mut self, stored: u64, now: Instant) -> usize {
        self.stored_since_check += stored;
        let due = match self.last_check {
            None => true,
            Some(last) => {
                self.stored_since_check >= self.policy.checkpoint
                    || now.saturating_duration_since(last) >= self.policy.interval
            }
        };
        if !due {
            return 0;
        }

        self.stored_since_check = 0;
        self.last_check = Some(now);
        match self.store.truncate_if_over(self.policy.max_store_bytes) {
            Ok(removed) => removed.unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = ?e, "store truncation check failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use beacon_core::model::span::AttributeValue;
    use beacon_core::sampling::{RandomSource, StaticSession};
    use testkit::{sample_span, sample_spans, span_with_attr};

    use super::*;

    struct Fixed(f64);

    impl RandomSource for Fixed {
        fn next_unit(&mut self) -> f64 {
            self.0
        }
    }

    fn ingestor(cfg: &Config) -> Ingestor {
        Ingestor::new(SpanStore::open_in_memory().unwrap(), cfg).with_session_provider(Arc::new(
            StaticSession {
                id: "s1".to_string(),
                decision: None,
            },
        ))
    }

    #[test]
    fn stores_every_span_by_default() {
        let mut ingestor = ingestor(&Config::default());
        let report = ingestor.ingest_batch(sample_spans(5));
        assert_eq!(report.received, 5);
        assert_eq!(report.stored, 5);
        assert_eq!(ingestor.store().count().unwrap(), 5);
    }

    #[test]
    fn sampled_out_session_drops_whole_batch() {
        let cfg = Config {
            session_sample_ratio: 0.5,
            ..Config::default()
        };
        let mut ingestor = ingestor(&cfg).with_sampler(SessionSampler::with_random(
            0.5,
            Box::new(Fixed(0.9)),
        ));

        let report = ingestor.ingest_batch(sample_spans(3));
        assert_eq!(report.sampled_out, 3);
        assert_eq!(ingestor.store().count().unwrap(), 0);
    }

    #[test]
    fn explicit_decision_beats_ratio() {
        let cfg = Config {
            session_sample_ratio: 0.0,
            ..Config::default()
        };
        let mut ingestor = Ingestor::new(SpanStore::open_in_memory().unwrap(), &cfg)
            .with_session_provider(Arc::new(StaticSession {
                id: "forced".to_string(),
                decision: Some(true),
            }));

        assert_eq!(ingestor.ingest(sample_span("GET /", 0)).stored, 1);
    }

    #[test]
    fn filter_can_drop_and_rewrite() {
        let filter: SpanFilter = Arc::new(|mut span: Span| {
            if span.name.contains("health") {
                return None;
            }
            span.name = span.name.to_uppercase();
            Some(span)
        });
        let mut ingestor = ingestor(&Config::default()).with_filter(filter);

        let report = ingestor.ingest_batch(vec![
            sample_span("GET /health", 0),
            sample_span("get /orders", 10),
        ]);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.stored, 1);

        let rows = ingestor.store().fetch_oldest(10).unwrap();
        assert!(rows[0].payload.contains("\"name\":\"GET /ORDERS\""));
    }

    #[test]
    fn component_limit_applies_per_component() {
        let cfg = Config {
            component_span_limit: 2,
            ..Config::default()
        };
        let mut ingestor = ingestor(&cfg);
        let spans: Vec<Span> = (0..4)
            .map(|i| span_with_attr(&format!("q{i}"), "component", "db"))
            .chain(std::iter::once(span_with_attr("x", "component", "http")))
            .collect();

        let report = ingestor.ingest_batch(spans);
        assert_eq!(report.rate_limited, 2);
        assert_eq!(report.stored, 3);
    }

    #[test]
    fn filtered_spans_still_count_against_component_limit() {
        let cfg = Config {
            component_span_limit: 2,
            ..Config::default()
        };
        let filter: SpanFilter = Arc::new(|span: Span| (span.name != "q0").then_some(span));
        let mut ingestor = ingestor(&cfg).with_filter(filter);
        let spans: Vec<Span> = (0..3)
            .map(|i| span_with_attr(&format!("q{i}"), "component", "db"))
            .collect();

        let report = ingestor.ingest_batch(spans);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.rate_limited, 1);
        assert_eq!(report.stored, 1);
        let rows = ingestor.store().fetch_oldest(10).unwrap();
        assert!(rows[0].payload.contains("\"name\":\"q1\""));
    }

    #[test]
    fn attributes_are_capped_before_encoding() {
        let cfg = Config {
            max_attribute_length: 8,
            ..Config::default()
        };
        let mut ingestor = ingestor(&cfg);
        ingestor.ingest(span_with_attr("q", "db.statement", "SELECT * FROM t"));

        let rows = ingestor.store().fetch_oldest(1).unwrap();
        assert!(rows[0].payload.contains("\"db.statement\":\"SELECT *\""));
    }

    #[test]
    fn truncation_runs_on_first_insert_and_checkpoints() {
        let mut ingestor = ingestor(&Config::default()).with_truncation_policy(TruncationPolicy {
            max_store_bytes: 0,
            checkpoint: 10,
            interval: Duration::from_secs(3600),
        });
        let t0 = Instant::now();

        // First insert is always checked: 5 rows over a zero budget lose one.
        let report = ingestor.ingest_batch_at(sample_spans(5), t0);
        assert_eq!(report.truncated, 1);

        // Below the checkpoint nothing is checked.
        let report = ingestor.ingest_batch_at(sample_spans(5), t0);
        assert_eq!(report.truncated, 0);
        assert_eq!(ingestor.store().count().unwrap(), 9);

        // Crossing it triggers a check and resets the counter.
        let report = ingestor.ingest_batch_at(sample_spans(6), t0);
        assert_eq!(report.truncated, 3);
        assert_eq!(ingestor.store().count().unwrap(), 12);
    }

    #[test]
    fn truncation_also_runs_after_interval() {
        let mut ingestor = ingestor(&Config::default()).with_truncation_policy(TruncationPolicy {
            max_store_bytes: 0,
            checkpoint: 1_000,
            interval: Duration::from_secs(60),
        });
        let t0 = Instant::now();

        ingestor.ingest_batch_at(sample_spans(4), t0);
        assert_eq!(ingestor.store().count().unwrap(), 4);

        let report = ingestor.ingest_batch_at(sample_spans(1), t0 + Duration::from_secs(61));
        assert_eq!(report.truncated, 1);
        assert_eq!(ingestor.store().count().unwrap(), 4);
    }

    #[test]
    fn non_string_attribute_survives_encoding() {
        let mut ingestor = ingestor(&Config::default());
        ingestor.ingest(span_with_attr("q", "http.status_code", AttributeValue::Int(503)));
        let rows = ingestor.store().fetch_oldest(1).unwrap();
        assert!(rows[0].payload.contains("\"http.status_code\":\"503\""));
    }
}
