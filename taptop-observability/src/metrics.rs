use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use taptop_core::Outcome;
use taptop_core::event::EventType;
use tracing::warn;

/// Engine metrics. All instruments are gated behind `enabled`.
///
/// When disabled no registry is created and every `record_*` call returns
/// immediately, so the ingest path pays nothing.
pub struct MetricsCollector {
    enabled: bool,
    registry: Option<Registry>,
    pub events_total: Option<IntCounterVec>,
    pub parse_errors_total: Option<IntCounter>,
    pub completed_requests_total: Option<IntCounterVec>,
    pub evictions_total: Option<IntCounterVec>,
    pub orphaned_completions_total: Option<IntCounter>,
    pub snapshots_published_total: Option<IntCounter>,
    pub stream_closes_total: Option<IntCounterVec>,
    pub stream_errors_total: Option<IntCounter>,
    pub pending_requests: Option<IntGauge>,
    pub top_rows: Option<IntGauge>,
}

impl MetricsCollector {
    /// Create a new collector. When `enabled = false`, everything is None.
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }

        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            Opts::new("events_total", "Tap events ingested").namespace("taptop"),
            &["kind"],
        )?;
        let parse_errors_total = IntCounter::with_opts(
            Opts::new("parse_errors_total", "Tap messages that failed to parse").namespace("taptop"),
        )?;
        let completed_requests_total = IntCounterVec::new(
            Opts::new("completed_requests_total", "Requests correlated to completion")
                .namespace("taptop"),
            &["outcome"],
        )?;
        let evictions_total = IntCounterVec::new(
            Opts::new("evictions_total", "Entries dropped for capacity").namespace("taptop"),
            &["store"],
        )?;
        let orphaned_completions_total = IntCounter::with_opts(
            Opts::new("orphaned_completions_total", "Completions without a request-init")
                .namespace("taptop"),
        )?;
        let snapshots_published_total = IntCounter::with_opts(
            Opts::new("snapshots_published_total", "Top snapshots published").namespace("taptop"),
        )?;
        let stream_closes_total = IntCounterVec::new(
            Opts::new("stream_closes_total", "Tap stream closures").namespace("taptop"),
            &["code"],
        )?;
        let stream_errors_total = IntCounter::with_opts(
            Opts::new("stream_errors_total", "Tap stream errors").namespace("taptop"),
        )?;
        let pending_requests = IntGauge::with_opts(
            Opts::new("pending_requests", "In-flight requests being correlated").namespace("taptop"),
        )?;
        let top_rows = IntGauge::with_opts(
            Opts::new("top_rows", "Aggregated top-route rows").namespace("taptop"),
        )?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(parse_errors_total.clone()))?;
        registry.register(Box::new(completed_requests_total.clone()))?;
        registry.register(Box::new(evictions_total.clone()))?;
        registry.register(Box::new(orphaned_completions_total.clone()))?;
        registry.register(Box::new(snapshots_published_total.clone()))?;
        registry.register(Box::new(stream_closes_total.clone()))?;
        registry.register(Box::new(stream_errors_total.clone()))?;
        registry.register(Box::new(pending_requests.clone()))?;
        registry.register(Box::new(top_rows.clone()))?;

        Ok(Self {
            enabled: true,
            registry: Some(registry),
            events_total: Some(events_total),
            parse_errors_total: Some(parse_errors_total),
            completed_requests_total: Some(completed_requests_total),
            evictions_total: Some(evictions_total),
            orphaned_completions_total: Some(orphaned_completions_total),
            snapshots_published_total: Some(snapshots_published_total),
            stream_closes_total: Some(stream_closes_total),
            stream_errors_total: Some(stream_errors_total),
            pending_requests: Some(pending_requests),
            top_rows: Some(top_rows),
        })
    }

    /// No-op collector.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            registry: None,
            events_total: None,
            parse_errors_total: None,
            completed_requests_total: None,
            evictions_total: None,
            orphaned_completions_total: None,
            snapshots_published_total: None,
            stream_closes_total: None,
            stream_errors_total: None,
            pending_requests: None,
            top_rows: None,
        }
    }

    #[inline]
    pub fn record_event(&self, kind: EventType) {
        if let Some(ref counter) = self.events_total {
            counter.with_label_values(&[kind.as_str()]).inc();
        }
    }

    #[inline]
    pub fn record_parse_error(&self) {
        if let Some(ref counter) = self.parse_errors_total {
            counter.inc();
        }
    }

    #[inline]
    pub fn record_completed(&self, outcome: Outcome) {
        if let Some(ref counter) = self.completed_requests_total {
            counter.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    /// Add newly observed evictions for `store` ("pending" or "top").
    pub fn record_evictions(&self, store: &str, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(ref counter) = self.evictions_total {
            counter.with_label_values(&[store]).inc_by(count);
        }
    }

    pub fn record_orphaned(&self, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(ref counter) = self.orphaned_completions_total {
            counter.inc_by(count);
        }
    }

    pub fn record_publish(&self) {
        if let Some(ref counter) = self.snapshots_published_total {
            counter.inc();
        }
    }

    pub fn record_close(&self, code: u16) {
        if let Some(ref counter) = self.stream_closes_total {
            let mut buf = itoa::Buffer::new();
            counter.with_label_values(&[buf.format(code)]).inc();
        }
    }

    pub fn record_stream_error(&self) {
        if let Some(ref counter) = self.stream_errors_total {
            counter.inc();
        }
    }

    pub fn set_store_sizes(&self, pending: usize, rows: usize) {
        if !self.enabled {
            return;
        }
        if let Some(ref gauge) = self.pending_requests {
            gauge.set(pending as i64);
        }
        if let Some(ref gauge) = self.top_rows {
            gauge.set(rows as i64);
        }
    }

    /// Render prometheus text exposition format.
    pub fn render(&self) -> String {
        let Some(ref registry) = self.registry else {
            return String::new();
        };
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Disabled collector ───────────────────────────────────────

    #[test]
    fn disabled_collector_has_no_instruments() {
        let mc = MetricsCollector::new(false).unwrap();
        assert!(!mc.is_enabled());
        assert!(mc.events_total.is_none());
        assert!(mc.pending_requests.is_none());
        assert_eq!(mc.render(), "");
    }

    #[test]
    fn disabled_collector_records_without_panicking() {
        let mc = MetricsCollector::disabled();
        mc.record_event(EventType::RequestInit);
        mc.record_parse_error();
        mc.record_completed(Outcome::Failure);
        mc.record_evictions("pending", 3);
        mc.record_close(1011);
        mc.set_store_sizes(10, 4);
    }

    // ── Enabled collector ────────────────────────────────────────

    #[test]
    fn events_are_counted_per_kind() {
        let mc = MetricsCollector::new(true).unwrap();
        mc.record_event(EventType::RequestInit);
        mc.record_event(EventType::RequestInit);
        mc.record_event(EventType::ResponseEnd);

        let counter = mc.events_total.as_ref().unwrap();
        assert_eq!(counter.with_label_values(&["request_init"]).get(), 2);
        assert_eq!(counter.with_label_values(&["response_end"]).get(), 1);
    }

    #[test]
    fn close_codes_become_labels() {
        let mc = MetricsCollector::new(true).unwrap();
        mc.record_close(1006);
        mc.record_close(1006);
        let counter = mc.stream_closes_total.as_ref().unwrap();
        assert_eq!(counter.with_label_values(&["1006"]).get(), 2);
    }

    #[test]
    fn evictions_accumulate_by_store() {
        let mc = MetricsCollector::new(true).unwrap();
        mc.record_evictions("top", 2);
        mc.record_evictions("top", 0);
        mc.record_evictions("pending", 1);
        let counter = mc.evictions_total.as_ref().unwrap();
        assert_eq!(counter.with_label_values(&["top"]).get(), 2);
        assert_eq!(counter.with_label_values(&["pending"]).get(), 1);
    }

    #[test]
    fn store_gauges_track_latest_sizes() {
        let mc = MetricsCollector::new(true).unwrap();
        mc.set_store_sizes(12, 5);
        mc.set_store_sizes(3, 6);
        assert_eq!(mc.pending_requests.as_ref().unwrap().get(), 3);
        assert_eq!(mc.top_rows.as_ref().unwrap().get(), 6);
    }

    #[test]
    fn render_returns_prometheus_text() {
        let mc = MetricsCollector::new(true).unwrap();
        mc.record_completed(Outcome::Success);
        mc.record_publish();
        let output = mc.render();
        assert!(output.contains("taptop_completed_requests_total"));
        assert!(output.contains("taptop_snapshots_published_total 1"));
    }

    #[test]
    fn render_includes_labelled_series() {
        let mc = MetricsCollector::new(true).unwrap();
        mc.record_event(EventType::ResponseEnd);
        mc.record_close(1011);
        let output = mc.render();
        assert!(output.contains("taptop_events_total{kind=\"response_end\"} 1"));
        assert!(output.contains("taptop_stream_closes_total{code=\"1011\"} 1"));
    }
}
