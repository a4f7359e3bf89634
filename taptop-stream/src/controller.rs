use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taptop_core::config::{TapConfig, TopConfig};
use taptop_core::{Clock, TapError, parse_event};
use taptop_engine::{
    AggregationSession, DEFAULT_PUBLISH_INTERVAL, NeighborObserver, NeighborSet, SessionStats,
    TopSnapshot,
};
use taptop_observability::MetricsCollector;
use tracing::{debug, error, info, trace, warn};

use crate::status::{ErrorBanner, TapStatus};
use crate::subscription::SubscriptionRequest;

/// Close code of a deliberate shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Everything that can happen to a tap stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamInput {
    Start,
    Opened,
    Message,
    Closed,
    Error,
    Stop,
}

impl StreamState {
    /// Transition table. `None` means the input is ignored in this state.
    pub fn next(self, input: StreamInput) -> Option<StreamState> {
        use StreamInput as I;
        use StreamState as S;
        match (self, input) {
            (S::Idle | S::Closed, I::Start) => Some(S::Connecting),
            (S::Connecting, I::Opened) => Some(S::Open),
            (S::Open, I::Message) => Some(S::Open),
            (S::Connecting | S::Open, I::Closed) => Some(S::Closed),
            (S::Connecting | S::Open, I::Error) => Some(self),
            (_, I::Stop) => Some(S::Closed),
            _ => None,
        }
    }

    /// True while a socket may be attached.
    pub fn is_live(self) -> bool {
        matches!(self, StreamState::Connecting | StreamState::Open)
    }
}

/// Drives one tap stream from start to close and owns its aggregation state.
///
/// Socket callbacks map onto the methods here. Nothing in this type touches
/// the network; the driver feeds it and sends whatever it returns.
pub struct StreamLifecycleController<N: NeighborObserver = NeighborSet> {
    tap: TapConfig,
    limits: TopConfig,
    publish_interval: Duration,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    neighbors: N,
    state: StreamState,
    session: Option<AggregationSession>,
    error: Option<TapError>,
    last_parse_error: Option<String>,
    stats: SessionStats,
    latest: Option<TopSnapshot>,
}

impl<N: NeighborObserver> StreamLifecycleController<N> {
    pub fn new(
        tap: TapConfig,
        limits: TopConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        neighbors: N,
    ) -> Self {
        Self {
            tap,
            limits,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            clock,
            metrics,
            neighbors,
            state: StreamState::Idle,
            session: None,
            error: None,
            last_parse_error: None,
            stats: SessionStats::default(),
            latest: None,
        }
    }

    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    fn transition(&mut self, input: StreamInput) -> bool {
        match self.state.next(input) {
            Some(next) => {
                if next != self.state {
                    debug!(from = ?self.state, to = ?next, ?input, "Tap stream transition");
                }
                self.state = next;
                true
            }
            None => {
                trace!(state = ?self.state, ?input, "Ignoring tap stream input");
                false
            }
        }
    }

    /// Begin a new stream with empty stores. Returns false when a stream is
    /// already connecting or open.
    pub fn start(&mut self) -> bool {
        if !self.transition(StreamInput::Start) {
            return false;
        }
        self.session = Some(AggregationSession::new(&self.limits, self.publish_interval));
        self.stats = SessionStats::default();
        self.last_parse_error = None;
        self.latest = None;
        self.metrics.set_store_sizes(0, 0);
        info!(resource = %self.tap.resource, "Tap stream starting");
        true
    }

    /// The socket is open. Returns the subscription request to send.
    pub fn on_open(&mut self) -> Option<String> {
        if !self.transition(StreamInput::Opened) {
            return None;
        }
        self.error = None;
        match SubscriptionRequest::from_config(&self.tap).to_json() {
            Ok(request) => {
                info!(resource = %self.tap.resource, "Tap stream open");
                Some(request)
            }
            Err(e) => {
                error!(error = %e, "Failed to encode tap subscription");
                self.error = Some(TapError::Serde(e));
                None
            }
        }
    }

    /// Feed one raw stream message through parse, correlation and folding.
    pub fn on_message(&mut self, raw: &str) {
        if !self.transition(StreamInput::Message) {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let now = self.clock.now();

        match parse_event(raw, now) {
            Ok(event) => {
                self.metrics.record_event(event.event_type());
                if let Some(outcome) = session.ingest(event, now, &mut self.neighbors) {
                    self.metrics.record_completed(outcome);
                }
            }
            Err(e) => {
                warn!(error = %e, "Dropping unparseable tap message");
                session.record_parse_error();
                self.metrics.record_parse_error();
                self.last_parse_error = Some(e.to_string());
            }
        }

        let stats = session.stats();
        self.metrics
            .record_evictions("pending", stats.pending_evicted - self.stats.pending_evicted);
        self.metrics
            .record_evictions("top", stats.rows_evicted - self.stats.rows_evicted);
        self.metrics.record_orphaned(stats.orphaned - self.stats.orphaned);
        self.metrics
            .set_store_sizes(session.pending().len(), session.top().len());
        self.stats = stats;
    }

    /// The socket closed. Flushes any pending publish, then drops the session.
    pub fn on_close(&mut self, code: u16, reason: &str, was_clean: bool) {
        if !self.transition(StreamInput::Closed) {
            return;
        }
        self.metrics.record_close(code);

        if was_clean || code == CLOSE_NORMAL || code == CLOSE_ABNORMAL {
            info!(code, reason, "Tap stream closed");
        } else {
            let err = TapError::UncleanClose {
                code,
                reason: reason.to_string(),
            };
            warn!(code, reason, "{}", err);
            self.error = Some(err);
        }

        if let Some(mut session) = self.session.take() {
            if let Some(snapshot) = session.flush() {
                self.metrics.record_publish();
                self.latest = Some(snapshot);
            }
            session.shutdown();
            self.stats = session.stats();
        }
    }

    /// Transport error. The state is left alone; a close follows.
    pub fn on_error(&mut self, message: &str) {
        if !self.transition(StreamInput::Error) {
            return;
        }
        let err = TapError::Connection(message.to_string());
        warn!(error = message, "Tap stream error");
        self.metrics.record_stream_error();
        self.error = Some(err);
    }

    /// Stop the stream. Returns true when a normal closure must be sent on
    /// the socket. Calling it again does nothing.
    pub fn stop(&mut self) -> bool {
        let was_live = self.state.is_live();
        self.transition(StreamInput::Stop);
        if let Some(mut session) = self.session.take() {
            session.shutdown();
            self.stats = session.stats();
            info!(
                events = self.stats.events,
                completed = self.stats.completed,
                "Tap stream stopped"
            );
        }
        was_live
    }

    /// Publish if the scheduler deadline has passed.
    pub fn poll_publish(&mut self) -> Option<&TopSnapshot> {
        let session = self.session.as_mut()?;
        let snapshot = session.poll_publish(self.clock.now())?;
        self.stats = session.stats();
        self.metrics.record_publish();
        self.latest = Some(snapshot);
        self.latest.as_ref()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(AggregationSession::next_deadline)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn error(&self) -> Option<&TapError> {
        self.error.as_ref()
    }

    pub fn last_parse_error(&self) -> Option<&str> {
        self.last_parse_error.as_deref()
    }

    pub fn latest(&self) -> Option<&TopSnapshot> {
        self.latest.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn session(&self) -> Option<&AggregationSession> {
        self.session.as_ref()
    }

    pub fn neighbors(&self) -> &N {
        &self.neighbors
    }

    pub fn status(&self) -> TapStatus {
        TapStatus {
            state: self.state,
            resource: self.tap.resource.clone(),
            resource_type: self.tap.resource_type().to_string(),
            error: self.error.as_ref().map(ErrorBanner::from),
            last_parse_error: self.last_parse_error.clone(),
            stats: self.stats,
            snapshot: self.latest.clone(),
            neighbors: self.neighbors.neighbors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taptop_core::ManualClock;

    fn request_init(id: u64, path: &str) -> String {
        format!(
            r#"{{"proxyDirection": "INBOUND",
                "source": "10.0.0.1:4000",
                "sourceMeta": {{"labels": {{"namespace": "emojivoto", "deployment": "vote-bot"}}}},
                "destination": "10.0.0.2:8080",
                "http": {{"requestInit": {{"id": {{"base": {id}}}, "method": {{"registered": "GET"}}, "path": "{path}"}}}}}}"#
        )
    }

    fn response_init(id: u64, status: u16) -> String {
        format!(
            r#"{{"proxyDirection": "INBOUND", "source": "10.0.0.1:4000", "destination": "10.0.0.2:8080",
                "http": {{"responseInit": {{"id": {{"base": {id}}}, "sinceRequestInit": "0.001s", "httpStatus": {status}}}}}}}"#
        )
    }

    fn response_end(id: u64) -> String {
        format!(
            r#"{{"proxyDirection": "INBOUND", "source": "10.0.0.1:4000", "destination": "10.0.0.2:8080",
                "http": {{"responseEnd": {{"id": {{"base": {id}}}, "sinceRequestInit": "0.020s", "sinceResponseInit": "0.019s", "responseBytes": 12}}}}}}"#
        )
    }

    fn feed_request(controller: &mut StreamLifecycleController, id: u64, path: &str) {
        controller.on_message(&request_init(id, path));
        controller.on_message(&response_init(id, 200));
        controller.on_message(&response_end(id));
    }

    fn controller(clock: Arc<ManualClock>) -> StreamLifecycleController {
        StreamLifecycleController::new(
            TapConfig::default(),
            TopConfig::default(),
            clock,
            Arc::new(MetricsCollector::disabled()),
            NeighborSet::new(),
        )
    }

    fn open(clock: Arc<ManualClock>) -> StreamLifecycleController {
        let mut controller = controller(clock);
        assert!(controller.start());
        assert!(controller.on_open().is_some());
        controller
    }

    // ── Transitions ──────────────────────────────────────────────

    #[test]
    fn start_open_close_walks_the_state_machine() {
        let mut controller = controller(Arc::new(ManualClock::new()));
        assert_eq!(controller.state(), StreamState::Idle);
        assert!(controller.start());
        assert_eq!(controller.state(), StreamState::Connecting);
        assert!(controller.on_open().is_some());
        assert_eq!(controller.state(), StreamState::Open);
        controller.on_close(CLOSE_NORMAL, "", true);
        assert_eq!(controller.state(), StreamState::Closed);
    }

    #[test]
    fn illegal_inputs_are_ignored() {
        let mut controller = controller(Arc::new(ManualClock::new()));
        assert!(controller.on_open().is_none());
        controller.on_message(&request_init(1, "/a"));
        controller.on_close(1011, "boom", false);
        controller.on_error("boom");
        assert_eq!(controller.state(), StreamState::Idle);
        assert!(controller.error().is_none());
        assert!(controller.session().is_none());

        assert!(controller.start());
        assert!(!controller.start());
        assert_eq!(controller.state(), StreamState::Connecting);
    }

    #[test]
    fn messages_before_open_are_dropped() {
        let mut controller = controller(Arc::new(ManualClock::new()));
        controller.start();
        controller.on_message(&request_init(1, "/a"));
        assert_eq!(controller.stats().events, 0);
        assert!(controller.session().unwrap().pending().is_empty());
    }

    #[test]
    fn open_returns_subscription_and_clears_error() {
        let mut controller = controller(Arc::new(ManualClock::new()));
        controller.start();
        controller.on_error("connection refused");
        assert!(controller.error().is_some());

        let request = controller.on_open().unwrap();
        assert!(request.contains(r#""id":"top-web""#));
        assert!(request.contains(r#""maxRps":100.0"#));
        assert!(controller.error().is_none());
    }

    // ── Close handling ───────────────────────────────────────────

    #[test]
    fn normal_and_abnormal_closures_are_not_errors() {
        for code in [1000, 1006] {
            let mut controller = open(Arc::new(ManualClock::new()));
            controller.on_close(code, "", false);
            assert!(controller.error().is_none(), "code {code}");
        }
    }

    #[test]
    fn clean_close_with_any_code_is_not_an_error() {
        let mut controller = open(Arc::new(ManualClock::new()));
        controller.on_close(1001, "going away", true);
        assert!(controller.error().is_none());
    }

    #[test]
    fn unclean_close_reports_code_and_reason() {
        let mut controller = open(Arc::new(ManualClock::new()));
        controller.on_close(1011, "tap server crashed", false);
        let message = controller.error().unwrap().to_string();
        assert_eq!(
            message,
            "Websocket close error [1011: Internal Error] : tap server crashed"
        );
        assert_eq!(controller.status().error.unwrap().kind, "unclean_close");
    }

    #[test]
    fn unclean_close_without_reason_omits_suffix() {
        let mut controller = open(Arc::new(ManualClock::new()));
        controller.on_close(1008, "", false);
        assert_eq!(
            controller.error().unwrap().to_string(),
            "Websocket close error [1008: Policy Violation]"
        );
    }

    #[test]
    fn error_is_recorded_without_state_change() {
        let mut controller = open(Arc::new(ManualClock::new()));
        controller.on_error("reset by peer");
        assert_eq!(controller.state(), StreamState::Open);
        assert_eq!(
            controller.error().unwrap().to_string(),
            "Websocket error: reset by peer"
        );
    }

    #[test]
    fn close_flushes_pending_publish_once() {
        let clock = Arc::new(ManualClock::new());
        let mut controller = open(clock.clone());
        feed_request(&mut controller, 1, "/a");
        assert!(controller.latest().is_none());

        controller.on_close(CLOSE_NORMAL, "", true);
        let snapshot = controller.latest().unwrap();
        assert_eq!(snapshot.rows.len(), 1);
        assert!(controller.session().is_none());

        clock.advance_ms(1000);
        assert!(controller.poll_publish().is_none());
        assert!(controller.next_deadline().is_none());
    }

    // ── Publishing ───────────────────────────────────────────────

    #[test]
    fn publishes_at_trailing_edge() {
        let clock = Arc::new(ManualClock::new());
        let mut controller = open(clock.clone());
        feed_request(&mut controller, 1, "/a");

        assert!(controller.poll_publish().is_none());
        clock.advance_ms(499);
        assert!(controller.poll_publish().is_none());
        clock.advance_ms(1);
        let snapshot = controller.poll_publish().unwrap();
        assert_eq!(snapshot.rows[0].count, 1);
        assert_eq!(snapshot.rows[0].path, "/a");
        assert!(controller.poll_publish().is_none());
    }

    #[test]
    fn stop_prevents_further_publishes() {
        let clock = Arc::new(ManualClock::new());
        let mut controller = open(clock.clone());
        feed_request(&mut controller, 1, "/a");

        assert!(controller.stop());
        feed_request(&mut controller, 2, "/b");
        clock.advance_ms(1000);
        assert!(controller.poll_publish().is_none());
        assert!(controller.latest().is_none());
        assert_eq!(controller.state(), StreamState::Closed);
        assert_eq!(controller.stats().events, 3);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut controller = open(Arc::new(ManualClock::new()));
        assert!(controller.stop());
        assert!(!controller.stop());
        assert_eq!(controller.state(), StreamState::Closed);

        let mut idle = controller_idle();
        assert!(!idle.stop());
        assert_eq!(idle.state(), StreamState::Closed);
    }

    fn controller_idle() -> StreamLifecycleController {
        controller(Arc::new(ManualClock::new()))
    }

    #[test]
    fn restart_discards_previous_rows() {
        let clock = Arc::new(ManualClock::new());
        let mut controller = open(clock.clone());
        feed_request(&mut controller, 1, "/a");
        clock.advance_ms(500);
        assert!(controller.poll_publish().is_some());
        controller.stop();

        assert!(controller.start());
        assert!(controller.latest().is_none());
        assert_eq!(controller.stats(), SessionStats::default());
        let session = controller.session().unwrap();
        assert!(session.top().is_empty());
        assert!(session.pending().is_empty());
    }

    // ── Ingest ───────────────────────────────────────────────────

    #[test]
    fn parse_errors_are_counted_and_kept() {
        let mut controller = open(Arc::new(ManualClock::new()));
        controller.on_message("not json");
        controller.on_message(r#"{"source": "1.1.1.1:1", "destination": "2.2.2.2:2"}"#);
        assert_eq!(controller.stats().parse_errors, 2);
        assert_eq!(
            controller.last_parse_error(),
            Some("message carries no http event")
        );
        assert_eq!(controller.state(), StreamState::Open);
    }

    #[test]
    fn inbound_completions_feed_neighbors() {
        let mut controller = open(Arc::new(ManualClock::new()));
        feed_request(&mut controller, 1, "/a");
        let status = controller.status();
        assert_eq!(status.neighbors.len(), 1);
        assert_eq!(status.neighbors[0].name, "vote-bot");
        assert_eq!(status.resource_type, "deployment");
        assert_eq!(status.stats.completed, 1);
    }
}
