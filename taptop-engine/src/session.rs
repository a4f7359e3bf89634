use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use taptop_core::config::TopConfig;
use taptop_core::{LifecycleEvent, Outcome};
use tracing::debug;

use crate::neighbors::NeighborObserver;
use crate::pending::PendingRequestIndex;
use crate::scheduler::SnapshotScheduler;
use crate::top::{TopRouteAggregator, TopRouteRow};

/// Published view of the aggregated routes.
#[derive(Debug, Clone, Serialize)]
pub struct TopSnapshot {
    /// Increments with every publish of one session.
    pub sequence: u64,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<TopRouteRow>,
    /// Rows held in the aggregator, before display truncation.
    pub total_rows: usize,
    pub pending_requests: usize,
}

/// Counters for one streaming session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub events: u64,
    pub parse_errors: u64,
    pub completed: u64,
    pub failures: u64,
    pub orphaned: u64,
    pub pending_evicted: u64,
    pub rows_evicted: u64,
    pub published: u64,
}

/// All state of one tap stream: created on start, dropped on stop.
#[derive(Debug)]
pub struct AggregationSession {
    pending: PendingRequestIndex,
    top: TopRouteAggregator,
    scheduler: SnapshotScheduler,
    max_rows_to_display: usize,
    events: u64,
    parse_errors: u64,
    completed: u64,
    failures: u64,
    published: u64,
}

impl AggregationSession {
    pub fn new(limits: &TopConfig, publish_interval: Duration) -> Self {
        Self {
            pending: PendingRequestIndex::new(limits.max_rows_to_store),
            top: TopRouteAggregator::new(limits.max_rows_to_store),
            scheduler: SnapshotScheduler::new(publish_interval),
            max_rows_to_display: limits.max_rows_to_display,
            events: 0,
            parse_errors: 0,
            completed: 0,
            failures: 0,
            published: 0,
        }
    }

    /// Correlate one event, fold it if it completes a request, and signal
    /// the scheduler. Returns the outcome of a request this event completed.
    pub fn ingest(
        &mut self,
        event: LifecycleEvent,
        now: Instant,
        neighbors: &mut dyn NeighborObserver,
    ) -> Option<Outcome> {
        self.events += 1;
        let outcome = self.pending.ingest(event, now).map(|completed| {
            self.completed += 1;
            if !completed.outcome.is_success() {
                self.failures += 1;
            }
            self.top.fold(&completed, now, neighbors);
            completed.outcome
        });
        self.scheduler.on_signal(now);
        outcome
    }

    pub fn record_parse_error(&mut self) {
        self.parse_errors += 1;
    }

    /// Publish if the scheduler deadline has passed.
    pub fn poll_publish(&mut self, now: Instant) -> Option<TopSnapshot> {
        if self.scheduler.poll(now) {
            Some(self.publish())
        } else {
            None
        }
    }

    /// Publish a pending update right away instead of at its deadline.
    pub fn flush(&mut self) -> Option<TopSnapshot> {
        if self.scheduler.flush() {
            Some(self.publish())
        } else {
            None
        }
    }

    fn publish(&mut self) -> TopSnapshot {
        self.published += 1;
        let snapshot = self.snapshot();
        debug!(
            sequence = snapshot.sequence,
            rows = snapshot.rows.len(),
            pending = snapshot.pending_requests,
            "Top snapshot published"
        );
        snapshot
    }

    /// Current contents, without going through the scheduler.
    pub fn snapshot(&self) -> TopSnapshot {
        TopSnapshot {
            sequence: self.published,
            generated_at: Utc::now(),
            rows: self.top.rows(self.max_rows_to_display),
            total_rows: self.top.len(),
            pending_requests: self.pending.len(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    /// Stop publishing for good. Called when the stream is torn down.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            events: self.events,
            parse_errors: self.parse_errors,
            completed: self.completed,
            failures: self.failures,
            orphaned: self.top.orphaned(),
            pending_evicted: self.pending.evicted(),
            rows_evicted: self.top.evicted(),
            published: self.published,
        }
    }

    pub fn pending(&self) -> &PendingRequestIndex {
        &self.pending
    }

    pub fn top(&self) -> &TopRouteAggregator {
        &self.top
    }
}
