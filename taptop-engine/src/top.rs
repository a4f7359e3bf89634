use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;
use taptop_core::{Direction, Endpoint, Outcome};
use tracing::{debug, trace};

use crate::neighbors::NeighborObserver;
use crate::pending::CompletedRequest;
use crate::stamp::{Stamp, Stamper, evict_oldest};

/// Aggregation key: who called whom on which path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub source: String,
    pub destination: String,
    pub path: String,
}

impl RouteKey {
    /// Stable string form, used as the row key by renderers.
    pub fn render(&self) -> String {
        [self.source.as_str(), self.destination.as_str(), self.path.as_str()].join("_")
    }
}

/// Running statistics for one route.
#[derive(Debug, Clone, Serialize)]
pub struct TopRouteRow {
    pub key: String,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub path: String,
    pub direction: Direction,
    pub count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    /// Latencies in seconds.
    pub best: f64,
    pub worst: f64,
    pub last: f64,
    #[serde(skip)]
    last_updated: Stamp,
    #[serde(skip)]
    created_seq: u64,
}

impl TopRouteRow {
    fn new(key: &RouteKey, completed: &CompletedRequest, stamp: Stamp) -> Option<Self> {
        let init_event = completed.request_init.as_ref()?;
        let (success_count, failure_count) = match completed.outcome {
            Outcome::Success => (1, 0),
            Outcome::Failure => (0, 1),
        };
        Some(Self {
            key: key.render(),
            source: init_event.source.clone(),
            destination: init_event.destination.clone(),
            path: key.path.clone(),
            direction: completed.direction(),
            count: 1,
            success_count,
            failure_count,
            success_rate: success_count as f64,
            best: completed.latency,
            worst: completed.latency,
            last: completed.latency,
            last_updated: stamp,
            created_seq: stamp.seq,
        })
    }

    fn record(&mut self, latency: f64, outcome: Outcome, stamp: Stamp) {
        self.count += 1;
        match outcome {
            Outcome::Success => self.success_count += 1,
            Outcome::Failure => self.failure_count += 1,
        }
        self.success_rate =
            self.success_count as f64 / (self.success_count + self.failure_count) as f64;
        self.last = latency;
        if latency < self.best {
            self.best = latency;
        }
        if latency > self.worst {
            self.worst = latency;
        }
        self.last_updated = stamp;
    }
}

/// Bounded map of route statistics, fed by completed requests.
#[derive(Debug)]
pub struct TopRouteAggregator {
    rows: HashMap<RouteKey, TopRouteRow>,
    capacity: usize,
    stamper: Stamper,
    evicted: u64,
    orphaned: u64,
}

impl TopRouteAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: HashMap::with_capacity(capacity.saturating_add(1)),
            capacity: capacity.max(1),
            stamper: Stamper::default(),
            evicted: 0,
            orphaned: 0,
        }
    }

    /// Fold one completed request into its route row.
    ///
    /// Returns false when the request has no request-init (and thus no path)
    /// and was counted as orphaned instead.
    pub fn fold(
        &mut self,
        completed: &CompletedRequest,
        now: Instant,
        neighbors: &mut dyn NeighborObserver,
    ) -> bool {
        let Some(init_event) = completed.request_init.as_ref() else {
            self.orphaned += 1;
            trace!(request_id = %completed.request_id, "Completed request has no request-init");
            return false;
        };
        let Some(init) = init_event.request_init() else {
            self.orphaned += 1;
            return false;
        };

        let key = RouteKey {
            source: init_event.source.identity().to_string(),
            destination: init_event.destination.identity().to_string(),
            path: init.path.clone(),
        };
        let stamp = self.stamper.stamp(now);

        match self.rows.entry(key) {
            Entry::Occupied(mut row) => row.get_mut().record(completed.latency, completed.outcome, stamp),
            Entry::Vacant(slot) => {
                let Some(row) = TopRouteRow::new(slot.key(), completed, stamp) else {
                    return false;
                };
                slot.insert(row);
            }
        }

        if self.rows.len() > self.capacity
            && let Some((key, _)) = evict_oldest(&mut self.rows, |row| row.last_updated)
        {
            self.evicted += 1;
            debug!(route = %key.render(), "Top route evicted");
        }

        if completed.direction() == Direction::Inbound {
            neighbors.observe_inbound_source(&init_event.source);
        }
        true
    }

    pub fn get(&self, key: &RouteKey) -> Option<&TopRouteRow> {
        self.rows.get(key)
    }

    /// Rows in creation order, truncated to `max_rows`.
    pub fn rows(&self, max_rows: usize) -> Vec<TopRouteRow> {
        let mut rows: Vec<&TopRouteRow> = self.rows.values().collect();
        rows.sort_by_key(|row| row.created_seq);
        rows.into_iter().take(max_rows).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Completions that could not be attributed to a route.
    pub fn orphaned(&self) -> u64 {
        self.orphaned
    }
}
