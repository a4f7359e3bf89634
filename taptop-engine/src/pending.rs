use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;
use taptop_core::event::{EventKind, LifecycleEvent, RequestInit};
use taptop_core::{Direction, Outcome, classify};
use tracing::debug;

use crate::stamp::{Stamp, Stamper, evict_oldest};

/// Events seen so far for one in-flight request.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request_init: Option<LifecycleEvent>,
    response_init: Option<LifecycleEvent>,
    response_end: Option<LifecycleEvent>,
    /// Most recently received event of any kind.
    base: LifecycleEvent,
    completed: bool,
    last_updated: Stamp,
}

impl PendingRequest {
    fn new(event: LifecycleEvent, stamp: Stamp) -> Self {
        let mut pending = Self {
            request_init: None,
            response_init: None,
            response_end: None,
            base: event.clone(),
            completed: false,
            last_updated: stamp,
        };
        pending.merge(event, stamp);
        pending
    }

    /// Last write wins per event kind.
    fn merge(&mut self, event: LifecycleEvent, stamp: Stamp) {
        self.base = event.clone();
        self.last_updated = stamp;
        match event.kind {
            EventKind::RequestInit(_) => self.request_init = Some(event),
            EventKind::ResponseInit(_) => self.response_init = Some(event),
            EventKind::ResponseEnd(_) => {
                self.response_end = Some(event);
                self.completed = true;
            }
        }
    }

    pub fn base(&self) -> &LifecycleEvent {
        &self.base
    }

    pub fn request_init(&self) -> Option<&LifecycleEvent> {
        self.request_init.as_ref()
    }

    pub fn response_init(&self) -> Option<&LifecycleEvent> {
        self.response_init.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn last_updated(&self) -> Instant {
        self.last_updated.at
    }

    fn into_completed(self, request_id: String) -> Option<CompletedRequest> {
        let response_end = self.response_end?;
        let end = response_end.response_end()?;
        let latency = end.since_request_init;
        let http_status = self
            .response_init
            .as_ref()
            .and_then(|event| event.response_init())
            .and_then(|init| init.http_status);
        let outcome = classify(http_status, end.eos.as_ref());

        Some(CompletedRequest {
            request_id,
            request_init: self.request_init,
            response_init: self.response_init,
            response_end,
            latency,
            outcome,
        })
    }
}

/// A request whose response has ended, ready to be folded into top routes.
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    pub request_id: String,
    pub request_init: Option<LifecycleEvent>,
    pub response_init: Option<LifecycleEvent>,
    pub response_end: LifecycleEvent,
    /// Seconds from request start to end of response.
    pub latency: f64,
    pub outcome: Outcome,
}

impl CompletedRequest {
    /// The last event received for this request.
    pub fn base(&self) -> &LifecycleEvent {
        &self.response_end
    }

    pub fn direction(&self) -> Direction {
        self.response_end.direction
    }

    pub fn init(&self) -> Option<&RequestInit> {
        self.request_init.as_ref().and_then(|event| event.request_init())
    }
}

/// Bounded index of in-flight requests keyed by correlation id.
///
/// Entries are removed the moment their response ends, so a request can be
/// handed out for folding at most once. When more than `capacity` requests are
/// in flight the least recently updated one is dropped.
#[derive(Debug)]
pub struct PendingRequestIndex {
    entries: HashMap<String, PendingRequest>,
    capacity: usize,
    stamper: Stamper,
    evicted: u64,
}

impl PendingRequestIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.saturating_add(1)),
            capacity: capacity.max(1),
            stamper: Stamper::default(),
            evicted: 0,
        }
    }

    /// Merge one event. Returns the completed request when `event` ends it.
    pub fn ingest(&mut self, event: LifecycleEvent, now: Instant) -> Option<CompletedRequest> {
        let stamp = self.stamper.stamp(now);
        let request_id = event.request_id.clone();
        let completed = match self.entries.entry(request_id.clone()) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().merge(event, stamp);
                slot.get().is_completed()
            }
            Entry::Vacant(slot) => slot.insert(PendingRequest::new(event, stamp)).is_completed(),
        };

        if completed {
            let pending = self.entries.remove(&request_id)?;
            return pending.into_completed(request_id);
        }

        if self.entries.len() > self.capacity
            && let Some((request_id, _)) = evict_oldest(&mut self.entries, |p| p.last_updated)
        {
            self.evicted += 1;
            debug!(request_id = %request_id, "Pending request evicted");
        }
        None
    }

    pub fn get(&self, request_id: &str) -> Option<&PendingRequest> {
        self.entries.get(request_id)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries dropped for capacity since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
