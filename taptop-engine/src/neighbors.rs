use serde::Serialize;
use std::collections::BTreeMap;
use taptop_core::Endpoint;

/// Receives the sources of inbound requests as they are folded.
///
/// Resource pages use this to list the workloads that call them.
pub trait NeighborObserver {
    fn observe_inbound_source(&mut self, source: &Endpoint);

    /// Neighbors collected so far, for observers that keep them.
    fn neighbors(&self) -> Vec<Neighbor> {
        Vec::new()
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNeighbors;

impl NeighborObserver for NoopNeighbors {
    fn observe_inbound_source(&mut self, _source: &Endpoint) {}
}

/// An upstream workload seen calling the tapped resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub kind: String,
    pub name: String,
}

/// Distinct upstream workloads, keyed by namespace/kind/name.
///
/// Sources without workload labels are ignored: their address carries an
/// ephemeral port and would grow the set without bound.
#[derive(Debug, Default, Clone)]
pub struct NeighborSet {
    upstreams: BTreeMap<String, Neighbor>,
}

impl NeighborSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}

impl NeighborObserver for NeighborSet {
    fn observe_inbound_source(&mut self, source: &Endpoint) {
        let (Some(kind), Some(name)) = (&source.resource_kind, &source.resource_name) else {
            return;
        };
        let namespace = source.namespace.clone();
        let key = format!("{}/{}/{}", namespace.as_deref().unwrap_or_default(), kind, name);
        self.upstreams.entry(key).or_insert_with(|| Neighbor {
            namespace,
            kind: kind.clone(),
            name: name.clone(),
        });
    }

    fn neighbors(&self) -> Vec<Neighbor> {
        self.upstreams.values().cloned().collect()
    }
}
