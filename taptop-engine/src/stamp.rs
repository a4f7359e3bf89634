use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

/// Last-update marker for bounded stores.
///
/// Ordered by time first; the sequence number orders updates that share an
/// instant, so eviction always picks a single, deterministic victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Stamp {
    pub at: Instant,
    pub seq: u64,
}

/// Hands out strictly increasing stamps.
#[derive(Debug, Default)]
pub(crate) struct Stamper {
    next_seq: u64,
}

impl Stamper {
    pub fn stamp(&mut self, at: Instant) -> Stamp {
        let seq = self.next_seq;
        self.next_seq += 1;
        Stamp { at, seq }
    }
}

/// Remove the entry with the oldest stamp. Linear scan; stores are small.
pub(crate) fn evict_oldest<K, V>(map: &mut HashMap<K, V>, stamp: impl Fn(&V) -> Stamp) -> Option<(K, V)>
where
    K: Eq + Hash + Clone,
{
    let oldest = map
        .iter()
        .min_by_key(|(_, value)| stamp(value))
        .map(|(key, _)| key.clone())?;
    map.remove_entry(&oldest)
}
