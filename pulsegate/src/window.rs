use crate::types::{LiveEvent, ResourceSample};
use log::debug;
use std::collections::{HashSet, VecDeque};

/// Fixed-capacity, drop-oldest window of resource samples in timestamp order.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<ResourceSample>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest at capacity. A sample older than
    /// the current tail is dropped and `false` is returned.
    pub fn push(&mut self, sample: ResourceSample) -> bool {
        if let Some(tail) = self.samples.back() {
            if sample.timestamp() < tail.timestamp() {
                debug!(
                    "[window] dropping out-of-order sample {} (tail {})",
                    sample.timestamp(),
                    tail.timestamp()
                );
                return false;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    /// Ordered copy, oldest first.
    pub fn snapshot(&self) -> Vec<ResourceSample> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<&ResourceSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Capped log of recent live events, deduplicated by id.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<LiveEvent>,
    ids: HashSet<String>,
    max: usize,
}

impl EventLog {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            events: VecDeque::with_capacity(max.min(1024)),
            ids: HashSet::new(),
            max,
        }
    }

    /// Returns `false` if an event with the same id is already held.
    pub fn push(&mut self, event: LiveEvent) -> bool {
        if self.ids.contains(&event.id) {
            return false;
        }
        if self.events.len() == self.max {
            if let Some(evicted) = self.events.pop_front() {
                self.ids.remove(&evicted.id);
            }
        }
        self.ids.insert(event.id.clone());
        self.events.push_back(event);
        true
    }

    /// Newest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<LiveEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
