//! Bounded, time-expiring registry of in-flight and recent builds.
//!
//! A generic LRU map: `put` evicts the least-recently-used entry once the
//! capacity bound is hit, and `get` lazily drops entries whose time-to-live
//! has elapsed. The registry knows nothing about build semantics; evicted,
//! expired, and never-inserted keys all look the same to callers.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct Entry<V> {
    value: V,
    last_access: Instant,
}

pub struct Registry<V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, Entry<V>>,
    // Recency order, oldest at the front.
    order: VecDeque<String>,
}

impl<V> Registry<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts `value` under `id`, evicting the least-recently-used entry if
    /// the registry is full.
    pub fn put(&mut self, id: String, value: V) {
        if self.entries.contains_key(&id) {
            self.touch(&id);
        } else {
            if self.entries.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    debug!("evicting build {oldest} (capacity {})", self.capacity);
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(id.clone());
        }
        self.entries.insert(
            id,
            Entry {
                value,
                last_access: Instant::now(),
            },
        );
    }

    /// Looks up `id`, refreshing its recency. An entry untouched for longer
    /// than the time-to-live is removed and reported as absent.
    pub fn get(&mut self, id: &str) -> Option<&V> {
        let expired = match self.entries.get(id) {
            Some(entry) => entry.last_access.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            debug!("build {id} expired after {:?}", self.ttl);
            self.remove(id);
            return None;
        }
        self.touch(id);
        self.entries.get(id).map(|e| &e.value)
    }

    /// Drops every entry whose time-to-live has elapsed.
    pub fn purge_expired(&mut self) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.last_access.elapsed() > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            debug!("build {id} expired after {:?}", self.ttl);
            self.remove(&id);
        }
    }

    fn touch(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.last_access = Instant::now();
        }
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
            self.order.push_back(id.to_string());
        }
    }

    fn remove(&mut self, id: &str) {
        self.entries.remove(id);
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
        }
    }
}
