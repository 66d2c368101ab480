//! Run-indexed storage of finished results.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::types::PipelineResult;

/// Default time a result stays retrievable.
pub const DEFAULT_RUN_TTL: Duration = Duration::from_secs(3600);

/// Default maximum number of retained results.
pub const DEFAULT_RUN_STORE_CAPACITY: usize = 1000;

/// Lookup of finished runs by run id.
pub trait RunStore: Send + Sync {
    /// Stores a result, replacing any earlier result with the same run id.
    fn insert(&self, result: PipelineResult);

    /// Returns the result for `run_id` unless it is unknown or expired.
    fn get(&self, run_id: &str) -> Option<PipelineResult>;

    /// Number of retained results, expired ones included until purged.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired results and returns how many were removed.
    fn purge_expired(&self) -> usize;
}

#[derive(Debug)]
struct Entry {
    result: PipelineResult,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    // insertion order, oldest first
    order: VecDeque<String>,
}

impl Inner {
    fn remove(&mut self, run_id: &str) -> Option<Entry> {
        let entry = self.entries.remove(run_id)?;
        self.order.retain(|id| id != run_id);
        Some(entry)
    }
}

/// In-process run store with TTL expiry and a capacity bound.
///
/// When full, inserting evicts the oldest result.
#[derive(Debug)]
pub struct InMemoryRunStore {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_TTL, DEFAULT_RUN_STORE_CAPACITY)
    }
}

impl InMemoryRunStore {
    /// Creates a store. A capacity of zero is treated as one.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn insert_at(&self, result: PipelineResult, now: Instant) {
        let mut inner = self.inner.lock().expect("run store lock poisoned");
        let run_id = result.run_id.clone();
        inner.remove(&run_id);

        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            tracing::debug!(run_id = %oldest, "Evicted run result at capacity");
        }

        inner.order.push_back(run_id.clone());
        inner.entries.insert(
            run_id,
            Entry {
                result,
                inserted_at: now,
            },
        );
    }

    fn get_at(&self, run_id: &str, now: Instant) -> Option<PipelineResult> {
        let mut inner = self.inner.lock().expect("run store lock poisoned");
        let expired = now.duration_since(inner.entries.get(run_id)?.inserted_at) >= self.ttl;
        if expired {
            inner.remove(run_id);
            return None;
        }
        inner.entries.get(run_id).map(|entry| entry.result.clone())
    }

    fn purge_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock().expect("run store lock poisoned");
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
        let Inner { entries, order } = &mut *inner;
        order.retain(|id| entries.contains_key(id));
        before - entries.len()
    }
}

impl RunStore for InMemoryRunStore {
    fn insert(&self, result: PipelineResult) {
        self.insert_at(result, Instant::now());
    }

    fn get(&self, run_id: &str) -> Option<PipelineResult> {
        self.get_at(run_id, Instant::now())
    }

    fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("run store lock poisoned")
            .entries
            .len()
    }

    fn purge_expired(&self) -> usize {
        self.purge_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::PipelineStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn result(run_id: &str) -> PipelineResult {
        PipelineResult {
            run_id: run_id.to_string(),
            status: PipelineStatus::Success,
            code: "x".to_string(),
            language: "python".to_string(),
            duration_ms: 1,
            started_at: Utc::now(),
            stages: Vec::new(),
            test_results: None,
            artifact_id: None,
            error: None,
            metrics: BTreeMap::new(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = InMemoryRunStore::default();
        store.insert(result("run-a"));
        assert_eq!(store.get("run-a").map(|r| r.run_id), Some("run-a".to_string()));
        assert!(store.get("run-b").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = InMemoryRunStore::new(DEFAULT_RUN_TTL, 2);
        store.insert(result("run-1"));
        store.insert(result("run-2"));
        store.insert(result("run-3"));

        assert_eq!(store.len(), 2);
        assert!(store.get("run-1").is_none());
        assert!(store.get("run-2").is_some());
        assert!(store.get("run-3").is_some());
    }

    #[test]
    fn test_reinsert_refreshes_position() {
        let store = InMemoryRunStore::new(DEFAULT_RUN_TTL, 2);
        store.insert(result("run-1"));
        store.insert(result("run-2"));
        store.insert(result("run-1"));
        store.insert(result("run-3"));

        assert!(store.get("run-1").is_some());
        assert!(store.get("run-2").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let store = InMemoryRunStore::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        store.insert_at(result("run-old"), t0);
        store.insert_at(result("run-new"), t0 + Duration::from_secs(8));

        assert!(store.get_at("run-old", t0 + Duration::from_secs(9)).is_some());
        assert!(store.get_at("run-old", t0 + Duration::from_secs(10)).is_none());
        assert_eq!(store.len(), 1);

        assert_eq!(store.purge_at(t0 + Duration::from_secs(20)), 1);
        assert!(store.is_empty());
    }
}
