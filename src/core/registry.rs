//! Storage for suspended runs.
//!
//! Suspended runs live in process memory only. The in-memory registry bounds
//! both their number and their age: past either limit the oldest suspended
//! run is dropped and can no longer be resumed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::WorkflowRun;

/// Where the engine parks suspended runs
pub trait RunRegistry: Send + Sync {
    /// Store a suspended run; returns ids evicted to make room
    fn insert(&self, run: WorkflowRun) -> Vec<Uuid>;

    /// Remove and return a run. At most one caller gets any given run.
    fn take(&self, id: &Uuid) -> Option<WorkflowRun>;

    /// Copy of a run without removing it
    fn get(&self, id: &Uuid) -> Option<WorkflowRun>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Workflow limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Pause before the model call until approved (default: true)
    #[serde(default = "default_require_approval")]
    pub require_approval: bool,

    /// Suspended runs kept at once (default: 1,000)
    #[serde(default = "default_max_suspended")]
    pub max_suspended_runs: usize,

    /// Age after which a suspended run is dropped (default: 1 hour)
    #[serde(default = "default_suspended_ttl")]
    pub suspended_run_ttl_seconds: u64,
}

fn default_require_approval() -> bool {
    true
}

fn default_max_suspended() -> usize {
    1_000
}

fn default_suspended_ttl() -> u64 {
    3_600
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            require_approval: default_require_approval(),
            max_suspended_runs: default_max_suspended(),
            suspended_run_ttl_seconds: default_suspended_ttl(),
        }
    }
}

struct Parked {
    run: WorkflowRun,
    parked_at: Instant,
}

/// Bounded in-process registry
pub struct InMemoryRunRegistry {
    runs: Mutex<HashMap<Uuid, Parked>>,
    capacity: usize,
    ttl: Duration,
}

impl InMemoryRunRegistry {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn from_settings(settings: &WorkflowSettings) -> Self {
        Self::new(
            settings.max_suspended_runs,
            Duration::from_secs(settings.suspended_run_ttl_seconds),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Parked>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expired(&self, parked: &Parked, now: Instant) -> bool {
        now.saturating_duration_since(parked.parked_at) > self.ttl
    }

    /// Drop runs past their TTL as of `now`
    pub fn purge_expired_at(&self, now: Instant) -> Vec<Uuid> {
        let mut runs = self.lock();
        let expired: Vec<Uuid> = runs
            .iter()
            .filter(|(_, parked)| self.expired(parked, now))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            runs.remove(id);
        }
        expired
    }
}

impl Default for InMemoryRunRegistry {
    fn default() -> Self {
        Self::from_settings(&WorkflowSettings::default())
    }
}

impl RunRegistry for InMemoryRunRegistry {
    fn insert(&self, run: WorkflowRun) -> Vec<Uuid> {
        let now = Instant::now();
        let mut evicted = self.purge_expired_at(now);

        let mut runs = self.lock();
        while runs.len() >= self.capacity {
            let oldest = runs
                .iter()
                .min_by_key(|(_, parked)| parked.parked_at)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    runs.remove(&id);
                    evicted.push(id);
                }
                None => break,
            }
        }

        runs.insert(run.id, Parked { run, parked_at: now });

        if !evicted.is_empty() {
            warn!(count = evicted.len(), "Evicted suspended runs");
        }
        evicted
    }

    fn take(&self, id: &Uuid) -> Option<WorkflowRun> {
        let parked = self.lock().remove(id)?;
        if self.expired(&parked, Instant::now()) {
            return None;
        }
        Some(parked.run)
    }

    fn get(&self, id: &Uuid) -> Option<WorkflowRun> {
        self.lock().get(id).map(|parked| parked.run.clone())
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunData;

    fn run() -> WorkflowRun {
        let mut run = WorkflowRun::new("chat", RunData::new());
        run.suspend("waiting".to_string());
        run
    }

    #[test]
    fn test_take_is_single_use() {
        let registry = InMemoryRunRegistry::default();
        let run = run();
        let id = run.id;

        assert!(registry.insert(run).is_empty());
        assert!(registry.get(&id).is_some());
        assert!(registry.take(&id).is_some());
        assert!(registry.take(&id).is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let registry = InMemoryRunRegistry::new(2, Duration::from_secs(60));
        let first = run();
        let first_id = first.id;

        registry.insert(first);
        std::thread::sleep(Duration::from_millis(2));
        registry.insert(run());
        std::thread::sleep(Duration::from_millis(2));
        let evicted = registry.insert(run());

        assert_eq!(evicted, vec![first_id]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&first_id).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let registry = InMemoryRunRegistry::new(10, Duration::from_secs(30));
        let run = run();
        let id = run.id;
        registry.insert(run);

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(registry.purge_expired_at(later), vec![id]);
        assert!(registry.is_empty());
    }
}
