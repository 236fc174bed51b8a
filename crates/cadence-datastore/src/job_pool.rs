//! Job pool mirror: the narrow interface the data store consumes.
//!
//! Jobs are owned and mutated by the scheduler's job pool; the data store
//! reads the pool and copies its delta buffers in by value at each
//! finalization.

use std::collections::HashMap;

use tracing::debug;

use cadence_schema::Job;

/// Job elements and their accumulated deltas.
#[derive(Debug, Clone, Default)]
pub struct JobPool {
    /// Job elements by id.
    pub pool: HashMap<String, Job>,

    /// Job ids per owning task proxy id.
    pub task_jobs: HashMap<String, Vec<String>>,

    /// Jobs created since the last flush.
    pub added: HashMap<String, Job>,

    /// Partial job updates since the last flush.
    pub updated: HashMap<String, Job>,

    /// Job ids removed since the last flush.
    pub pruned: Vec<String>,

    /// Set when any delta has accumulated.
    pub updates_pending: bool,
}

impl JobPool {
    /// Creates an empty job pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job under its owning task proxy.
    pub fn insert_job(&mut self, job: Job) {
        let j_id = job.id.clone();
        if let Some(tp_id) = &job.task_proxy {
            self.task_jobs
                .entry(tp_id.clone())
                .or_default()
                .push(j_id.clone());
        }
        self.pool.insert(j_id.clone(), job.clone());
        self.added.insert(j_id, job);
        self.updates_pending = true;
    }

    /// Removes every job of a task proxy, scheduling them for pruning.
    pub fn remove_task_jobs(&mut self, tp_id: &str) {
        let Some(j_ids) = self.task_jobs.remove(tp_id) else {
            return;
        };
        debug!(task_proxy = tp_id, count = j_ids.len(), "removing task jobs");
        for j_id in j_ids {
            self.pool.remove(&j_id);
            self.added.remove(&j_id);
            self.updated.remove(&j_id);
            self.pruned.push(j_id);
        }
        self.updates_pending = true;
    }

    /// Rebuilds the delta buffers from the surviving pool after a reload,
    /// so the regenerated store re-receives every live job.
    pub fn reload_deltas(&mut self) {
        self.added = self.pool.clone();
        self.updated.clear();
        self.pruned.clear();
        self.updates_pending = true;
    }

    /// Drops accumulated deltas after their application.
    pub fn clear_deltas(&mut self) {
        self.added.clear();
        self.updated.clear();
        self.pruned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, tp_id: &str) -> Job {
        Job {
            id: id.to_string(),
            task_proxy: Some(tp_id.to_string()),
            ..Job::default()
        }
    }

    #[test]
    fn test_insert_and_remove() {
        let mut pool = JobPool::new();
        pool.insert_job(job("ida|tides|1|ebb|01", "ida|tides|1|ebb"));
        pool.insert_job(job("ida|tides|1|ebb|02", "ida|tides|1|ebb"));
        assert_eq!(pool.task_jobs["ida|tides|1|ebb"].len(), 2);
        assert_eq!(pool.added.len(), 2);

        pool.clear_deltas();
        pool.remove_task_jobs("ida|tides|1|ebb");
        assert!(pool.pool.is_empty());
        assert_eq!(pool.pruned.len(), 2);
    }

    #[test]
    fn test_remove_unknown_proxy_is_noop() {
        let mut pool = JobPool::new();
        pool.remove_task_jobs("ida|tides|1|ghost");
        assert!(pool.pruned.is_empty());
        assert!(!pool.updates_pending);
    }

    #[test]
    fn test_reload_deltas_resends_pool() {
        let mut pool = JobPool::new();
        pool.insert_job(job("ida|tides|1|ebb|01", "ida|tides|1|ebb"));
        pool.clear_deltas();
        pool.reload_deltas();
        assert_eq!(pool.added.len(), 1);
        assert!(pool.pruned.is_empty());
    }
}
