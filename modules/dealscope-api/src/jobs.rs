//! Job registry: the only owner of job state.
//!
//! A lifecycle-scoped concurrent map injected into the HTTP handlers and
//! the background task — never a module-level singleton. All mutation
//! goes through the registry so the status machine stays monotonic:
//! queued → running → {done, error}, with no way back out of a terminal
//! state. Unknown ids no-op; the caller already holds the id it was
//! handed at creation.
//!
//! Retention is deliberately absent: completed jobs live for the process
//! lifetime, and eviction is an external collaborator's concern.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use dealscope_common::{Job, JobStatus, ScrapeOutcome};

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// New job in `Queued`, with a globally unique id.
    pub fn create(&self) -> Job {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        };
        self.jobs
            .lock()
            .expect("job map poisoned")
            .insert(job.id, job.clone());
        job
    }

    pub fn get(&self, id: &Uuid) -> Option<Job> {
        self.jobs.lock().expect("job map poisoned").get(id).cloned()
    }

    pub fn mark_running(&self, id: &Uuid) {
        self.update(id, |job| {
            job.status = JobStatus::Running;
        });
    }

    pub fn complete(&self, id: &Uuid, outcome: ScrapeOutcome) {
        self.update(id, |job| {
            job.status = JobStatus::Done;
            job.result = Some(outcome);
            job.error = None;
        });
    }

    pub fn fail(&self, id: &Uuid, message: impl Into<String>) {
        let message = message.into();
        self.update(id, |job| {
            job.status = JobStatus::Error;
            job.error = Some(message.clone());
            job.result = None;
        });
    }

    /// Apply a mutation and bump `updated_at`. No-ops on unknown ids and
    /// on jobs already in a terminal state.
    fn update(&self, id: &Uuid, mutate: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        if let Some(job) = jobs.get_mut(id) {
            if job.status.is_terminal() {
                return;
            }
            mutate(job);
            job.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn outcome() -> ScrapeOutcome {
        ScrapeOutcome {
            success: true,
            address_id: Some("1".to_string()),
            deals_scraped: 0,
            deals: Vec::new(),
            trend_snapshot: None,
            message: "ok".to_string(),
        }
    }

    #[test]
    fn create_starts_queued_with_null_result_and_error() {
        let registry = JobRegistry::new();
        let job = registry.create();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn ids_are_unique_under_concurrent_creation() {
        let registry = Arc::new(JobRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| registry.create().id).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread join") {
                assert!(seen.insert(id), "duplicate job id {id}");
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn lifecycle_sets_result_only_when_done() {
        let registry = JobRegistry::new();
        let id = registry.create().id;

        registry.mark_running(&id);
        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.result.is_none() && job.error.is_none());

        registry.complete(&id, outcome());
        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.result.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn fail_sets_error_only() {
        let registry = JobRegistry::new();
        let id = registry.create().id;
        registry.mark_running(&id);
        registry.fail(&id, "navigation timeout");

        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("navigation timeout"));
        assert!(job.result.is_none());
    }

    #[test]
    fn terminal_states_are_final() {
        let registry = JobRegistry::new();
        let id = registry.create().id;
        registry.complete(&id, outcome());

        registry.fail(&id, "too late");
        registry.mark_running(&id);

        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Done, "terminal state must not revert");
        assert!(job.error.is_none());
    }

    #[test]
    fn unknown_id_is_a_silent_noop() {
        let registry = JobRegistry::new();
        let ghost = Uuid::new_v4();
        registry.mark_running(&ghost);
        registry.fail(&ghost, "nope");
        assert!(registry.get(&ghost).is_none());
    }

    #[test]
    fn update_bumps_updated_at() {
        let registry = JobRegistry::new();
        let job = registry.create();
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.mark_running(&job.id);
        let after = registry.get(&job.id).unwrap();
        assert!(after.updated_at > job.updated_at);
        assert_eq!(after.created_at, job.created_at);
    }
}
