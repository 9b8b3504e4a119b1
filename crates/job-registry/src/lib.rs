//! In-memory registry tracking long running bulk verification jobs.
//!
//! Jobs are process-local bookkeeping only; nothing is persisted. The
//! registry retains at most the last ten error strings per job.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const MAX_RETAINED_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    pub status: JobStatus,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub success_rows: usize,
    pub error_rows: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub output_path: Option<String>,
    pub output_filename: Option<String>,
    pub errors: Vec<String>,
    pub metadata: serde_json::Value,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_job(
        &self,
        kind: &str,
        total_rows: usize,
        metadata: Option<serde_json::Value>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let job = Job {
            id,
            kind: kind.to_string(),
            status: JobStatus::Pending,
            total_rows,
            processed_rows: 0,
            success_rows: 0,
            error_rows: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            message: None,
            output_path: None,
            output_filename: None,
            errors: vec![],
            metadata: metadata.unwrap_or(serde_json::Value::Null),
        };
        self.jobs.lock().insert(id, job);
        id
    }

    pub fn start_job(&self, id: Uuid) {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(&id) {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        }
    }

    pub fn increment(
        &self,
        id: Uuid,
        success: bool,
        message: Option<&str>,
        error_detail: Option<&str>,
    ) {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return;
        };
        job.processed_rows += 1;
        if success {
            job.success_rows += 1;
        } else {
            job.error_rows += 1;
            if let Some(detail) = error_detail {
                push_error(&mut job.errors, detail);
            }
        }
        if let Some(message) = message {
            job.message = Some(message.to_string());
        }
    }

    pub fn complete_job(&self, id: Uuid, output_path: &str, output_filename: &str) {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(&id) {
            job.status = JobStatus::Completed;
            job.finished_at = Some(Utc::now());
            job.output_path = Some(output_path.to_string());
            job.output_filename = Some(output_filename.to_string());
        }
    }

    pub fn fail_job(&self, id: Uuid, error_detail: &str) {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(&id) {
            job.status = JobStatus::Failed;
            job.finished_at = Some(Utc::now());
            job.message = Some(error_detail.to_string());
            push_error(&mut job.errors, error_detail);
        }
    }

    /// Returns a snapshot clone so callers cannot mutate registry state.
    pub fn get_job(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().get(&id).cloned()
    }
}

fn push_error(errors: &mut Vec<String>, detail: &str) {
    errors.push(detail.to_string());
    if errors.len() > MAX_RETAINED_ERRORS {
        let excess = errors.len() - MAX_RETAINED_ERRORS;
        errors.drain(0..excess);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lifecycle() {
        let registry = JobRegistry::new();
        let id = registry.create_job("verify_csv", 3, None);

        let job = registry.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_rows, 3);

        registry.start_job(id);
        assert_eq!(registry.get_job(id).unwrap().status, JobStatus::Running);

        registry.increment(id, true, Some("row 1 done"), None);
        registry.increment(id, false, None, Some("row 2: bad address"));
        registry.increment(id, true, None, None);

        let job = registry.get_job(id).unwrap();
        assert_eq!(job.processed_rows, 3);
        assert_eq!(job.success_rows, 2);
        assert_eq!(job.error_rows, 1);
        assert_eq!(job.errors, vec!["row 2: bad address"]);

        registry.complete_job(id, "/tmp/out", "results.csv");
        let job = registry.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.finished_at.is_some());
        assert_eq!(job.output_filename.as_deref(), Some("results.csv"));
    }

    #[test]
    fn error_log_is_bounded() {
        let registry = JobRegistry::new();
        let id = registry.create_job("verify_csv", 20, None);
        registry.start_job(id);
        for i in 0..15 {
            registry.increment(id, false, None, Some(&format!("error {i}")));
        }
        let job = registry.get_job(id).unwrap();
        assert_eq!(job.errors.len(), 10);
        assert_eq!(job.errors[0], "error 5");
        assert_eq!(job.errors[9], "error 14");
    }

    #[test]
    fn fail_job_records_detail() {
        let registry = JobRegistry::new();
        let id = registry.create_job("find_csv", 1, Some(serde_json::json!({"source": "upload"})));
        registry.fail_job(id, "input file vanished");
        let job = registry.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message.as_deref(), Some("input file vanished"));
        assert_eq!(job.errors, vec!["input file vanished"]);
    }

    #[test]
    fn unknown_job_operations_are_noops() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        registry.start_job(id);
        registry.increment(id, true, None, None);
        registry.fail_job(id, "nope");
        assert!(registry.get_job(id).is_none());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = JobRegistry::new();
        let id = registry.create_job("verify_csv", 1, None);
        let mut snapshot = registry.get_job(id).unwrap();
        snapshot.success_rows = 99;
        assert_eq!(registry.get_job(id).unwrap().success_rows, 0);
    }
}
