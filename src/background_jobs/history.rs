//! In-memory job run history and schedule state.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Runs kept per job; older entries are dropped.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
            JobRunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: u64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    /// How the job was triggered: "schedule", "hook:OnStartup", "manual", etc.
    pub triggered_by: String,
}

#[derive(Debug, Clone)]
pub struct JobScheduleState {
    pub job_id: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Run records and next-run times for every registered job.
pub struct JobHistory {
    capacity: usize,
    next_run_id: AtomicU64,
    runs: Mutex<HashMap<String, VecDeque<JobRun>>>,
    schedules: Mutex<HashMap<String, JobScheduleState>>,
}

impl Default for JobHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl JobHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_run_id: AtomicU64::new(1),
            runs: Mutex::new(HashMap::new()),
            schedules: Mutex::new(HashMap::new()),
        }
    }

    /// Records a new running entry and returns its run id.
    pub fn record_job_start(&self, job_id: &str, triggered_by: &str) -> u64 {
        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let run = JobRun {
            id,
            job_id: job_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: JobRunStatus::Running,
            error_message: None,
            triggered_by: triggered_by.to_string(),
        };

        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let job_runs = runs.entry(job_id.to_string()).or_default();
        job_runs.push_front(run);
        job_runs.truncate(self.capacity);
        id
    }

    pub fn record_job_finish(
        &self,
        run_id: u64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = runs
            .values_mut()
            .flat_map(|job_runs| job_runs.iter_mut())
            .find(|run| run.id == run_id)
        {
            run.finished_at = Some(Utc::now());
            run.status = status;
            run.error_message = error_message;
        }
    }

    /// Most recent run of a job, running or finished.
    pub fn get_last_run(&self, job_id: &str) -> Option<JobRun> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(job_id).and_then(|job_runs| job_runs.front().cloned())
    }

    /// Up to `limit` runs, newest first.
    pub fn get_job_history(&self, job_id: &str, limit: usize) -> Vec<JobRun> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(job_id)
            .map(|job_runs| job_runs.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_schedule_state(&self, job_id: &str) -> Option<JobScheduleState> {
        let schedules = self.schedules.lock().unwrap_or_else(PoisonError::into_inner);
        schedules.get(job_id).cloned()
    }

    pub fn update_schedule_state(&self, state: JobScheduleState) {
        let mut schedules = self.schedules.lock().unwrap_or_else(PoisonError::into_inner);
        schedules.insert(state.job_id.clone(), state);
    }

    pub fn clear_schedule_state(&self, job_id: &str) {
        let mut schedules = self.schedules.lock().unwrap_or_else(PoisonError::into_inner);
        schedules.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_finish_run() {
        let history = JobHistory::default();

        let run_id = history.record_job_start("job", "manual");
        assert_eq!(
            history.get_last_run("job").unwrap().status,
            JobRunStatus::Running
        );

        history.record_job_finish(run_id, JobRunStatus::Failed, Some("boom".to_string()));

        let last = history.get_last_run("job").unwrap();
        assert_eq!(last.status, JobRunStatus::Failed);
        assert_eq!(last.error_message.as_deref(), Some("boom"));
        assert!(last.finished_at.is_some());
    }

    #[test]
    fn test_history_is_newest_first_and_bounded() {
        let history = JobHistory::new(3);

        for _ in 0..5 {
            let id = history.record_job_start("job", "schedule");
            history.record_job_finish(id, JobRunStatus::Completed, None);
        }

        let runs = history.get_job_history("job", 10);
        assert_eq!(runs.len(), 3);
        assert!(runs[0].id > runs[1].id);
        assert_eq!(runs[0].id, 5);
    }

    #[test]
    fn test_unknown_job_has_no_history() {
        let history = JobHistory::default();
        assert!(history.get_job_history("missing", 10).is_empty());
        assert!(history.get_last_run("missing").is_none());
        assert!(history.get_schedule_state("missing").is_none());
    }

    #[test]
    fn test_schedule_state_roundtrip() {
        let history = JobHistory::default();
        let next = Utc::now();

        history.update_schedule_state(JobScheduleState {
            job_id: "job".to_string(),
            next_run_at: next,
            last_run_at: None,
        });

        assert_eq!(history.get_schedule_state("job").unwrap().next_run_at, next);
    }
}
