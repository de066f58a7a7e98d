use super::context::JobContext;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::history::{JobHistory, JobRunStatus, JobScheduleState};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::server::metrics;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Longest the scheduler sleeps before re-evaluating schedules.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// How long shutdown waits for each running job.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// A job run that failed or panicked with nobody awaiting its result.
#[derive(Debug, Clone)]
pub struct UnobservedJobError {
    pub job_id: String,
    pub job_name: String,
    pub error: String,
}

/// Receives every failed run. Receiving the error counts as observing it.
pub type UnobservedErrorHandler = Arc<dyn Fn(&UnobservedJobError) + Send + Sync>;

/// Logs the failure at error level and lets the scheduler carry on.
pub fn log_unobserved_error(err: &UnobservedJobError) {
    error!(
        job_id = %err.job_id,
        job_name = %err.job_name,
        "Unhandled exception in job {}: {}",
        err.job_name,
        err.error
    );
}

/// A run in flight, owned by the scheduler loop.
struct RunningJob {
    run_id: u64,
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Currently running jobs (not shared, managed by scheduler loop)
    running: HashMap<String, RunningJob>,

    /// Run records and next-run times.
    history: Arc<JobHistory>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Job tasks report `(job_id, run_id)` here when they finish.
    completion_tx: mpsc::UnboundedSender<(String, u64)>,
    completion_rx: mpsc::UnboundedReceiver<(String, u64)>,

    /// Token to signal scheduler shutdown. Job tokens are children of it.
    shutdown_token: CancellationToken,

    unobserved_error_handler: UnobservedErrorHandler,
}

impl JobScheduler {
    pub fn new(
        history: Arc<JobHistory>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            shared_state,
            running: HashMap::new(),
            history,
            command_receiver,
            completion_tx,
            completion_rx,
            shutdown_token,
            unobserved_error_handler: Arc::new(log_unobserved_error),
        }
    }

    /// Replace the handler that receives failed runs.
    pub fn set_unobserved_error_handler(&mut self, handler: UnobservedErrorHandler) {
        self.unobserved_error_handler = handler;
    }

    /// Register a job with the scheduler.
    ///
    /// Interval jobs get their first run one interval from now; startup hooks cover
    /// the immediate run.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());

        if let Some(interval) = job.schedule().interval() {
            self.schedule_next_run(&job_id, interval, None);
        }

        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        // Fire OnStartup hooks
        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                Some((job_id, run_id)) = self.completion_rx.recv() => {
                    self.finish_job(&job_id, run_id).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }

        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    /// Calculate time until the next scheduled job should run.
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = MAX_IDLE;
        let now = Utc::now();

        let state = self.shared_state.read().await;
        for job_id in state.jobs.keys() {
            if state.running_jobs.contains(job_id) {
                continue;
            }

            if let Some(next_run) = self.get_next_run_time(job_id) {
                if next_run <= now {
                    return Duration::ZERO;
                }
                let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
                if duration < min_duration {
                    min_duration = duration;
                }
            }
        }

        min_duration
    }

    /// Next scheduled run; hook-only jobs have none.
    fn get_next_run_time(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.history
            .get_schedule_state(job_id)
            .map(|state| state.next_run_at)
    }

    /// Run all jobs that are due for scheduled execution.
    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let state = self.shared_state.read().await;
            for job_id in state.jobs.keys() {
                if state.running_jobs.contains(job_id) {
                    debug!("Skipping scheduled run for already running job: {}", job_id);
                    continue;
                }

                if let Some(next_run) = self.get_next_run_time(job_id) {
                    if next_run <= now {
                        jobs_to_run.push(job_id.clone());
                    }
                }
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Trigger all jobs that listen for a specific hook event.
    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    debug!("Skipping hook trigger for already running job: {}", job_id);
                    continue;
                }

                if job.schedule().listens_to(event) {
                    jobs_to_trigger.push(job_id.clone());
                }
            }
        }

        for job_id in jobs_to_trigger {
            let trigger = format!("hook:{}", event);
            self.spawn_job(&job_id, &trigger).await;
        }
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let mut state = self.shared_state.write().await;
            let job = match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            };
            if !state.running_jobs.insert(job_id.to_string()) {
                debug!("Job {} is already running, not starting another run", job_id);
                return;
            }
            job
        };

        let run_id = self.history.record_job_start(job_id, triggered_by);
        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        // Push next_run_at out now so the loop doesn't re-fire while this run is in flight.
        if let Some(interval) = job.schedule().interval() {
            self.schedule_next_run(job_id, interval, None);
        }

        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.shutdown_token.child_token();
        let ctx = JobContext::new(cancel_token.clone(), triggered_by);

        let history = Arc::clone(&self.history);
        let shared_state = Arc::clone(&self.shared_state);
        let completion_tx = self.completion_tx.clone();
        let handler = Arc::clone(&self.unobserved_error_handler);
        let job_id_owned = job_id.to_string();
        let job_name = job.name().to_string();

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            // Inner task so a panic surfaces as a JoinError instead of tearing this one down
            let task_job = Arc::clone(&job);
            let result = tokio::spawn(async move { task_job.execute(&ctx).await }).await;
            let elapsed = start_time.elapsed();

            let (status, error_msg, status_label) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None, "success")
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Cancelled,
                        Some("Cancelled".to_string()),
                        "cancelled",
                    )
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()), "failed")
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (
                        JobRunStatus::Failed,
                        Some(format!("Task panic: {}", e)),
                        "panic",
                    )
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);
            history.record_job_finish(run_id, status, error_msg.clone());

            {
                let mut state = shared_state.write().await;
                state.running_jobs.remove(&job_id_owned);
            }

            if status == JobRunStatus::Failed {
                metrics::record_unobserved_job_error(&job_id_owned);
                handler(&UnobservedJobError {
                    job_id: job_id_owned.clone(),
                    job_name,
                    error: error_msg.unwrap_or_default(),
                });
            }

            let _ = completion_tx.send((job_id_owned, run_id));
        });

        self.running.insert(
            job_id.to_string(),
            RunningJob {
                run_id,
                handle,
                cancel_token,
            },
        );
    }

    /// Reap a finished run and schedule the next one.
    ///
    /// A completion for a run that was already replaced by a newer one is ignored.
    async fn finish_job(&mut self, job_id: &str, run_id: u64) {
        match self.running.get(job_id) {
            Some(running) if running.run_id == run_id => {}
            _ => {
                debug!("Ignoring stale completion of {} run {}", job_id, run_id);
                return;
            }
        }
        if let Some(running) = self.running.remove(job_id) {
            let _ = running.handle.await;
            self.update_schedule_after_run(job_id).await;
        }
    }

    /// Stores the next interval run. An interval that overflows the clock leaves the
    /// job without a scheduled run.
    fn schedule_next_run(
        &self,
        job_id: &str,
        interval: Duration,
        last_run_at: Option<DateTime<Utc>>,
    ) {
        let now = Utc::now();
        let next_run_at = TimeDelta::from_std(interval)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta));

        match next_run_at {
            Some(next_run_at) => self.history.update_schedule_state(JobScheduleState {
                job_id: job_id.to_string(),
                next_run_at,
                last_run_at,
            }),
            None => {
                error!(
                    "Interval {:?} of job {} is out of range, no scheduled run",
                    interval, job_id
                );
                self.history.clear_schedule_state(job_id);
            }
        }
    }

    /// Update schedule state after a job completes (for interval-based jobs).
    async fn update_schedule_after_run(&self, job_id: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => return,
            }
        };

        if let Some(interval) = job.schedule().interval() {
            self.schedule_next_run(job_id, interval, Some(Utc::now()));
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        // Cancel cancellable jobs
        {
            let state = self.shared_state.read().await;
            for job_id in &state.running_jobs {
                if let Some(job) = state.jobs.get(job_id) {
                    if job.shutdown_behavior() == ShutdownBehavior::Cancellable {
                        if let Some(running) = self.running.get(job_id) {
                            debug!("Cancelling job: {}", job_id);
                            running.cancel_token.cancel();
                        }
                    }
                }
            }
        }

        let mut wait_jobs = Vec::new();
        for (job_id, running) in self.running.drain() {
            let behavior = {
                let state = self.shared_state.read().await;
                state
                    .jobs
                    .get(&job_id)
                    .map(|j| j.shutdown_behavior())
                    .unwrap_or_default()
            };
            wait_jobs.push((job_id, running.handle, behavior));
        }

        for (job_id, handle, behavior) in wait_jobs {
            if behavior == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} to complete...", job_id);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                error!("Job {} did not stop within {:?}", job_id, SHUTDOWN_GRACE);
            }
        }

        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    history: Arc<JobHistory>,
    shutdown_token: CancellationToken,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState {
        jobs: HashMap::new(),
        running_jobs: HashSet::new(),
    }));

    let scheduler = JobScheduler::new(
        Arc::clone(&history),
        command_rx,
        shutdown_token,
        Arc::clone(&shared_state),
    );

    let handle = SchedulerHandle::new(command_tx, shared_state, history);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::job::JobSchedule;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    // Test job implementation
    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        execution_count: Arc<AtomicUsize>,
        should_fail: Arc<AtomicBool>,
        run_for: Duration,
    }

    impl TestJob {
        fn on_startup(id: &'static str, execution_count: Arc<AtomicUsize>) -> Self {
            Self {
                id,
                schedule: JobSchedule::Hook(HookEvent::OnStartup),
                execution_count,
                should_fail: Arc::new(AtomicBool::new(false)),
                run_for: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }

        async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
            if !self.run_for.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.run_for) => {}
                    _ = ctx.cancellation_token.cancelled() => return Err(JobError::Cancelled),
                }
            }
            if self.should_fail.load(Ordering::SeqCst) {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl BackgroundJob for PanickingJob {
        fn id(&self) -> &'static str {
            "panicking_job"
        }
        fn name(&self) -> &'static str {
            "Panicking Job"
        }
        fn description(&self) -> &'static str {
            "Panics on every run"
        }
        fn schedule(&self) -> JobSchedule {
            JobSchedule::Hook(HookEvent::OnStartup)
        }
        async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            panic!("job blew up");
        }
    }

    fn create_test_scheduler() -> (JobScheduler, SchedulerHandle, CancellationToken) {
        let shutdown_token = CancellationToken::new();
        let (scheduler, handle) =
            create_scheduler(Arc::new(JobHistory::default()), shutdown_token.clone());
        (scheduler, handle, shutdown_token)
    }

    fn capture_unobserved(scheduler: &mut JobScheduler) -> Arc<Mutex<Vec<UnobservedJobError>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scheduler.set_unobserved_error_handler(Arc::new(move |err: &UnobservedJobError| {
            sink.lock().unwrap().push(err.clone());
        }));
        seen
    }

    #[tokio::test]
    async fn test_register_and_list_jobs() {
        let (mut scheduler, handle, _shutdown) = create_test_scheduler();
        assert!(handle.list_jobs().await.is_empty());

        for id in ["job_b", "job_a"] {
            let job = TestJob::on_startup(id, Arc::new(AtomicUsize::new(0)));
            scheduler.register_job(Arc::new(job)).await;
        }

        let jobs = handle.list_jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "job_a");
        assert_eq!(jobs[1].id, "job_b");
        assert!(!jobs[0].is_running);
        assert!(jobs[0].last_run.is_none());
        assert_eq!(scheduler.job_count().await, 2);
        assert!(handle.job_exists("job_a").await);
        assert!(!handle.job_exists("nonexistent").await);
    }

    #[tokio::test]
    async fn test_interval_job_gets_next_run_on_registration() {
        let (mut scheduler, handle, _shutdown) = create_test_scheduler();
        let job = TestJob {
            schedule: JobSchedule::Interval(Duration::from_secs(3600)),
            ..TestJob::on_startup("interval_job", Arc::new(AtomicUsize::new(0)))
        };
        scheduler.register_job(Arc::new(job)).await;

        let info = handle.get_job("interval_job").await.unwrap();
        assert_eq!(info.schedule.schedule_type, "interval");
        assert!(info.next_run_at.is_some());
    }

    #[tokio::test]
    async fn test_job_execution_on_startup_hook() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = TestJob::on_startup("startup_job", exec_count.clone());
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(exec_count.load(Ordering::SeqCst), 1);
        let history = handle.get_job_history("startup_job", 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].triggered_by, "hook:OnStartup");

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_interval_job_runs_when_due() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = TestJob {
            schedule: JobSchedule::Interval(Duration::from_millis(50)),
            ..TestJob::on_startup("interval_job", exec_count.clone())
        };
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(exec_count.load(Ordering::SeqCst) >= 2);
        let history = handle.get_job_history("interval_job", 10);
        assert_eq!(history[0].triggered_by, "schedule");

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_failed_job_reaches_unobserved_handler_once() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();
        let seen = capture_unobserved(&mut scheduler);

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = TestJob {
            should_fail: Arc::new(AtomicBool::new(true)),
            ..TestJob::on_startup("failing_job", exec_count.clone())
        };
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(exec_count.load(Ordering::SeqCst), 1);
        let history = handle.get_job_history("failing_job", 10);
        assert_eq!(history[0].status, "failed");
        assert!(history[0]
            .error_message
            .as_ref()
            .unwrap()
            .contains("Test failure"));

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].job_id, "failing_job");
            assert_eq!(seen[0].job_name, "Test Job");
            assert!(seen[0].error.contains("Test failure"));
        }

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded_and_scheduler_survives() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();
        let seen = capture_unobserved(&mut scheduler);
        scheduler.register_job(Arc::new(PanickingJob)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;

        let history = handle.get_job_history("panicking_job", 10);
        assert_eq!(history[0].status, "failed");
        assert!(history[0]
            .error_message
            .as_ref()
            .unwrap()
            .starts_with("Task panic"));
        assert_eq!(seen.lock().unwrap().len(), 1);

        // Still accepting commands
        assert!(handle.trigger_job("panicking_job").await.is_ok());

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_trigger_unknown_job() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        let result = handle.trigger_job("nonexistent").await;
        assert!(matches!(result, Err(JobError::NotFound)));

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_no_concurrent_runs_of_same_job() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = TestJob {
            run_for: Duration::from_millis(500),
            ..TestJob::on_startup("slow_job", exec_count.clone())
        };
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_job_running("slow_job").await);

        let result = handle.trigger_job("slow_job").await;
        assert!(matches!(result, Err(JobError::AlreadyRunning)));
        assert_eq!(exec_count.load(Ordering::SeqCst), 1);

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    /// First run finishes at once, later runs take a long time.
    struct FastThenSlowJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl BackgroundJob for FastThenSlowJob {
        fn id(&self) -> &'static str {
            "fast_then_slow"
        }
        fn name(&self) -> &'static str {
            "Fast Then Slow"
        }
        fn description(&self) -> &'static str {
            "Instant first run, slow afterwards"
        }
        fn schedule(&self) -> JobSchedule {
            JobSchedule::Hook(HookEvent::OnStartup)
        }
        async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
            if self.runs.fetch_add(1, Ordering::SeqCst) > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                    _ = ctx.cancellation_token.cancelled() => return Err(JobError::Cancelled),
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_late_completion_does_not_reap_newer_run() {
        let (mut scheduler, handle, _shutdown) = create_test_scheduler();
        scheduler
            .register_job(Arc::new(FastThenSlowJob {
                runs: AtomicUsize::new(0),
            }))
            .await;

        scheduler.spawn_job("fast_then_slow", "manual").await;
        let (job_id, first_run) = scheduler.completion_rx.recv().await.unwrap();
        assert_eq!(job_id, "fast_then_slow");

        // The first run already left the running set, so a new run starts before its
        // completion is processed.
        scheduler.spawn_job("fast_then_slow", "manual").await;
        assert!(handle.is_job_running("fast_then_slow").await);

        let finished = tokio::time::timeout(
            Duration::from_millis(500),
            scheduler.finish_job(&job_id, first_run),
        )
        .await;
        assert!(finished.is_ok(), "stale completion must not wait on the new run");

        let running = scheduler.running.get("fast_then_slow").unwrap();
        assert_ne!(running.run_id, first_run);

        scheduler.shutdown().await;
        let history = handle.get_job_history("fast_then_slow", 10);
        assert_eq!(history[0].status, "cancelled");
        assert_eq!(history[1].status, "completed");
    }

    #[tokio::test]
    async fn test_out_of_range_interval_is_not_scheduled() {
        let (mut scheduler, handle, _shutdown) = create_test_scheduler();
        let job = TestJob {
            schedule: JobSchedule::Interval(Duration::from_secs(60 * 1_000_000_000_000)),
            ..TestJob::on_startup("huge_interval", Arc::new(AtomicUsize::new(0)))
        };
        scheduler.register_job(Arc::new(job)).await;

        let info = handle.get_job("huge_interval").await.unwrap();
        assert!(info.next_run_at.is_none());
        assert_eq!(scheduler.time_until_next_scheduled_job().await, MAX_IDLE);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_job() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();
        let seen = capture_unobserved(&mut scheduler);

        let job = TestJob {
            run_for: Duration::from_secs(30),
            ..TestJob::on_startup("long_job", Arc::new(AtomicUsize::new(0)))
        };
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_token.cancel();

        let stopped = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
        assert!(stopped.is_ok(), "scheduler should stop promptly");

        let history = handle.get_job_history("long_job", 10);
        assert_eq!(history[0].status, "cancelled");
        assert!(seen.lock().unwrap().is_empty());
    }
}
