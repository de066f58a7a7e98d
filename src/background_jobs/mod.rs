//! Background job scheduling and execution system.
//!
//! Jobs run on fixed intervals and/or in response to hooks such as startup.
//! A job never runs twice concurrently, and failed runs are routed to an
//! unobserved-error handler so they are never silently dropped.

mod context;
mod handle;
mod history;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use history::{JobHistory, JobRun, JobRunStatus};
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{
    create_scheduler, log_unobserved_error, JobScheduler, UnobservedErrorHandler,
    UnobservedJobError,
};
