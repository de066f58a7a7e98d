//! Client secret expiration background job.
//!
//! Queries the directory for application secrets that expired or expire within
//! the configured threshold and publishes one notification event per secret.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};
use url::Url;

use crate::background_jobs::{
    BackgroundJob, HookEvent, JobContext, JobError, JobSchedule, ShutdownBehavior,
};
use crate::config::SecretExpirationJobSettings;
use crate::directory::{DirectoryError, SecretExpirationProvider};
use crate::events::{
    default_event_factory, EventFactory, EventPublisher, ExpirationEventType, PublishError,
};
use crate::server::metrics;

#[derive(Debug, Error)]
pub enum SecretExpirationError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Directory query failed: {0}")]
    DirectoryQuery(#[from] DirectoryError),

    #[error("Publishing event for secret {key_id} failed after {published} event(s): {source}")]
    Publish {
        key_id: String,
        published: usize,
        #[source]
        source: PublishError,
    },

    #[error("Run was cancelled")]
    Cancelled,
}

impl From<SecretExpirationError> for JobError {
    fn from(err: SecretExpirationError) -> Self {
        match err {
            SecretExpirationError::Cancelled => JobError::Cancelled,
            other => JobError::ExecutionFailed(other.to_string()),
        }
    }
}

/// Options for one job instance. Fixed for the job's lifetime.
#[derive(Clone)]
pub struct ClientSecretExpirationJobOptions {
    /// Secrets with this many days or fewer left are reported.
    pub expiration_threshold_days: u32,
    /// Used as the `source` of every event.
    pub event_uri: Url,
    pub interval: Duration,
    pub run_on_startup: bool,
    pub event_factory: EventFactory,
}

impl std::fmt::Debug for ClientSecretExpirationJobOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretExpirationJobOptions")
            .field("expiration_threshold_days", &self.expiration_threshold_days)
            .field("event_uri", &self.event_uri.as_str())
            .field("interval", &self.interval)
            .field("run_on_startup", &self.run_on_startup)
            .finish_non_exhaustive()
    }
}

impl ClientSecretExpirationJobOptions {
    pub fn from_settings(settings: &SecretExpirationJobSettings) -> Self {
        Self {
            expiration_threshold_days: settings.expiration_threshold_days,
            event_uri: settings.event_uri.clone(),
            interval: settings.interval,
            run_on_startup: settings.run_on_startup,
            event_factory: default_event_factory(),
        }
    }

    /// Replace the default event layout.
    pub fn with_event_factory(mut self, factory: EventFactory) -> Self {
        self.event_factory = factory;
        self
    }

    fn validate(&self) -> Result<(), SecretExpirationError> {
        if self.interval.is_zero() {
            return Err(SecretExpirationError::Configuration(
                "check interval must be greater than zero".to_string(),
            ));
        }
        if self.event_uri.cannot_be_a_base() {
            return Err(SecretExpirationError::Configuration(format!(
                "event URI {} is not a valid absolute URI",
                self.event_uri
            )));
        }
        Ok(())
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub expired: usize,
    pub about_to_expire: usize,
    pub published: usize,
}

pub struct ClientSecretExpirationJob {
    options: ClientSecretExpirationJobOptions,
    provider: Arc<dyn SecretExpirationProvider>,
    publisher: Arc<dyn EventPublisher>,
}

impl ClientSecretExpirationJob {
    pub fn new(
        options: ClientSecretExpirationJobOptions,
        provider: Arc<dyn SecretExpirationProvider>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, SecretExpirationError> {
        options.validate()?;
        Ok(Self {
            options,
            provider,
            publisher,
        })
    }

    /// Performs one query-and-publish pass.
    ///
    /// Events are published one at a time in query order. The first publish failure
    /// aborts the pass; events already acknowledged stay published.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SecretExpirationError> {
        trace!("Executing {}", self.name());

        if cancel.is_cancelled() {
            return Err(SecretExpirationError::Cancelled);
        }

        let threshold = self.options.expiration_threshold_days;
        let applications = tokio::select! {
            result = self.provider.get_applications_with_potential_expired_secrets(threshold) => {
                result.inspect_err(|e| {
                    metrics::record_directory_query_failure();
                    error!(
                        transient = e.is_transient(),
                        "Failed to query applications with expiring secrets: {}", e
                    );
                })?
            }
            _ = cancel.cancelled() => return Err(SecretExpirationError::Cancelled),
        };

        let mut summary = RunSummary::default();

        for application in &applications {
            if cancel.is_cancelled() {
                info!(
                    "Run cancelled after publishing {} of {} event(s)",
                    summary.published,
                    applications.len()
                );
                return Err(SecretExpirationError::Cancelled);
            }

            let event_type = ExpirationEventType::classify(application.remaining_valid_days);
            match event_type {
                ExpirationEventType::ClientSecretExpired => {
                    summary.expired += 1;
                    error!(
                        key_id = %application.key_id,
                        application_name = %application.name,
                        remaining_valid_days = application.remaining_valid_days,
                        "The secret {} for directory application {} has expired.",
                        application.key_id,
                        application.name
                    );
                }
                ExpirationEventType::ClientSecretAboutToExpire => {
                    summary.about_to_expire += 1;
                    warn!(
                        key_id = %application.key_id,
                        application_name = %application.name,
                        remaining_valid_days = application.remaining_valid_days,
                        "The secret {} for directory application {} will expire within {} days.",
                        application.key_id,
                        application.name,
                        application.remaining_valid_days
                    );
                }
            }
            metrics::record_secret_detected(event_type.label());

            let event =
                (self.options.event_factory)(application, event_type, &self.options.event_uri);

            let published = tokio::select! {
                result = self.publisher.publish(&event) => result,
                _ = cancel.cancelled() => return Err(SecretExpirationError::Cancelled),
            };

            if let Err(source) = published {
                metrics::record_event_publish_failure(event_type.as_str());
                error!(
                    key_id = %application.key_id,
                    transient = source.is_transient(),
                    published = summary.published,
                    remaining = applications.len() - summary.published,
                    "Aborting run, failed to publish event {}: {}",
                    event.id,
                    source
                );
                return Err(SecretExpirationError::Publish {
                    key_id: application.key_id.clone(),
                    published: summary.published,
                    source,
                });
            }

            metrics::record_event_published(event_type.as_str());
            summary.published += 1;
        }

        info!(
            "Secret expiration check finished: {} expired, {} about to expire, {} event(s) published",
            summary.expired, summary.about_to_expire, summary.published
        );
        trace!("Executing {} finished", self.name());
        Ok(summary)
    }
}

#[async_trait]
impl BackgroundJob for ClientSecretExpirationJob {
    fn id(&self) -> &'static str {
        "client_secret_expiration"
    }

    fn name(&self) -> &'static str {
        "Client Secret Expiration"
    }

    fn description(&self) -> &'static str {
        "Publish notification events for application client secrets that expired or are about to expire"
    }

    fn schedule(&self) -> JobSchedule {
        let hooks = if self.options.run_on_startup {
            vec![HookEvent::OnStartup]
        } else {
            vec![]
        };
        JobSchedule::Combined {
            interval: Some(self.options.interval),
            hooks,
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // A cancelled run is picked up fresh on the next tick
        ShutdownBehavior::Cancellable
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.run(&ctx.cancellation_token).await?;
        Ok(())
    }
}
