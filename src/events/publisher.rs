//! Event publish sinks.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::cloud_event::{CloudEvent, CLOUD_EVENTS_CONTENT_TYPE};

/// Header carrying the topic access key.
const SAS_KEY_HEADER: &str = "aeg-sas-key";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection to {endpoint} failed: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Publish rejected: status {status}, body: {body}")]
    Rejected { status: u16, body: String },

    #[error("Publish failed: {0}")]
    SendFailed(String),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        match self {
            PublishError::ConnectionFailed { .. } | PublishError::Timeout(_) => true,
            PublishError::Rejected { status, .. } => *status == 429 || *status >= 500,
            PublishError::Serialization(_) | PublishError::SendFailed(_) => false,
        }
    }
}

/// Sink that accepts notification events.
///
/// `publish` returns once the transport acknowledged the event.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &CloudEvent) -> Result<(), PublishError>;
}

/// Publishes single events to an HTTP topic endpoint in CloudEvents structured mode.
pub struct HttpEventPublisher {
    endpoint: String,
    auth_key: Option<SecretString>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpEventPublisher {
    /// `timeout` bounds each publish request, regardless of the client's own settings.
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        auth_key: Option<SecretString>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            auth_key,
            timeout,
            client,
        }
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, event: &CloudEvent) -> Result<(), PublishError> {
        let event = event.clone().stamped(Utc::now());
        let body = event.to_json_bytes()?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, CLOUD_EVENTS_CONTENT_TYPE)
            .body(body);

        if let Some(ref key) = self.auth_key {
            request = request.header(SAS_KEY_HEADER, key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PublishError::Timeout(self.timeout)
            } else if e.is_connect() {
                PublishError::ConnectionFailed {
                    endpoint: self.endpoint.clone(),
                    message: e.to_string(),
                }
            } else {
                PublishError::SendFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(event_id = %event.id, status = status.as_u16(), "Event acknowledged");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(PublishError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Writes events to the log instead of sending them. Used for dry runs.
#[derive(Debug, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: &CloudEvent) -> Result<(), PublishError> {
        let event = event.clone().stamped(Utc::now());
        let json = serde_json::to_string(&event)?;
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Dry run, not publishing: {}",
            json
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PublishError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(PublishError::Rejected {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!PublishError::Rejected {
            status: 401,
            body: String::new()
        }
        .is_transient());
    }

    #[tokio::test]
    async fn test_log_publisher_always_acknowledges() {
        let publisher = LogEventPublisher;
        let event = CloudEvent::new("id", "https://example.com", "ClientSecretExpired");

        assert!(publisher.publish(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let publisher = HttpEventPublisher::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/api/events",
            None,
            Duration::from_secs(5),
        );
        let event = CloudEvent::new("id", "https://example.com", "ClientSecretExpired");

        let err = publisher.publish(&event).await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }
}
