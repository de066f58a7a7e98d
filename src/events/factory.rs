//! Builds notification events for expiring client secrets.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use super::cloud_event::CloudEvent;
use crate::directory::DirectoryApplication;

/// Classification of a secret that crossed the notification threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpirationEventType {
    ClientSecretAboutToExpire,
    ClientSecretExpired,
}

impl ExpirationEventType {
    /// `Expired` iff the remaining validity is negative. Zero days left is still "about to expire".
    pub fn classify(remaining_valid_days: i64) -> Self {
        if remaining_valid_days < 0 {
            ExpirationEventType::ClientSecretExpired
        } else {
            ExpirationEventType::ClientSecretAboutToExpire
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirationEventType::ClientSecretAboutToExpire => "ClientSecretAboutToExpire",
            ExpirationEventType::ClientSecretExpired => "ClientSecretExpired",
        }
    }

    /// Label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ExpirationEventType::ClientSecretAboutToExpire => "about_to_expire",
            ExpirationEventType::ClientSecretExpired => "expired",
        }
    }
}

impl std::fmt::Display for ExpirationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Turns one expiring secret into an event. Must not perform I/O.
pub type EventFactory =
    Arc<dyn Fn(&DirectoryApplication, ExpirationEventType, &Url) -> CloudEvent + Send + Sync>;

pub fn default_event_factory() -> EventFactory {
    Arc::new(create_expiration_event)
}

/// Default event layout.
///
/// The id is derived from the inputs so that the same secret on the same day always
/// yields the same event, which lets consumers deduplicate repeated runs.
pub fn create_expiration_event(
    application: &DirectoryApplication,
    event_type: ExpirationEventType,
    event_uri: &Url,
) -> CloudEvent {
    let name = format!(
        "{}|{}|{}|{}",
        event_uri, event_type, application.key_id, application.remaining_valid_days
    );
    let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes());

    let data = serde_json::to_value(application).unwrap_or(serde_json::Value::Null);

    CloudEvent::new(id.to_string(), event_uri.as_str(), event_type.as_str())
        .with_subject(format!("/appregistrations/clientsecrets/{}", application.key_id))
        .with_json_data(data)
}
