//! Notification events: envelope, factory, and publish sinks.

mod cloud_event;
mod factory;
mod publisher;

pub use cloud_event::{CloudEvent, CLOUD_EVENTS_CONTENT_TYPE, CLOUD_EVENTS_SPEC_VERSION};
pub use factory::{
    create_expiration_event, default_event_factory, EventFactory, ExpirationEventType,
};
#[cfg(any(test, feature = "mock"))]
pub use publisher::MockEventPublisher;
pub use publisher::{EventPublisher, HttpEventPublisher, LogEventPublisher, PublishError};
