//! Secret Expiry Watcher Library
//!
//! Watches directory application registrations for client secrets that expired or
//! are about to expire and publishes a notification event for each one.

pub mod background_jobs;
pub mod config;
pub mod directory;
pub mod events;
pub mod logging;
pub mod server;

// Re-export commonly used types for convenience
pub use background_jobs::jobs::{ClientSecretExpirationJob, ClientSecretExpirationJobOptions};
pub use directory::{DirectoryApplication, SecretExpirationProvider};
pub use events::{CloudEvent, EventPublisher, ExpirationEventType};
