//! Identity directory access: authentication, Graph paging, and expiring-secret selection.

mod auth;
mod cloud;
mod error;
mod graph_client;
mod models;
mod provider;

pub use auth::{DirectoryCredentials, TokenCache};
pub use cloud::CloudEnvironment;
pub use error::{DirectoryError, DirectoryResult};
pub use graph_client::{GraphClient, ODataResponse};
pub use models::{DirectoryApplication, GraphApplication, PasswordCredential};
#[cfg(any(test, feature = "mock"))]
pub use provider::MockSecretExpirationProvider;
pub use provider::{
    remaining_valid_days, select_expiring_secrets, GraphSecretExpirationProvider,
    SecretExpirationProvider,
};
