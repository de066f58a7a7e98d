//! Query provider: finds application secrets that expire within a threshold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::error::DirectoryResult;
use super::graph_client::GraphClient;
use super::models::{DirectoryApplication, GraphApplication};

/// Source of applications with secrets that are expired or about to expire.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait SecretExpirationProvider: Send + Sync {
    /// Returns one entry per credential whose remaining validity is `<= threshold_days`.
    ///
    /// Fails as a whole; a partial listing is never returned.
    async fn get_applications_with_potential_expired_secrets(
        &self,
        threshold_days: u32,
    ) -> DirectoryResult<Vec<DirectoryApplication>>;
}

/// Microsoft Graph backed provider.
pub struct GraphSecretExpirationProvider {
    client: Arc<GraphClient>,
}

impl GraphSecretExpirationProvider {
    pub fn new(client: Arc<GraphClient>) -> Self {
        Self { client }
    }

    fn applications_url(&self) -> String {
        format!(
            "{}/applications?$select=id,appId,displayName,passwordCredentials&$top=999",
            self.client.base_url()
        )
    }
}

#[async_trait]
impl SecretExpirationProvider for GraphSecretExpirationProvider {
    async fn get_applications_with_potential_expired_secrets(
        &self,
        threshold_days: u32,
    ) -> DirectoryResult<Vec<DirectoryApplication>> {
        let applications: Vec<GraphApplication> =
            self.client.get_all_pages(&self.applications_url()).await?;

        let selected = select_expiring_secrets(&applications, threshold_days, Utc::now());

        info!(
            "Scanned {} application(s), {} secret(s) within {} day(s) of expiry",
            applications.len(),
            selected.len(),
            threshold_days
        );
        Ok(selected)
    }
}

/// Whole days left between `now` and the credential's end, truncated toward zero.
///
/// A secret ending in 23 hours has 0 days left, and so does one that ended 23 hours ago.
pub fn remaining_valid_days(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_days()
}

/// Picks the credentials whose remaining validity is within `threshold_days`.
///
/// Keeps the directory order of applications and of credentials within each application.
/// Credentials without an end date never expire and are skipped.
pub fn select_expiring_secrets(
    applications: &[GraphApplication],
    threshold_days: u32,
    now: DateTime<Utc>,
) -> Vec<DirectoryApplication> {
    let mut selected = Vec::new();

    for app in applications {
        let name = app
            .display_name
            .clone()
            .or_else(|| app.app_id.clone())
            .unwrap_or_else(|| app.id.clone());

        if app.password_credentials.is_empty() {
            trace!(application_name = %name, "Application does not have any secrets");
            continue;
        }

        for credential in &app.password_credentials {
            let Some(expires_at) = credential.end_date_time else {
                debug!(
                    application_name = %name,
                    key_id = %credential.key_id,
                    "Secret has no end date, skipping"
                );
                continue;
            };

            let remaining = remaining_valid_days(expires_at, now);
            if remaining > i64::from(threshold_days) {
                trace!(
                    application_name = %name,
                    key_id = %credential.key_id,
                    remaining_valid_days = remaining,
                    "Secret is still valid"
                );
                continue;
            }

            selected.push(DirectoryApplication {
                name: name.clone(),
                key_id: credential.key_id.clone(),
                expires_at,
                remaining_valid_days: remaining,
            });
        }
    }

    selected
}
