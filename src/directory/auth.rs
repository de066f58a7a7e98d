//! OAuth2 client-credentials authentication against the directory's identity provider.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::error::{DirectoryError, DirectoryResult};

/// App registration used by the watcher itself to read the directory.
#[derive(Debug, Clone)]
pub struct DirectoryCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Returns true if the token is expired or will expire within the grace period.
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Caches the bearer token between runs and refreshes it shortly before expiry.
#[derive(Debug)]
pub struct TokenCache {
    credentials: DirectoryCredentials,
    login_endpoint: String,
    scope: String,
    http_client: reqwest::Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    grace_period: Duration,
}

impl TokenCache {
    /// `graph_endpoint` is the resource the token is requested for (`{graph}/.default`).
    pub fn new(
        credentials: DirectoryCredentials,
        login_endpoint: &str,
        graph_endpoint: &str,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            credentials,
            login_endpoint: login_endpoint.trim_end_matches('/').to_string(),
            scope: format!("{}/.default", graph_endpoint.trim_end_matches('/')),
            http_client,
            cached_token: Arc::new(RwLock::new(None)),
            grace_period: Duration::minutes(5),
        }
    }

    /// Gets a valid access token, refreshing if necessary.
    #[instrument(skip(self), fields(tenant_id = %self.credentials.tenant_id))]
    pub async fn get_token(&self) -> DirectoryResult<String> {
        {
            let cache = self.cached_token.read().await;
            if let Some(ref token) = *cache {
                if !token.is_expired(self.grace_period) {
                    debug!("Using cached token");
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("Refreshing access token");
        let new_token = self.acquire_token().await?;

        let mut cache = self.cached_token.write().await;
        *cache = Some(new_token.clone());

        Ok(new_token.access_token)
    }

    async fn acquire_token(&self) -> DirectoryResult<CachedToken> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint, self.credentials.tenant_id
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            (
                "client_secret",
                self.credentials.client_secret.expose_secret(),
            ),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DirectoryError::Auth(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Auth(format!(
                "Token request failed with status {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Auth(format!("Failed to parse token response: {}", e)))?;

        let expires_at = token_expiry(Utc::now(), token_response.expires_in)?;
        debug!(
            "Acquired new token, expires at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at,
        })
    }

    /// Drops the cached token, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        let mut cache = self.cached_token.write().await;
        *cache = None;
    }
}

/// Absolute expiry of a token valid for `expires_in` seconds from `now`.
fn token_expiry(now: DateTime<Utc>, expires_in: i64) -> DirectoryResult<DateTime<Utc>> {
    Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            DirectoryError::Auth(format!("Token response has invalid expires_in: {}", expires_in))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_rejects_out_of_range_lifetime() {
        let now = Utc::now();
        assert_eq!(
            token_expiry(now, 3600).unwrap(),
            now + Duration::seconds(3600)
        );
        assert!(matches!(
            token_expiry(now, i64::MAX),
            Err(DirectoryError::Auth(_))
        ));
    }

    #[test]
    fn test_cached_token_expiry() {
        let token = CachedToken {
            access_token: "test".to_string(),
            expires_at: Utc::now() + Duration::minutes(10),
        };

        assert!(!token.is_expired(Duration::minutes(5)));
        assert!(token.is_expired(Duration::minutes(15)));
    }

    #[test]
    fn test_scope_built_from_graph_endpoint() {
        let cache = TokenCache::new(
            DirectoryCredentials {
                tenant_id: "tenant".to_string(),
                client_id: "client".to_string(),
                client_secret: SecretString::from("secret".to_string()),
            },
            "https://login.microsoftonline.com/",
            "https://graph.microsoft.com/",
            reqwest::Client::new(),
        );

        assert_eq!(cache.scope, "https://graph.microsoft.com/.default");
        assert_eq!(cache.login_endpoint, "https://login.microsoftonline.com");
    }
}
