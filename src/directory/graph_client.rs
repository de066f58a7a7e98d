//! Microsoft Graph HTTP client with token injection, retries and OData pagination.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::auth::TokenCache;
use super::error::{DirectoryError, DirectoryResult};

/// Upper bound for the doubling retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(MAX_BACKOFF)
}

/// `OData` error response from Microsoft Graph.
#[derive(Debug, Deserialize)]
pub struct ODataError {
    pub error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ODataErrorBody {
    pub code: String,
    pub message: String,
}

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
pub struct ODataResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

pub struct GraphClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    base_url: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl GraphClient {
    /// `base_url` is the versioned Graph root, e.g. `https://graph.microsoft.com/v1.0`.
    pub fn new(
        http_client: reqwest::Client,
        token_cache: Arc<TokenCache>,
        base_url: &str,
        max_retries: u32,
    ) -> Self {
        Self {
            http_client,
            token_cache,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
            initial_backoff: Duration::from_secs(1),
        }
    }

    /// Overrides the first retry delay. Subsequent delays double.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs a GET with bearer token, retrying on throttling and gateway errors.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> DirectoryResult<T> {
        let mut retries = 0;
        let mut delay = self.initial_backoff;

        loop {
            let token = self.token_cache.get_token().await?;
            let response = self
                .http_client
                .get(url)
                .bearer_auth(&token)
                .send()
                .await?;
            let status = response.status();

            let transient = matches!(
                status,
                reqwest::StatusCode::TOO_MANY_REQUESTS
                    | reqwest::StatusCode::BAD_GATEWAY
                    | reqwest::StatusCode::SERVICE_UNAVAILABLE
                    | reqwest::StatusCode::GATEWAY_TIMEOUT
            );
            if transient || status == reqwest::StatusCode::UNAUTHORIZED {
                if retries >= self.max_retries {
                    if transient {
                        return Err(DirectoryError::MaxRetriesExceeded {
                            attempts: retries,
                            status: status.as_u16(),
                        });
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(Self::error_from_body(status, body));
                }
                retries += 1;

                if status == reqwest::StatusCode::UNAUTHORIZED {
                    warn!(
                        "Token rejected, refreshing (retry {}/{})",
                        retries, self.max_retries
                    );
                    self.token_cache.invalidate().await;
                    continue;
                }

                let wait = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(delay);
                warn!(
                    "Transient error {}, retry {}/{} after {:?}",
                    status, retries, self.max_retries, wait
                );
                tokio::time::sleep(wait).await;
                delay = next_backoff(delay);
                continue;
            }

            if status.is_success() {
                let body = response.text().await?;
                return serde_json::from_str(&body).map_err(DirectoryError::from);
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_from_body(status, body));
        }
    }

    /// Fetches every page of a collection, following `@odata.nextLink` until it is absent.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        initial_url: &str,
    ) -> DirectoryResult<Vec<T>> {
        let mut items = Vec::new();
        let mut url = initial_url.to_string();
        let mut pages = 0usize;

        loop {
            debug!("Fetching page: {}", url);
            let page: ODataResponse<T> = self.get(&url).await?;
            pages += 1;
            items.extend(page.value);

            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!("Fetched {} items across {} page(s)", items.len(), pages);
        Ok(items)
    }

    fn error_from_body(status: reqwest::StatusCode, body: String) -> DirectoryError {
        match serde_json::from_str::<ODataError>(&body) {
            Ok(odata) => DirectoryError::GraphApi {
                code: odata.error.code,
                message: odata.error.message,
            },
            Err(_) => DirectoryError::GraphApi {
                code: status.to_string(),
                message: body,
            },
        }
    }
}
