//! Shared fixtures for the integration tests.
//!
//! A single `wiremock` server plays both the identity provider (token endpoint) and
//! Microsoft Graph, so tests only need one base URL.

#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use secret_expiry_watcher::directory::{DirectoryCredentials, GraphClient, TokenCache};

pub const TENANT_ID: &str = "contoso-tenant";
pub const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const ACCESS_TOKEN: &str = "test-access-token";
pub const APPLICATIONS_PATH: &str = "/v1.0/applications";
pub const TOPIC_PATH: &str = "/api/events";
pub const TOPIC_KEY: &str = "topic-sas-key";

pub fn token_path() -> String {
    format!("/{}/oauth2/v2.0/token", TENANT_ID)
}

pub fn credentials() -> DirectoryCredentials {
    DirectoryCredentials {
        tenant_id: TENANT_ID.to_string(),
        client_id: CLIENT_ID.to_string(),
        client_secret: SecretString::from("client-secret".to_string()),
    }
}

/// Mounts a token endpoint that always hands out [`ACCESS_TOKEN`].
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3600,
            "access_token": ACCESS_TOKEN
        })))
        .mount(server)
        .await;
}

/// Graph client pointed at the mock server, with short retry delays.
pub fn graph_client(server: &MockServer, max_retries: u32) -> Arc<GraphClient> {
    let http_client = reqwest::Client::new();
    let token_cache = Arc::new(TokenCache::new(
        credentials(),
        &server.uri(),
        &server.uri(),
        http_client.clone(),
    ));
    Arc::new(
        GraphClient::new(
            http_client,
            token_cache,
            &format!("{}/v1.0", server.uri()),
            max_retries,
        )
        .with_initial_backoff(Duration::from_millis(10)),
    )
}

/// Secret end date with exactly `days` whole days left.
///
/// Half an hour of slack away from zero keeps the count stable while the test runs.
pub fn end_date_in_days(days: i64) -> DateTime<Utc> {
    let slack = if days < 0 {
        TimeDelta::minutes(-30)
    } else {
        TimeDelta::minutes(30)
    };
    Utc::now() + TimeDelta::days(days) + slack
}

/// One Graph application with a single password credential.
pub fn application_json(name: &str, key_id: &str, days_left: i64) -> Value {
    application_with_secrets_json(name, &[(key_id, days_left)])
}

/// One Graph application with a password credential per `(key_id, days_left)`.
pub fn application_with_secrets_json(name: &str, secrets: &[(&str, i64)]) -> Value {
    let credentials: Vec<Value> = secrets
        .iter()
        .map(|(key_id, days_left)| {
            json!({
                "keyId": key_id,
                "displayName": "ci secret",
                "endDateTime": end_date_in_days(*days_left).to_rfc3339()
            })
        })
        .collect();

    json!({
        "id": format!("obj-{}", name.to_lowercase().replace(' ', "-")),
        "appId": format!("app-{}", name.to_lowercase().replace(' ', "-")),
        "displayName": name,
        "passwordCredentials": credentials
    })
}

pub fn page(applications: Vec<Value>, next_link: Option<String>) -> Value {
    match next_link {
        Some(link) => json!({ "value": applications, "@odata.nextLink": link }),
        None => json!({ "value": applications }),
    }
}

pub fn topic_endpoint(server: &MockServer) -> String {
    format!("{}{}", server.uri(), TOPIC_PATH)
}
