use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application registration as returned by `GET /applications`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphApplication {
    pub id: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub password_credentials: Vec<PasswordCredential>,
}

/// Client secret attached to an application registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordCredential {
    pub key_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
}

/// One `(application, credential)` pair whose secret expires within the threshold.
///
/// `remaining_valid_days` is negative once the secret has expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryApplication {
    pub name: String,
    pub key_id: String,
    pub expires_at: DateTime<Utc>,
    pub remaining_valid_days: i64,
}
