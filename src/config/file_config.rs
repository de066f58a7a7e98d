use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub expiration_threshold_days: Option<u32>,
    pub event_uri: Option<String>,
    pub check_interval_minutes: Option<u64>,
    pub run_on_startup: Option<bool>,
    pub metrics_port: Option<u16>,
    pub log_format: Option<String>,
    pub dry_run: Option<bool>,

    // Integrations
    pub directory: Option<DirectoryConfig>,
    pub event_grid: Option<EventGridConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DirectoryConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// "global", "us_government" or "china"
    pub cloud: Option<String>,
    /// Overrides the cloud's login host
    pub login_endpoint: Option<String>,
    /// Overrides the cloud's Graph host
    pub graph_endpoint: Option<String>,
    pub api_version: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EventGridConfig {
    pub topic_endpoint: Option<String>,
    pub auth_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
expiration_threshold_days = 14
event_uri = "https://watcher.contoso.com/client-secrets"
check_interval_minutes = 60
run_on_startup = false

[directory]
tenant_id = "contoso.onmicrosoft.com"
client_id = "11111111-1111-1111-1111-111111111111"
client_secret = "shh"
cloud = "us_government"

[event_grid]
topic_endpoint = "https://topic.westeurope-1.eventgrid.azure.net/api/events"
auth_key = "key"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();

        assert_eq!(config.expiration_threshold_days, Some(14));
        assert_eq!(config.check_interval_minutes, Some(60));
        assert_eq!(config.run_on_startup, Some(false));
        let directory = config.directory.unwrap();
        assert_eq!(directory.cloud.as_deref(), Some("us_government"));
        assert_eq!(directory.client_secret.as_deref(), Some("shh"));
        assert!(config.event_grid.unwrap().topic_endpoint.is_some());
    }

    #[test]
    fn test_load_empty_config() {
        let file = NamedTempFile::new().unwrap();
        let config = FileConfig::load(file.path()).unwrap();
        assert!(config.expiration_threshold_days.is_none());
        assert!(config.directory.is_none());
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "expiration_threshold_days = \"thirty\"").unwrap();
        assert!(FileConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(FileConfig::load(Path::new("/nonexistent/watcher.toml")).is_err());
    }
}
