mod file_config;

pub use file_config::{DirectoryConfig, EventGridConfig, FileConfig};

use crate::directory::{CloudEnvironment, DirectoryCredentials};
use crate::logging::LogFormat;
use anyhow::{anyhow, bail, Context, Result};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

pub const DEFAULT_EXPIRATION_THRESHOLD_DAYS: u32 = 30;
pub const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 24 * 60;
/// One year.
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 366 * 24 * 60;
pub const DEFAULT_EVENT_URI: &str = "https://secret-expiry-watcher/client-secrets";
pub const DEFAULT_GRAPH_API_VERSION: &str = "v1.0";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub expiration_threshold_days: u32,
    pub event_uri: String,
    pub check_interval_minutes: u64,
    pub run_on_startup: bool,
    pub metrics_port: u16,
    pub log_format: LogFormat,
    pub dry_run: bool,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub cloud: Option<String>,
    pub topic_endpoint: Option<String>,
    pub topic_key: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            expiration_threshold_days: DEFAULT_EXPIRATION_THRESHOLD_DAYS,
            event_uri: DEFAULT_EVENT_URI.to_string(),
            check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
            run_on_startup: true,
            metrics_port: 9091,
            log_format: LogFormat::Text,
            dry_run: false,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            cloud: None,
            topic_endpoint: None,
            topic_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 0 disables the admin/metrics server.
    pub metrics_port: u16,
    pub log_format: LogFormat,
    /// Log events instead of publishing them.
    pub dry_run: bool,

    pub job: SecretExpirationJobSettings,
    pub directory: DirectorySettings,
    /// Absent in dry-run mode.
    pub event_grid: Option<EventGridSettings>,
}

#[derive(Debug, Clone)]
pub struct SecretExpirationJobSettings {
    pub expiration_threshold_days: u32,
    pub event_uri: Url,
    pub interval: Duration,
    pub run_on_startup: bool,
}

#[derive(Debug, Clone)]
pub struct DirectorySettings {
    pub credentials: DirectoryCredentials,
    pub cloud: CloudEnvironment,
    pub login_endpoint: String,
    pub graph_endpoint: String,
    pub api_version: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl DirectorySettings {
    /// Versioned Graph root, e.g. `https://graph.microsoft.com/v1.0`.
    pub fn graph_base_url(&self) -> String {
        format!(
            "{}/{}",
            self.graph_endpoint.trim_end_matches('/'),
            self.api_version
        )
    }
}

#[derive(Debug, Clone)]
pub struct EventGridSettings {
    pub topic_endpoint: Url,
    pub auth_key: Option<SecretString>,
    pub timeout: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let log_format = match file.log_format.as_deref() {
            Some(s) => LogFormat::parse(s).ok_or_else(|| anyhow!("Invalid log_format: {}", s))?,
            None => cli.log_format,
        };
        let dry_run = file.dry_run.unwrap_or(cli.dry_run);

        let job = resolve_job_settings(cli, &file)?;
        let directory = resolve_directory_settings(cli, file.directory.unwrap_or_default())?;

        let event_grid = if dry_run {
            None
        } else {
            Some(resolve_event_grid_settings(
                cli,
                file.event_grid.unwrap_or_default(),
            )?)
        };

        Ok(Self {
            metrics_port,
            log_format,
            dry_run,
            job,
            directory,
            event_grid,
        })
    }
}

fn resolve_job_settings(cli: &CliConfig, file: &FileConfig) -> Result<SecretExpirationJobSettings> {
    let expiration_threshold_days = file
        .expiration_threshold_days
        .unwrap_or(cli.expiration_threshold_days);

    let event_uri_str = file.event_uri.clone().unwrap_or_else(|| cli.event_uri.clone());
    let event_uri = Url::parse(&event_uri_str)
        .with_context(|| format!("Invalid event URI: {}", event_uri_str))?;
    if event_uri.cannot_be_a_base() {
        bail!("Event URI must be an absolute URI: {}", event_uri_str);
    }

    let check_interval_minutes = file
        .check_interval_minutes
        .unwrap_or(cli.check_interval_minutes);
    if check_interval_minutes == 0 {
        bail!("check_interval_minutes must be greater than zero");
    }
    if check_interval_minutes > MAX_CHECK_INTERVAL_MINUTES {
        bail!(
            "check_interval_minutes must be at most {} (one year), got {}",
            MAX_CHECK_INTERVAL_MINUTES,
            check_interval_minutes
        );
    }
    let interval_secs = check_interval_minutes
        .checked_mul(60)
        .ok_or_else(|| anyhow!("check_interval_minutes is too large"))?;

    Ok(SecretExpirationJobSettings {
        expiration_threshold_days,
        event_uri,
        interval: Duration::from_secs(interval_secs),
        run_on_startup: file.run_on_startup.unwrap_or(cli.run_on_startup),
    })
}

fn resolve_directory_settings(cli: &CliConfig, dir: DirectoryConfig) -> Result<DirectorySettings> {
    let tenant_id = dir
        .tenant_id
        .or_else(|| cli.tenant_id.clone())
        .ok_or_else(|| anyhow!("tenant_id must be specified via --tenant-id or in config file"))?;
    let client_id = dir
        .client_id
        .or_else(|| cli.client_id.clone())
        .ok_or_else(|| anyhow!("client_id must be specified via --client-id or in config file"))?;
    let client_secret = dir
        .client_secret
        .or_else(|| cli.client_secret.clone())
        .ok_or_else(|| {
            anyhow!("client_secret must be specified via DIRECTORY_CLIENT_SECRET or in config file")
        })?;

    let cloud = match dir.cloud.or_else(|| cli.cloud.clone()) {
        Some(s) => CloudEnvironment::parse(&s).ok_or_else(|| anyhow!("Unknown cloud: {}", s))?,
        None => CloudEnvironment::default(),
    };

    let login_endpoint = dir
        .login_endpoint
        .unwrap_or_else(|| cloud.login_endpoint().to_string());
    let graph_endpoint = dir
        .graph_endpoint
        .unwrap_or_else(|| cloud.graph_endpoint().to_string());
    Url::parse(&login_endpoint).with_context(|| format!("Invalid login endpoint: {}", login_endpoint))?;
    Url::parse(&graph_endpoint).with_context(|| format!("Invalid Graph endpoint: {}", graph_endpoint))?;

    Ok(DirectorySettings {
        credentials: DirectoryCredentials {
            tenant_id,
            client_id,
            client_secret: SecretString::from(client_secret),
        },
        cloud,
        login_endpoint,
        graph_endpoint,
        api_version: dir
            .api_version
            .unwrap_or_else(|| DEFAULT_GRAPH_API_VERSION.to_string()),
        max_retries: dir.max_retries.unwrap_or(3),
        timeout: Duration::from_secs(dir.timeout_secs.unwrap_or(30)),
    })
}

fn resolve_event_grid_settings(cli: &CliConfig, eg: EventGridConfig) -> Result<EventGridSettings> {
    let endpoint = eg
        .topic_endpoint
        .or_else(|| cli.topic_endpoint.clone())
        .ok_or_else(|| {
            anyhow!("topic_endpoint must be specified via --topic-endpoint or in config file (or use --dry-run)")
        })?;
    let topic_endpoint =
        Url::parse(&endpoint).with_context(|| format!("Invalid topic endpoint: {}", endpoint))?;

    Ok(EventGridSettings {
        topic_endpoint,
        auth_key: eg.auth_key.or_else(|| cli.topic_key.clone()).map(SecretString::from),
        timeout: Duration::from_secs(eg.timeout_secs.unwrap_or(10)),
    })
}
