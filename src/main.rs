use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use secret_expiry_watcher::background_jobs::jobs::{
    ClientSecretExpirationJob, ClientSecretExpirationJobOptions,
};
use secret_expiry_watcher::background_jobs::{create_scheduler, BackgroundJob, JobHistory};
use secret_expiry_watcher::config::{
    AppConfig, CliConfig, FileConfig, DEFAULT_CHECK_INTERVAL_MINUTES,
    DEFAULT_EXPIRATION_THRESHOLD_DAYS, DEFAULT_EVENT_URI,
};
use secret_expiry_watcher::directory::{GraphClient, GraphSecretExpirationProvider, TokenCache};
use secret_expiry_watcher::events::{EventPublisher, HttpEventPublisher, LogEventPublisher};
use secret_expiry_watcher::logging::{init_logging, LogFormat};
use secret_expiry_watcher::server::{metrics, run_admin_server};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[clap(about = "Publishes events for directory client secrets that expired or are about to expire")]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Secrets with this many days or fewer of validity left are reported.
    #[clap(long, default_value_t = DEFAULT_EXPIRATION_THRESHOLD_DAYS)]
    pub expiration_threshold_days: u32,

    /// URI used as the source of every published event.
    #[clap(long, default_value = DEFAULT_EVENT_URI)]
    pub event_uri: String,

    /// Minutes between two checks.
    #[clap(long, default_value_t = DEFAULT_CHECK_INTERVAL_MINUTES)]
    pub check_interval_minutes: u64,

    /// Run a check as soon as the service starts.
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub run_on_startup: bool,

    /// Port for the admin server (health, metrics, jobs). 0 disables it.
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    #[clap(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Log events instead of publishing them.
    #[clap(long)]
    pub dry_run: bool,

    /// Run a single check and exit.
    #[clap(long)]
    pub once: bool,

    /// Directory tenant id or domain.
    #[clap(long, env = "DIRECTORY_TENANT_ID")]
    pub tenant_id: Option<String>,

    /// Client id of the app registration used to read the directory.
    #[clap(long, env = "DIRECTORY_CLIENT_ID")]
    pub client_id: Option<String>,

    #[clap(long, env = "DIRECTORY_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// National cloud: global, us_government or china.
    #[clap(long)]
    pub cloud: Option<String>,

    /// Event topic endpoint receiving the notifications.
    #[clap(long, env = "EVENT_GRID_TOPIC_ENDPOINT")]
    pub topic_endpoint: Option<String>,

    #[clap(long, env = "EVENT_GRID_AUTH_KEY", hide_env_values = true)]
    pub topic_key: Option<String>,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            expiration_threshold_days: args.expiration_threshold_days,
            event_uri: args.event_uri.clone(),
            check_interval_minutes: args.check_interval_minutes,
            run_on_startup: args.run_on_startup,
            metrics_port: args.metrics_port,
            log_format: args.log_format,
            dry_run: args.dry_run,
            tenant_id: args.tenant_id.clone(),
            client_id: args.client_id.clone(),
            client_secret: args.client_secret.clone(),
            cloud: args.cloud.clone(),
            topic_endpoint: args.topic_endpoint.clone(),
            topic_key: args.topic_key.clone(),
        }
    }
}

fn build_job(config: &AppConfig) -> Result<ClientSecretExpirationJob> {
    let http_client = reqwest::Client::builder()
        .timeout(config.directory.timeout)
        .build()
        .context("Failed to create HTTP client")?;

    let token_cache = Arc::new(TokenCache::new(
        config.directory.credentials.clone(),
        &config.directory.login_endpoint,
        &config.directory.graph_endpoint,
        http_client.clone(),
    ));
    let graph_client = Arc::new(GraphClient::new(
        http_client.clone(),
        token_cache,
        &config.directory.graph_base_url(),
        config.directory.max_retries,
    ));
    let provider = Arc::new(GraphSecretExpirationProvider::new(graph_client));

    let publisher: Arc<dyn EventPublisher> = match &config.event_grid {
        Some(event_grid) => {
            info!("Publishing events to {}", event_grid.topic_endpoint);
            Arc::new(HttpEventPublisher::new(
                http_client,
                event_grid.topic_endpoint.as_str(),
                event_grid.auth_key.clone(),
                event_grid.timeout,
            ))
        }
        None => {
            warn!("Dry run: events will be logged, not published");
            Arc::new(LogEventPublisher)
        }
    };

    let options = ClientSecretExpirationJobOptions::from_settings(&config.job);
    Ok(ClientSecretExpirationJob::new(options, provider, publisher)?)
}

/// Completes on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let app_config = AppConfig::resolve(&CliConfig::from(&cli_args), file_config)?;

    init_logging(app_config.log_format)?;
    info!(
        "Watching client secrets expiring within {} day(s), checking every {:?}",
        app_config.job.expiration_threshold_days, app_config.job.interval
    );

    info!("Initializing metrics...");
    metrics::init_metrics();

    let job = Arc::new(build_job(&app_config)?);
    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    if cli_args.once {
        let summary = job.run(&shutdown_token).await?;
        info!(
            "Single run finished: {} event(s) published",
            summary.published
        );
        return Ok(());
    }

    let (mut scheduler, scheduler_handle) =
        create_scheduler(Arc::new(JobHistory::default()), shutdown_token.clone());
    scheduler.register_job(job.clone()).await;
    info!(
        "Job scheduler initialized with {} job(s), {} runs every {:?}",
        scheduler.job_count().await,
        job.id(),
        app_config.job.interval
    );

    if app_config.metrics_port != 0 {
        let port = app_config.metrics_port;
        let server_token = shutdown_token.clone();
        tokio::spawn(async move {
            if let Err(e) = run_admin_server(port, scheduler_handle, server_token).await {
                error!("Admin server stopped: {:#}", e);
            }
        });
        info!("Metrics available at port {}!", port);
    }

    scheduler.run().await;
    Ok(())
}
