use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all watcher metrics
const PREFIX: &str = "secret_expiry_watcher";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Background job metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Total background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is currently running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    pub static ref UNOBSERVED_JOB_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_unobserved_job_errors_total"), "Job failures routed to the unobserved error handler"),
        &["job_id"]
    ).expect("Failed to create unobserved_job_errors_total metric");

    // Secret expiration metrics
    pub static ref SECRETS_DETECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_secrets_detected_total"), "Client secrets found within the expiration threshold"),
        &["classification"]
    ).expect("Failed to create secrets_detected_total metric");

    pub static ref EVENTS_PUBLISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_events_published_total"), "Notification events acknowledged by the sink"),
        &["event_type"]
    ).expect("Failed to create events_published_total metric");

    pub static ref EVENT_PUBLISH_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_event_publish_failures_total"), "Notification events the sink failed to accept"),
        &["event_type"]
    ).expect("Failed to create event_publish_failures_total metric");

    pub static ref DIRECTORY_QUERY_FAILURES_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_directory_query_failures_total"),
        "Failed directory queries"
    ).expect("Failed to create directory_query_failures_total metric");
}

pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(UNOBSERVED_JOB_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SECRETS_DETECTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EVENT_PUBLISH_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DIRECTORY_QUERY_FAILURES_TOTAL.clone()));
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_unobserved_job_error(job_id: &str) {
    UNOBSERVED_JOB_ERRORS_TOTAL.with_label_values(&[job_id]).inc();
}

pub fn record_secret_detected(classification: &str) {
    SECRETS_DETECTED_TOTAL
        .with_label_values(&[classification])
        .inc();
}

pub fn record_event_published(event_type: &str) {
    EVENTS_PUBLISHED_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn record_event_publish_failure(event_type: &str) {
    EVENT_PUBLISH_FAILURES_TOTAL
        .with_label_values(&[event_type])
        .inc();
}

pub fn record_directory_query_failure() {
    DIRECTORY_QUERY_FAILURES_TOTAL.inc();
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        ),
    }
}
