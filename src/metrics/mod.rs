//! Metrics module
//!
//! Prometheus counters and histograms for the upload engine, registered in
//! the default registry. Recording can be switched off with
//! `metrics.enabled: false`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "kumo_uploads_total",
        "Total number of uploads",
        &["mode", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "kumo_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "kumo_upload_duration_seconds",
        "Upload duration in seconds",
        &["mode"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
    ).unwrap();

    // Multipart metrics
    pub static ref CHUNK_RETRIES: Counter = register_counter!(
        "kumo_chunk_retries_total",
        "Part uploads retried after a failure"
    ).unwrap();

    pub static ref MULTIPART_ABORTS: Counter = register_counter!(
        "kumo_multipart_aborts_total",
        "Multipart sessions aborted after a failure"
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "kumo_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "kumo_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Turn recording on or off process-wide
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Record a successful upload
pub fn record_upload_success(mode: &str, bytes: u64, duration_secs: f64) {
    if !is_enabled() {
        return;
    }
    UPLOADS_TOTAL.with_label_values(&[mode, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    UPLOAD_DURATION.with_label_values(&[mode]).observe(duration_secs);
}

/// Record a failed upload and its error classification
pub fn record_upload_failure(mode: &str, error_type: &str) {
    if !is_enabled() {
        return;
    }
    UPLOADS_TOTAL.with_label_values(&[mode, "failure"]).inc();
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

pub fn record_chunk_retry() {
    if is_enabled() {
        CHUNK_RETRIES.inc();
    }
}

pub fn record_multipart_abort() {
    if is_enabled() {
        MULTIPART_ABORTS.inc();
    }
}

/// Record the part count of a completed multipart upload
pub fn record_multipart_parts(parts_count: usize) {
    if is_enabled() {
        MULTIPART_PARTS.observe(parts_count as f64);
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8_lossy(&buffer).into_owned()
}
