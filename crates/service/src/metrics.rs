use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static BACKEND_CALLS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static BACKEND_CALL_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static VERIFIED_TERMS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static EXTRA_VERIFIED_TERMS_TOTAL: OnceLock<IntCounter> = OnceLock::new();

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("scan_http_requests_total", "Scan service HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create scan_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "scan_http_request_duration_seconds",
                    "Scan service HTTP request duration in seconds.",
                )
                .buckets(DURATION_BUCKETS.to_vec()),
                &["route", "method", "outcome"],
            )
            .expect("create scan_http_request_duration_seconds"),
        )
    })
}

fn backend_calls_total() -> &'static IntCounterVec {
    BACKEND_CALLS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "scan_backend_calls_total",
                    "Calls made to the index and the profile service.",
                ),
                &["operation", "outcome"],
            )
            .expect("create scan_backend_calls_total"),
        )
    })
}

fn backend_call_duration_seconds() -> &'static HistogramVec {
    BACKEND_CALL_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "scan_backend_call_duration_seconds",
                    "Duration of calls to the index and the profile service.",
                )
                .buckets(DURATION_BUCKETS.to_vec()),
                &["operation"],
            )
            .expect("create scan_backend_call_duration_seconds"),
        )
    })
}

fn verified_terms_total() -> &'static IntCounterVec {
    VERIFIED_TERMS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "scan_verified_terms_total",
                    "Candidate terms by verification outcome.",
                ),
                &["outcome"],
            )
            .expect("create scan_verified_terms_total"),
        )
    })
}

fn extra_verified_terms_total() -> &'static IntCounter {
    EXTRA_VERIFIED_TERMS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "scan_extra_verified_terms_total",
                "Positive terms verified beyond the requested count.",
            )
            .expect("create scan_extra_verified_terms_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_backend_call(operation: &str, outcome: &str, duration: Duration) {
    backend_calls_total()
        .with_label_values(&[operation, outcome])
        .inc();
    backend_call_duration_seconds()
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// `outcome` is one of `positive`, `zero` or `failed`.
pub fn observe_verified_term(outcome: &str) {
    verified_terms_total().with_label_values(&[outcome]).inc();
}

pub fn add_extra_verified_terms(extra: usize) {
    extra_verified_terms_total().inc_by(extra as u64);
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = extra_verified_terms_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
