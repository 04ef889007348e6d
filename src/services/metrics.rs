//! Prometheus metric families for the gateway, namespace `api_gateway`.
//!
//! The `client` label is `"<name>-<version>"`, or `"unknown-unknown"` when a
//! request never produced an authenticated caller.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::error::Result;

const NAMESPACE: &str = "api_gateway";

pub const UNKNOWN_CLIENT_LABEL: &str = "unknown-unknown";

/// Registry plus the request-path metric families from the external
/// interface contract.
pub struct MetricsService {
    registry: Registry,

    pub requests_total: IntCounterVec,
    pub request_duration_ms: HistogramVec,
    pub request_size_bytes: HistogramVec,
    pub response_size_bytes: HistogramVec,
    pub requests_in_flight: IntGaugeVec,
    pub request_timeouts_total: IntCounterVec,
    pub request_errors_total: IntCounterVec,
}

impl MetricsService {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total number of proxied requests").namespace(NAMESPACE),
            &["client", "status_code"],
        )?;

        let request_duration_ms = HistogramVec::new(
            HistogramOpts::new(
                "request_duration_milliseconds",
                "Request duration in milliseconds",
            )
            .namespace(NAMESPACE)
            .buckets(vec![
                10.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0,
            ]),
            &["client"],
        )?;

        let size_buckets = vec![100.0, 1024.0, 10240.0, 102400.0, 1048576.0, 10485760.0];

        let request_size_bytes = HistogramVec::new(
            HistogramOpts::new("request_size_bytes", "Request size in bytes")
                .namespace(NAMESPACE)
                .buckets(size_buckets.clone()),
            &["client"],
        )?;

        let response_size_bytes = HistogramVec::new(
            HistogramOpts::new("response_size_bytes", "Response size in bytes")
                .namespace(NAMESPACE)
                .buckets(size_buckets),
            &["client", "status_code"],
        )?;

        let requests_in_flight = IntGaugeVec::new(
            Opts::new(
                "requests_in_flight",
                "Number of requests currently being processed",
            )
            .namespace(NAMESPACE),
            &["client"],
        )?;

        let request_timeouts_total = IntCounterVec::new(
            Opts::new(
                "request_timeouts_total",
                "Total number of gateway timeouts (504)",
            )
            .namespace(NAMESPACE),
            &["client"],
        )?;

        let request_errors_total = IntCounterVec::new(
            Opts::new("request_errors_total", "Total number of 5xx responses")
                .namespace(NAMESPACE),
            &["client", "error_type"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_ms.clone()))?;
        registry.register(Box::new(request_size_bytes.clone()))?;
        registry.register(Box::new(response_size_bytes.clone()))?;
        registry.register(Box::new(requests_in_flight.clone()))?;
        registry.register(Box::new(request_timeouts_total.clone()))?;
        registry.register(Box::new(request_errors_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_ms,
            request_size_bytes,
            response_size_bytes,
            requests_in_flight,
            request_timeouts_total,
            request_errors_total,
        })
    }

    /// Metric label identifying a caller.
    pub fn client_label(name: &str, version: &str) -> String {
        format!("{name}-{version}")
    }

    /// 5xx statuses decompose into error-kind buckets.
    pub fn error_type(status: u16) -> &'static str {
        match status {
            500 => "internal_error",
            502 => "bad_gateway",
            503 => "service_unavailable",
            504 => "gateway_timeout",
            505..=599 | 501 => "http_5xx",
            _ => "unknown",
        }
    }

    /// Text exposition of every registered family.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        Ok(encoder.encode_to_string(&families)?)
    }
}
