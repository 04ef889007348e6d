//! Metrics stage: counts, times and sizes every request that reaches the
//! business pipeline, labelled by caller and status code.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::header::CONTENT_LENGTH,
    middleware::Next,
    response::Response,
};

use super::{capture::observe_response_body, AuthContext};
use crate::services::metrics::{MetricsService, UNKNOWN_CLIENT_LABEL};
use crate::state::AppState;

pub async fn track(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let metrics = state.metrics.clone();

    let client_label = request
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| MetricsService::client_label(&ctx.client.name, &ctx.client.version))
        .unwrap_or_else(|| UNKNOWN_CLIENT_LABEL.to_string());

    let request_size = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    if request_size > 0 {
        metrics
            .request_size_bytes
            .with_label_values(&[&client_label])
            .observe(request_size as f64);
    }

    metrics
        .requests_in_flight
        .with_label_values(&[&client_label])
        .inc();

    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16();

    observe_response_body(response, 0, move |_captured, total_bytes| {
        let status_label = status.to_string();

        metrics
            .requests_in_flight
            .with_label_values(&[&client_label])
            .dec();
        metrics
            .requests_total
            .with_label_values(&[&client_label, &status_label])
            .inc();
        metrics
            .request_duration_ms
            .with_label_values(&[&client_label])
            .observe(started.elapsed().as_millis() as f64);
        metrics
            .response_size_bytes
            .with_label_values(&[&client_label, &status_label])
            .observe(total_bytes as f64);

        if status == 504 {
            metrics
                .request_timeouts_total
                .with_label_values(&[&client_label])
                .inc();
        }
        if status >= 500 {
            metrics
                .request_errors_total
                .with_label_values(&[&client_label, MetricsService::error_type(status)])
                .inc();
        }
    })
}
