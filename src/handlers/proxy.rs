//! The proxy engine: resolves the caller's upstream target, forwards the
//! request, and relays the response (streamed when the upstream streams,
//! buffered otherwise). Upstream transport failures classify into gateway
//! errors instead of leaking raw client errors.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::error::{ApiError, Result};
use crate::middleware_layer::AuthContext;
use crate::state::AppState;

pub const PROXY_USER_AGENT: &str = "API-Gateway/1.0";

/// Request headers never forwarded upstream.
const SKIP_REQUEST_HEADERS: [&str; 3] = ["host", "content-length", "x-api-key"];

/// Response headers the gateway manages itself.
const SKIP_RESPONSE_HEADERS: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

/// Forward one request to the caller's version target and relay the reply.
pub async fn proxy_request(State(state): State<AppState>, request: Request) -> Result<Response> {
    let ctx = request
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| ApiError::internal("caller context missing in proxy handler"))?;

    let target = state
        .config
        .target_for(&ctx.client.version)
        .ok_or_else(|| {
            error!(version = %ctx.client.version, "no upstream target for version");
            ApiError::unsupported_version(&ctx.client.version)
        })?;
    let target_url = target.url.clone();
    let timeout = target.timeout();

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| ApiError::internal(format!("failed to read request body: {err}")))?;

    let mut upstream = state
        .http_client
        .request(parts.method.clone(), &target_url)
        .timeout(timeout)
        .header(header::USER_AGENT, PROXY_USER_AGENT);
    for (name, value) in filtered_request_headers(&parts.headers) {
        upstream = upstream.header(name, value);
    }
    if !body.is_empty() {
        upstream = upstream.header(header::CONTENT_LENGTH, body.len());
    }
    upstream = upstream.body(body);

    info!(target = %target_url, client_id = %ctx.client.id_hex(), "proxying request");
    let response = upstream.send().await.map_err(classify_upstream_error)?;

    info!(status = response.status().as_u16(), "received upstream response");
    forward_response(response).await
}

/// Copy upstream status and headers, then relay the body. Streaming replies
/// (SSE, plain text or chunked) flow through chunk by chunk; everything else
/// is buffered whole.
async fn forward_response(upstream: reqwest::Response) -> Result<Response> {
    let status = upstream.status();
    let streaming = is_streaming_response(upstream.headers());

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if SKIP_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    let body = if streaming {
        builder = builder.header(header::CACHE_CONTROL, "no-cache");
        let stream = upstream
            .bytes_stream()
            .take_while(|chunk| {
                let keep = chunk.is_ok();
                if let Err(err) = chunk {
                    // A mid-stream read failure ends the relay; what was
                    // already sent stands.
                    warn!(error = %err, "upstream stream interrupted");
                }
                std::future::ready(keep)
            })
            .map(|chunk| chunk.map_err(axum::Error::new));
        Body::from_stream(stream)
    } else {
        // The response head is not committed yet, so a body read failure
        // still classifies into a gateway error.
        let bytes = upstream.bytes().await.map_err(classify_upstream_error)?;
        Body::from(bytes)
    };

    builder
        .body(body)
        .map_err(|err| ApiError::internal(format!("failed to build response: {err}")))
}

/// Streaming iff the content type says events/plain text or the transfer
/// encoding is chunked.
fn is_streaming_response(headers: &HeaderMap) -> bool {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let transfer_encoding = headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    content_type.contains("text/event-stream")
        || content_type.contains("text/plain")
        || transfer_encoding.contains("chunked")
}

fn filtered_request_headers(headers: &HeaderMap) -> Vec<(HeaderName, HeaderValue)> {
    headers
        .iter()
        .filter(|(name, _)| !SKIP_REQUEST_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Map an upstream transport failure onto the gateway error space.
pub(crate) fn classify_upstream_error(err: reqwest::Error) -> ApiError {
    let text = error_chain_text(&err);

    if err.is_timeout() || text.contains("timeout") || text.contains("deadline exceeded") {
        return ApiError::UpstreamTimeout;
    }
    if err.is_connect() || text.contains("connection refused") || text.contains("no such host") {
        return ApiError::upstream("上游服务不可用");
    }
    ApiError::upstream(format!("上游服务错误: {err}"))
}

/// Flatten an error and its source chain into one lowercase haystack.
fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_streaming_detection() {
        assert!(is_streaming_response(&headers_with(
            header::CONTENT_TYPE,
            "text/event-stream"
        )));
        assert!(is_streaming_response(&headers_with(
            header::CONTENT_TYPE,
            "text/plain; charset=utf-8"
        )));
        assert!(is_streaming_response(&headers_with(
            header::TRANSFER_ENCODING,
            "chunked"
        )));
        assert!(!is_streaming_response(&headers_with(
            header::CONTENT_TYPE,
            "application/json"
        )));
        assert!(!is_streaming_response(&HeaderMap::new()));
    }

    #[test]
    fn test_request_header_filtering() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert("x-api-key", HeaderValue::from_static("ak_secret"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let forwarded = filtered_request_headers(&headers);
        let names: Vec<_> = forwarded.iter().map(|(name, _)| name.as_str()).collect();

        assert!(names.contains(&"x-custom"));
        assert!(names.contains(&"accept"));
        assert!(!names.contains(&"host"));
        assert!(!names.contains(&"content-length"));
        assert!(!names.contains(&"x-api-key"));
    }

    #[tokio::test]
    async fn test_connection_refused_classifies_as_unavailable() {
        // Bind-then-drop guarantees nothing listens on the port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = reqwest::Client::new();
        let err = client
            .get(format!("http://{addr}/"))
            .send()
            .await
            .unwrap_err();

        match classify_upstream_error(err) {
            ApiError::Upstream { message } => assert_eq!(message, "上游服务不可用"),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_classifies_as_gateway_timeout() {
        // A listener that accepts but never responds forces a client timeout.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _socket = listener.accept().await;
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let client = reqwest::Client::new();
        let err = client
            .get(format!("http://{addr}/"))
            .timeout(std::time::Duration::from_millis(100))
            .send()
            .await
            .unwrap_err();

        assert!(matches!(
            classify_upstream_error(err),
            ApiError::UpstreamTimeout
        ));
    }
}
