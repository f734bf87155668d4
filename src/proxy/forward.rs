//! Forwarding of plain HTTP requests to backend services.
//!
//! # Responsibilities
//! - Resolve `/{service}/{*path}` to the service's upstream URL
//! - Forward method, query, body and a handful of headers
//! - Attach the outbound bearer token
//! - Map upstream failures to 502 and timeouts to 504

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use std::time::{Duration, Instant};

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::proxy::services::{Service, ServiceTable};

/// Largest request body forwarded upstream.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Request headers copied to the upstream request.
const FORWARDED_HEADERS: [&str; 4] = ["content-type", "accept", "accept-language", "x-request-id"];

/// Proxied services plus the client used to reach them.
pub struct Proxy {
    services: ServiceTable,
    client: reqwest::Client,
    token: Option<String>,
}

impl Proxy {
    pub fn new(services: ServiceTable, token: Option<String>) -> Self {
        Self {
            services,
            client: reqwest::Client::new(),
            token,
        }
    }

    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    pub async fn forward(&self, service: &Service, path: &str, request: Request) -> Result<Response, ApiError> {
        let (parts, body) = request.into_parts();
        let url = service.url_for(path, parts.uri.query());
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| ApiError::BadRequest)?;

        let mut builder = self
            .client
            .request(parts.method.clone(), &url)
            .timeout(service.timeout)
            .body(body);
        for name in FORWARDED_HEADERS {
            if let Some(value) = parts.headers.get(name) {
                builder = builder.header(name, value.clone());
            }
        }
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| upstream_error(&service.name, service.timeout, e))?;
        let status = upstream.status();
        let content_type = upstream.headers().get(CONTENT_TYPE).cloned();
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| upstream_error(&service.name, service.timeout, e))?;

        let mut response = Response::builder().status(status);
        if let Some(content_type) = content_type {
            response = response.header(CONTENT_TYPE, content_type);
        }
        response.body(Body::from(bytes)).map_err(|e| {
            tracing::error!(service = %service.name, error = %e, "Failed to build proxied response");
            ApiError::Internal
        })
    }
}

fn upstream_error(service: &str, timeout: Duration, e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        tracing::warn!(service = %service, timeout = ?timeout, "Upstream request timed out");
        ApiError::UpstreamTimeout
    } else {
        tracing::error!(service = %service, error = %e, "Upstream error");
        ApiError::Upstream
    }
}

/// `ANY /{service}/{*path}`
pub async fn proxy_handler(
    State(state): State<AppState>,
    Path((service, path)): Path<(String, String)>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        service = %service,
        path = %path,
        "Proxying request"
    );

    let Some(target) = state.proxy.services().get(&service) else {
        tracing::warn!(request_id = %request_id, service = %service, "No such service");
        return ApiError::UnknownService(service).into_response();
    };

    let response = match state.proxy.forward(target, &path, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    metrics::record_proxy_request(&service, response.status().as_u16(), start);
    response
}
