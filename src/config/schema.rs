//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// The asynchronous job route and its dispatch queue.
    pub jobs: JobsConfig,

    /// Broker subscription delivering job notifications.
    pub broker: BrokerConfig,

    /// Backend services proxied under `/{name}/...`.
    pub services: Vec<ServiceConfig>,

    /// Credentials for outbound calls.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub http: HttpConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for a plain HTTP request/response, in seconds.
    /// Websocket sessions are not bound by it.
    pub request_secs: u64,

    /// Time allowed for handing one job to the task queue, in seconds.
    pub dispatch_secs: u64,

    /// Default time allowed for a proxied upstream call, in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            dispatch_secs: 5,
            upstream_secs: 5,
        }
    }
}

/// Job route configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Mount the job route at all.
    pub enabled: bool,

    /// Websocket route clients connect to.
    pub route: String,

    /// URL the queued task calls with the job body.
    pub target: String,

    /// Accepted `Origin` header values. Requests without one are always accepted.
    pub allowed_origins: Vec<String>,

    /// Frames queued per connection before writers wait.
    pub outbound_buffer: usize,

    pub queue: QueueConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            route: "/downloader/url".to_string(),
            target: String::new(),
            allowed_origins: Vec::new(),
            outbound_buffer: 32,
            queue: QueueConfig::default(),
        }
    }
}

/// Cloud Tasks queue the jobs are dispatched to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// API root, e.g. "https://cloudtasks.googleapis.com".
    pub endpoint: String,
    pub project: String,
    pub location: String,
    pub queue: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://cloudtasks.googleapis.com".to_string(),
            project: String::new(),
            location: String::new(),
            queue: String::new(),
        }
    }
}

/// Pub/Sub subscription the job notifications arrive on.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Run the notification listener.
    pub enabled: bool,

    /// API root, e.g. "https://pubsub.googleapis.com".
    pub endpoint: String,
    pub project: String,
    pub subscription: String,

    /// Messages requested per pull.
    pub max_messages: u32,

    /// Wait between pulls that returned nothing, in milliseconds.
    pub poll_interval_ms: u64,

    /// Base delay for exponential backoff after errors, in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum backoff delay, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://pubsub.googleapis.com".to_string(),
            project: String::new(),
            subscription: String::new(),
            max_messages: 10,
            poll_interval_ms: 1000,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// A backend service proxied by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Path segment the service is mounted under.
    pub name: String,

    /// Base URL requests are forwarded to.
    pub target: String,

    /// Overrides `timeouts.upstream_secs` for this service.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Outbound credentials.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token attached to task queue, broker and service calls.
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). Empty uses the built-in filter.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: String::new(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Cross-origin settings for the HTTP routes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Answer every origin with permissive CORS headers.
    pub cors_allow_all: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            cors_allow_all: true,
        }
    }
}

impl GatewayConfig {
    /// Replace the port of the listener's bind address.
    pub fn override_port(&mut self, port: u16) {
        let host = match self.listener.bind_address.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.listener.bind_address.clone(),
        };
        self.listener.bind_address = format!("{}:{}", host, port);
    }

    /// Outbound bearer token, unless outbound auth is turned off.
    pub fn outbound_token(&self, insecure: bool) -> Option<String> {
        if insecure {
            None
        } else {
            self.auth.bearer_token.clone().filter(|t| !t.is_empty())
        }
    }
}
