//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that enabled subsystems have what they need
//! - Detect services that would shadow the job route
//!
//! Returns all validation errors, not just the first.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `jobs.queue.project`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }

    for (field, value) in [
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.dispatch_secs", config.timeouts.dispatch_secs),
        ("timeouts.upstream_secs", config.timeouts.upstream_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if config.jobs.enabled {
        let jobs = &config.jobs;
        if !jobs.route.starts_with('/') || jobs.route.len() < 2 {
            errors.push(ValidationError::new("jobs.route", "must be an absolute path like /downloader/url"));
        }
        check_url(&mut errors, "jobs.target", &jobs.target);
        check_url(&mut errors, "jobs.queue.endpoint", &jobs.queue.endpoint);
        check_not_empty(&mut errors, "jobs.queue.project", &jobs.queue.project);
        check_not_empty(&mut errors, "jobs.queue.location", &jobs.queue.location);
        check_not_empty(&mut errors, "jobs.queue.queue", &jobs.queue.queue);
        if jobs.outbound_buffer == 0 {
            errors.push(ValidationError::new("jobs.outbound_buffer", "must be greater than zero"));
        }
    }

    if config.broker.enabled {
        let broker = &config.broker;
        check_url(&mut errors, "broker.endpoint", &broker.endpoint);
        check_not_empty(&mut errors, "broker.project", &broker.project);
        check_not_empty(&mut errors, "broker.subscription", &broker.subscription);
        if broker.max_messages == 0 {
            errors.push(ValidationError::new("broker.max_messages", "must be greater than zero"));
        }
        if broker.backoff_base_ms == 0 {
            errors.push(ValidationError::new("broker.backoff_base_ms", "must be greater than zero"));
        }
    }

    let job_prefix = config
        .jobs
        .route
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default();
    let mut seen = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        let field = format!("services[{}]", i);
        if service.name.is_empty() || service.name.contains('/') {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                "must be a single non-empty path segment",
            ));
        } else if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate service '{}'", service.name),
            ));
        } else if service.name == "admin" || (config.jobs.enabled && service.name == job_prefix) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("'{}' is reserved", service.name),
            ));
        }
        check_url(&mut errors, &format!("{}.target", field), &service.target);
        if service.timeout_secs == Some(0) {
            errors.push(ValidationError::new(
                format!("{}.timeout_secs", field),
                "must be greater than zero",
            ));
        }
    }

    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_not_empty(&mut errors, "admin.api_key", &config.admin.api_key);
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_not_empty(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e))),
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{}'", value)));
    }
}
