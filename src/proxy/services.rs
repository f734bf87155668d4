//! The table of proxied backend services.
//!
//! # Design Decisions
//! - Built once from configuration, immutable at runtime
//! - Lookup is by the first path segment, exact and case-sensitive

use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::config::ServiceConfig;

/// One proxied backend.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    target: Url,
    pub timeout: Duration,
}

impl Service {
    /// Upstream URL for a request to `/{name}/{path}?{query}`.
    pub fn url_for(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!(
            "{}/{}",
            self.target.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceTable {
    services: HashMap<String, Service>,
}

impl ServiceTable {
    /// `default_timeout` applies to services without their own.
    pub fn from_config(
        configs: &[ServiceConfig],
        default_timeout: Duration,
    ) -> Result<Self, (String, url::ParseError)> {
        let mut services = HashMap::new();
        for config in configs {
            let target = Url::parse(&config.target).map_err(|e| (config.name.clone(), e))?;
            let timeout = config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout);
            services.insert(
                config.name.clone(),
                Service {
                    name: config.name.clone(),
                    target,
                    timeout,
                },
            );
        }
        Ok(Self { services })
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
