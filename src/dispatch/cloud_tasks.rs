//! Task queue client speaking the Cloud Tasks v2 REST API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::config::QueueConfig;
use crate::dispatch::request::DispatchRequest;
use crate::dispatch::{DispatchError, DispatchedJob, TaskQueue};

/// Creates HTTP tasks in one queue.
#[derive(Debug, Clone)]
pub struct CloudTasksQueue {
    client: reqwest::Client,
    tasks_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    name: String,
}

impl CloudTasksQueue {
    pub fn new(config: &QueueConfig, token: Option<String>) -> Self {
        let tasks_url = format!(
            "{}/v2/{}/tasks",
            config.endpoint.trim_end_matches('/'),
            queue_path(config)
        );
        Self {
            client: reqwest::Client::new(),
            tasks_url,
            token,
        }
    }

    pub fn tasks_url(&self) -> &str {
        &self.tasks_url
    }
}

/// `projects/{project}/locations/{location}/queues/{queue}`
pub fn queue_path(config: &QueueConfig) -> String {
    format!(
        "projects/{}/locations/{}/queues/{}",
        config.project, config.location, config.queue
    )
}

#[async_trait]
impl TaskQueue for CloudTasksQueue {
    async fn create_task(&self, request: DispatchRequest) -> Result<DispatchedJob, DispatchError> {
        let body = json!({
            "task": {
                "httpRequest": {
                    "url": request.url,
                    "httpMethod": request.method,
                    "headers": request.headers,
                    "body": STANDARD.encode(&request.body),
                }
            }
        });

        let mut builder = self.client.post(&self.tasks_url).json(&body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatedTask = response
            .json()
            .await
            .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?;
        Ok(DispatchedJob { name: created.name })
    }
}
