//! Job dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! JobSubmission + CorrelationKey
//!     → request.rs (HTTP-shaped task: target URL, POST, JSON body + job_key)
//!     → TaskQueue (cloud_tasks.rs in production, in-memory in tests)
//!     → DispatchedJob { name }   (only used for logging and the client ack)
//! ```
//!
//! # Design Decisions
//! - Every dispatch is bounded by a timeout
//! - The queue is a trait object so sessions never see a concrete client

pub mod cloud_tasks;
pub mod request;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::correlation::CorrelationKey;
use crate::session::frames::JobSubmission;

pub use cloud_tasks::CloudTasksQueue;
pub use request::DispatchRequest;

/// Errors from handing a job to the task queue.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to encode task body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("task queue request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("task queue rejected the task with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid task queue response: {0}")]
    InvalidResponse(String),

    #[error("task dispatch timed out after {0:?}")]
    Timeout(Duration),
}

/// Record returned once the queue accepted a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedJob {
    pub name: String,
}

/// External service that executes HTTP tasks asynchronously.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn create_task(&self, request: DispatchRequest) -> Result<DispatchedJob, DispatchError>;
}

/// Turns a submission and its key into a queued task.
#[derive(Clone)]
pub struct JobDispatcher {
    queue: Arc<dyn TaskQueue>,
    target: String,
    timeout: Duration,
}

impl JobDispatcher {
    /// `target` is the URL the queued task will call.
    pub fn new(queue: Arc<dyn TaskQueue>, target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            queue,
            target: target.into(),
            timeout,
        }
    }

    pub async fn dispatch(
        &self,
        submission: &JobSubmission,
        key: &CorrelationKey,
    ) -> Result<DispatchedJob, DispatchError> {
        let request = DispatchRequest::for_job(&self.target, submission, key)?;

        match tokio::time::timeout(self.timeout, self.queue.create_task(request)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        }
    }
}
