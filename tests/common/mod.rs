//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use job_gateway::config::{GatewayConfig, ServiceConfig};
use job_gateway::dispatch::{DispatchError, DispatchRequest, DispatchedJob, TaskQueue};
use job_gateway::http::{Backends, HttpServer};
use job_gateway::notify::{channel, ChannelPublisher};
use job_gateway::{CorrelationStore, Shutdown};

/// Task queue that accepts everything and keeps the requests.
#[derive(Default)]
pub struct MemoryQueue {
    tasks: Mutex<Vec<DispatchRequest>>,
}

impl MemoryQueue {
    pub fn tasks(&self) -> Vec<DispatchRequest> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn create_task(&self, request: DispatchRequest) -> Result<DispatchedJob, DispatchError> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(request);
        Ok(DispatchedJob {
            name: format!("tasks/{}", tasks.len()),
        })
    }
}

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub queue: Arc<MemoryQueue>,
    pub publisher: ChannelPublisher,
    pub store: CorrelationStore,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestGateway {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/downloader/url", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub fn test_config(services: Vec<ServiceConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.jobs.target = "http://worker.internal/run".into();
    config.jobs.allowed_origins = vec!["https://app.example.com".into()];
    config.jobs.queue.project = "test-project".into();
    config.jobs.queue.location = "europe-west1".into();
    config.jobs.queue.queue = "downloads".into();
    config.services = services;
    config
}

/// Start a gateway with an in-memory queue and broker.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let queue = Arc::new(MemoryQueue::default());
    let (publisher, subscription) = channel(16);

    let server = HttpServer::new(
        config,
        Backends {
            queue: Some(queue.clone()),
            subscription: Some(Box::new(subscription)),
            token: None,
        },
    )
    .unwrap();
    let store = server.store();
    let shutdown = server.shutdown();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        server.run(listener).await.unwrap();
    });

    TestGateway {
        addr,
        queue,
        publisher,
        store,
        shutdown,
        handle,
    }
}

/// Start a backend that echoes method, path and query as text.
pub async fn start_echo_backend() -> SocketAddr {
    let app = Router::new().fallback(|request: axum::extract::Request| async move {
        format!(
            "{} {}",
            request.method(),
            request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default()
        )
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
