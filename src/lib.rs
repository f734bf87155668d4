//! Job gateway library.
//!
//! An HTTP gateway that proxies plain requests to backend services and runs
//! one asynchronous job flow over websockets: jobs are handed to a task
//! queue, and status notifications arriving later on a broker subscription
//! are routed back to the connection that submitted the job.

// Core subsystems
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod http;
pub mod notify;
pub mod proxy;
pub mod session;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::GatewayConfig;
pub use correlation::CorrelationStore;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
