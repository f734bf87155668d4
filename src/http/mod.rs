//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, background tasks)
//!     → websocket.rs (job route: origin check, upgrade, session)
//!     → proxy (every other /{service}/... route)
//!     → error.rs (JSON error bodies)
//! ```

pub mod error;
pub mod server;
pub mod websocket;

pub use error::{ApiError, ErrorBody};
pub use server::{AppState, Backends, HttpServer, ServerError};
