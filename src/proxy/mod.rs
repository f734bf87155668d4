//! Synchronous service proxy.
//!
//! # Data Flow
//! ```text
//! /{service}/{*path}
//!     → services.rs (service name → upstream base URL + timeout)
//!     → forward.rs (reqwest call with per-service timeout)
//!     → upstream response, or a JSON error (404 / 502 / 504)
//! ```

pub mod forward;
pub mod services;

pub use forward::{proxy_handler, Proxy};
pub use services::{Service, ServiceTable};
