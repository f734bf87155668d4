//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! sessions, listener, proxy
//!     → logging.rs (structured events: connection_id, correlation_key, job)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;
