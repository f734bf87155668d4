//! Correlation subsystem.
//!
//! # Data Flow
//! ```text
//! Session loop                         Notification listener
//!     register(conn)                        │
//!     add_job(conn) → key ──▶ dispatch      │
//!                                           ▼
//!                          broker message (ordering key = key)
//!                                           │
//!     CorrelationStore ◀──── resolve(key) ──┘
//!            │
//!            └──▶ ConnectionHandle → outbound queue → client
//!     unregister(conn)
//! ```
//!
//! # Design Decisions
//! - The store is the only state shared between sessions and the listener
//! - Only the owning session mutates a registration
//! - Keys are random per job, never derived from a shared counter

pub mod key;
pub mod store;

pub use key::{CorrelationKey, KeyGenerator};
pub use store::{ConnectionSummary, CorrelationStore, StoreError};
