//! Notification subsystem.
//!
//! # Data Flow
//! ```text
//! broker subscription (subscription.rs: REST pull or in-process channel)
//!     → listener.rs (one receive loop, one task per message)
//!     → message.rs (payload + attributes + ordering key → StatusUpdate)
//!     → CorrelationStore::resolve(key)
//!     → ConnectionHandle (status frame queued for the client)
//!     → ack
//! ```
//!
//! # Design Decisions
//! - Every message is acknowledged once, after its delivery attempt
//! - Updates for unknown keys are dropped; the client already left
//! - Failed writes are not retried

pub mod listener;
pub mod message;
pub mod subscription;

pub use listener::{handle_delivery, ListenerExit, NotificationListener, NotifyError};
pub use message::{BrokerMessage, JobProgress, ParseError, StatusUpdate};
pub use subscription::{
    channel, ChannelPublisher, ChannelSubscription, Delivery, PullSubscription, Subscription,
    SubscriptionError,
};
