//! The notification listener: routes broker messages to their connections.
//!
//! # Responsibilities
//! - Receive messages from the subscription in one long-lived loop
//! - Parse, resolve and deliver each message on its own task
//! - Acknowledge every message exactly once, whatever happened to it
//! - Back off on subscription errors; stop on the shutdown signal

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::correlation::{CorrelationStore, StoreError};
use crate::notify::message::{BrokerMessage, ParseError, StatusUpdate};
use crate::notify::subscription::{Delivery, Subscription};
use crate::observability::metrics;
use crate::resilience::Backoff;
use crate::session::connection::TransportError;
use crate::session::frames::OutboundFrame;

/// A message that could not be delivered.
///
/// Unknown keys are not an error: the owning client simply went away.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to parse message: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to write status update: {0}")]
    Write(#[from] TransportError),
}

/// Why the receive loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The shutdown signal fired.
    Stopped,
    /// The subscription reported that no more messages will come.
    SubscriptionEnded,
}

pub struct NotificationListener<S> {
    subscription: S,
    store: CorrelationStore,
    backoff: Backoff,
}

impl<S: Subscription> NotificationListener<S> {
    pub fn new(subscription: S, store: CorrelationStore) -> Self {
        Self {
            subscription,
            store,
            backoff: Backoff::new(500, 30_000),
        }
    }

    /// Bounds for the delay between retries after a subscription error.
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff = Backoff::new(base_ms, max_ms);
        self
    }

    /// Run the receive loop until shutdown or the subscription ends.
    ///
    /// Messages already being handled finish before this returns.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> ListenerExit {
        tracing::info!("Notification listener starting");

        let mut in_flight = JoinSet::new();

        let exit = loop {
            // Reaped outside the select: a pending pull must only be dropped
            // on shutdown.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Notification task failed");
                }
            }

            let next = tokio::select! {
                _ = shutdown.recv() => break ListenerExit::Stopped,
                next = self.subscription.next() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    self.backoff.reset();
                    let store = self.store.clone();
                    in_flight.spawn(async move {
                        let _ = handle_delivery(&store, delivery).await;
                    });
                }
                Ok(None) => break ListenerExit::SubscriptionEnded,
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = self.backoff.failures(),
                        delay = ?delay,
                        "Failed to receive from subscription, backing off"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break ListenerExit::Stopped,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Notification task failed");
            }
        }

        match exit {
            ListenerExit::Stopped => tracing::info!("Notification listener stopped"),
            ListenerExit::SubscriptionEnded => {
                tracing::error!("Subscription ended, notification listener exiting")
            }
        }
        exit
    }
}

/// Deliver one message, then acknowledge it.
///
/// The ack happens whether or not delivery worked; the returned error is for
/// reporting only.
pub async fn handle_delivery(store: &CorrelationStore, delivery: Delivery) -> Result<(), NotifyError> {
    let message_id = delivery.message().id.clone();
    let result = deliver(store, delivery.message()).await;

    match &result {
        Ok(()) => {}
        Err(NotifyError::Parse(e)) => {
            metrics::record_notification("parse_error");
            tracing::warn!(message_id = %message_id, error = %e, "Dropping unparseable message");
        }
        Err(NotifyError::Write(e)) => {
            metrics::record_notification("write_error");
            tracing::warn!(message_id = %message_id, error = %e, "Failed to deliver status update");
        }
    }

    if let Err(e) = delivery.ack().await {
        tracing::error!(message_id = %message_id, error = %e, "Failed to acknowledge message");
    }
    result
}

async fn deliver(store: &CorrelationStore, message: &BrokerMessage) -> Result<(), NotifyError> {
    let update = StatusUpdate::from_message(message)?;
    let key = update.correlation_key.clone();

    let conn = match store.resolve(&key) {
        Ok(conn) => conn,
        Err(StoreError::KeyNotFound(_)) => {
            metrics::record_notification("unknown_key");
            tracing::info!(
                message_id = %message.id,
                correlation_key = %key,
                "No connection for correlation key, dropping update"
            );
            return Ok(());
        }
        Err(e) => {
            // resolve only ever reports unknown keys
            tracing::error!(correlation_key = %key, error = %e, "Unexpected store error");
            return Ok(());
        }
    };

    tracing::debug!(
        message_id = %message.id,
        connection_id = %conn.id(),
        correlation_key = %key,
        code = update.code,
        status = %update.status,
        "Delivering status update"
    );
    // A peer that stops reading must not hold back the ack.
    conn.try_send(OutboundFrame::Status(update))?;
    metrics::record_notification("delivered");
    Ok(())
}
