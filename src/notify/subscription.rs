//! Broker subscription adapters.
//!
//! # Responsibilities
//! - Yield broker messages one at a time, each with its own ack handle
//! - Acknowledge a message back to wherever it came from
//!
//! Two adapters are provided: [`PullSubscription`] polls a Pub/Sub-style REST
//! endpoint, [`ChannelSubscription`] is fed in-process.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

use crate::config::BrokerConfig;
use crate::notify::message::BrokerMessage;

/// Errors talking to the broker.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("broker request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("broker rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("subscription closed")]
    Closed,
}

/// Acknowledges messages on behalf of a subscription.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, ack_id: &str) -> Result<(), SubscriptionError>;
}

/// One received message plus the means to acknowledge it.
///
/// Acknowledging consumes the delivery, so a message can't be acked twice.
pub struct Delivery {
    message: BrokerMessage,
    ack_id: String,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: BrokerMessage, ack_id: impl Into<String>, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            message,
            ack_id: ack_id.into(),
            acker,
        }
    }

    pub fn message(&self) -> &BrokerMessage {
        &self.message
    }

    pub async fn ack(self) -> Result<(), SubscriptionError> {
        self.acker.ack(&self.ack_id).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("ack_id", &self.ack_id)
            .finish()
    }
}

/// Source of broker messages for the notification listener.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `Ok(None)` means the subscription ended.
    async fn next(&mut self) -> Result<Option<Delivery>, SubscriptionError>;
}

#[async_trait]
impl Subscription for Box<dyn Subscription> {
    async fn next(&mut self) -> Result<Option<Delivery>, SubscriptionError> {
        (**self).next().await
    }
}

// ---------------------------------------------------------------------------
// In-process channel
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AckLog {
    acked: Mutex<Vec<String>>,
    changed: Notify,
}

#[async_trait]
impl Acknowledger for AckLog {
    async fn ack(&self, ack_id: &str) -> Result<(), SubscriptionError> {
        if let Ok(mut acked) = self.acked.lock() {
            acked.push(ack_id.to_string());
        }
        self.changed.notify_waiters();
        Ok(())
    }
}

/// Publishing half of an in-process subscription.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<BrokerMessage>,
    log: Arc<AckLog>,
    next_id: Arc<AtomicU64>,
}

/// Subscription fed by a [`ChannelPublisher`]. Ends once every publisher is
/// dropped and the queue is drained.
pub struct ChannelSubscription {
    rx: mpsc::Receiver<BrokerMessage>,
    log: Arc<AckLog>,
}

/// Create a connected publisher / subscription pair.
pub fn channel(buffer: usize) -> (ChannelPublisher, ChannelSubscription) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let log = Arc::new(AckLog::default());
    (
        ChannelPublisher {
            tx,
            log: log.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        },
        ChannelSubscription { rx, log },
    )
}

impl ChannelPublisher {
    /// Publish a message, assigning an id if it has none. Returns the id.
    pub async fn publish(&self, mut message: BrokerMessage) -> Result<String, SubscriptionError> {
        if message.id.is_empty() {
            message.id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        }
        let id = message.id.clone();
        self.tx
            .send(message)
            .await
            .map_err(|_| SubscriptionError::Closed)?;
        Ok(id)
    }

    /// Ids acknowledged so far, in ack order.
    pub fn acked(&self) -> Vec<String> {
        self.log
            .acked
            .lock()
            .map(|acked| acked.clone())
            .unwrap_or_default()
    }

    /// Wait until at least `count` messages have been acknowledged.
    pub async fn wait_for_acks(&self, count: usize) -> Vec<String> {
        loop {
            let changed = self.log.changed.notified();
            let acked = self.acked();
            if acked.len() >= count {
                return acked;
            }
            changed.await;
        }
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, SubscriptionError> {
        Ok(self.rx.recv().await.map(|message| {
            let ack_id = message.id.clone();
            Delivery::new(message, ack_id, self.log.clone())
        }))
    }
}

// ---------------------------------------------------------------------------
// Pub/Sub REST pull
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PubsubMessage {
    data: String,
    attributes: HashMap<String, String>,
    message_id: String,
    ordering_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: [&'a str; 1],
}

struct PullAcker {
    client: reqwest::Client,
    ack_url: String,
    token: Option<String>,
}

#[async_trait]
impl Acknowledger for PullAcker {
    async fn ack(&self, ack_id: &str) -> Result<(), SubscriptionError> {
        let mut builder = self
            .client
            .post(&self.ack_url)
            .json(&AcknowledgeRequest { ack_ids: [ack_id] });
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        check_status(builder.send().await?).await?;
        Ok(())
    }
}

/// Polls a Pub/Sub-style `:pull` endpoint.
pub struct PullSubscription {
    client: reqwest::Client,
    pull_url: String,
    token: Option<String>,
    acker: Arc<PullAcker>,
    max_messages: u32,
    poll_interval: Duration,
    buffered: VecDeque<Delivery>,
}

impl PullSubscription {
    pub fn new(config: &BrokerConfig, token: Option<String>) -> Self {
        let base = format!(
            "{}/v1/projects/{}/subscriptions/{}",
            config.endpoint.trim_end_matches('/'),
            config.project,
            config.subscription
        );
        let client = reqwest::Client::new();
        let acker = Arc::new(PullAcker {
            client: client.clone(),
            ack_url: format!("{}:acknowledge", base),
            token: token.clone(),
        });

        Self {
            client,
            pull_url: format!("{}:pull", base),
            token,
            acker,
            max_messages: config.max_messages.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            buffered: VecDeque::new(),
        }
    }

    pub fn pull_url(&self) -> &str {
        &self.pull_url
    }

    async fn pull(&mut self) -> Result<(), SubscriptionError> {
        let mut builder = self.client.post(&self.pull_url).json(&PullRequest {
            max_messages: self.max_messages,
        });
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = check_status(builder.send().await?).await?;
        let pulled: PullResponse = response.json().await?;

        for received in pulled.received_messages {
            let message = decode_message(received.message);
            let acker: Arc<dyn Acknowledger> = self.acker.clone();
            self.buffered
                .push_back(Delivery::new(message, received.ack_id, acker));
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for PullSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, SubscriptionError> {
        loop {
            if let Some(delivery) = self.buffered.pop_front() {
                return Ok(Some(delivery));
            }
            self.pull().await?;
            if self.buffered.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

/// Undecodable data becomes an empty payload, which fails parsing later and
/// still gets acknowledged.
fn decode_message(message: PubsubMessage) -> BrokerMessage {
    let data = match STANDARD.decode(message.data.as_bytes()) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(message_id = %message.message_id, error = %e, "Message data is not base64");
            Vec::new()
        }
    };

    BrokerMessage {
        id: message.message_id,
        data,
        attributes: message.attributes,
        ordering_key: message.ordering_key,
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SubscriptionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SubscriptionError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_subscription_records_acks() {
        let (publisher, mut subscription) = channel(4);
        let id = publisher.publish(BrokerMessage::default()).await.unwrap();

        let delivery = subscription.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().id, id);
        assert!(publisher.acked().is_empty());

        delivery.ack().await.unwrap();
        assert_eq!(publisher.wait_for_acks(1).await, vec![id]);
    }

    #[tokio::test]
    async fn channel_subscription_ends_when_publishers_drop() {
        let (publisher, mut subscription) = channel(4);
        publisher.publish(BrokerMessage::default()).await.unwrap();
        drop(publisher);

        assert!(subscription.next().await.unwrap().is_some());
        assert!(subscription.next().await.unwrap().is_none());
    }

    #[test]
    fn decodes_pulled_message() {
        let pulled: PullResponse = serde_json::from_str(
            r#"{
                "receivedMessages": [{
                    "ackId": "ack-1",
                    "message": {
                        "data": "eyJtZXNzYWdlIjoiZG9uZSIsInByb2dyZXNzIjoxMDB9",
                        "attributes": { "code": "200", "status": "ok" },
                        "messageId": "42",
                        "orderingKey": "a1b2c3d4"
                    }
                }]
            }"#,
        )
        .unwrap();

        let received = pulled.received_messages.into_iter().next().unwrap();
        assert_eq!(received.ack_id, "ack-1");

        let message = decode_message(received.message);
        assert_eq!(message.id, "42");
        assert_eq!(message.ordering_key, "a1b2c3d4");
        assert_eq!(message.attribute("code"), Some("200"));
        assert_eq!(message.data, br#"{"message":"done","progress":100}"#);
    }

    #[test]
    fn bad_base64_becomes_empty_payload() {
        let message = decode_message(PubsubMessage {
            data: "%%%".into(),
            message_id: "7".into(),
            ..Default::default()
        });
        assert!(message.data.is_empty());
    }

    #[test]
    fn empty_pull_response_has_no_messages() {
        let pulled: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(pulled.received_messages.is_empty());
    }

    #[test]
    fn builds_subscription_urls() {
        let config = BrokerConfig {
            endpoint: "https://pubsub.googleapis.com/".into(),
            project: "planet".into(),
            subscription: "job-status".into(),
            ..Default::default()
        };
        let subscription = PullSubscription::new(&config, None);
        assert_eq!(
            subscription.pull_url(),
            "https://pubsub.googleapis.com/v1/projects/planet/subscriptions/job-status:pull"
        );
        assert_eq!(
            subscription.acker.ack_url,
            "https://pubsub.googleapis.com/v1/projects/planet/subscriptions/job-status:acknowledge"
        );
    }
}
