//! Connection handles and per-connection write serialization.
//!
//! # Responsibilities
//! - Give each live connection a unique ID for logging and registry lookup
//! - Funnel every outbound frame through one writer task per connection
//! - Classify read failures into peer closure vs transient errors
//!
//! # Data Flow
//! ```text
//! session loop ──┐
//!                ├──▶ ConnectionHandle ──▶ mpsc queue ──▶ writer task ──▶ FrameSink
//! listener ──────┘
//! ```

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::session::frames::{JobSubmission, OutboundFrame};

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Read or write failure on a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer sent a close frame or the stream ended.
    #[error("connection closed by peer")]
    PeerClosed,

    /// The transport failed underneath us; treated like an abnormal closure.
    #[error("connection lost: {0}")]
    Lost(String),

    /// The connection's writer has already shut down.
    #[error("connection closed")]
    Closed,

    /// The outbound queue is full; the peer is not reading.
    #[error("outbound queue full")]
    Backlogged,

    /// The peer sent a frame we do not accept (binary, oversized, ...).
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),

    /// A text frame did not hold a JSON object.
    #[error("malformed submission: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the session should stop reading from this connection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportError::PeerClosed | TransportError::Lost(_) | TransportError::Closed
        )
    }
}

/// Why the gateway closes a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer hung up first.
    Normal,
    /// The gateway is shutting down.
    GoingAway,
    /// The session hit a registry contract violation.
    Internal,
}

impl CloseReason {
    /// WebSocket close code (RFC 6455 §7.4.1).
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::GoingAway => 1001,
            CloseReason::Internal => 1011,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CloseReason::Normal => "bye",
            CloseReason::GoingAway => "gateway shutting down",
            CloseReason::Internal => "internal error",
        }
    }
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next job submission.
    async fn next_submission(&mut self) -> Result<JobSubmission, TransportError>;
}

/// Outbound half of a connection. Only the writer task touches it.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, frame: &OutboundFrame) -> Result<(), TransportError>;

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError>;
}

/// Cloneable, non-owning handle used to write frames to a connection.
///
/// Every write goes through a bounded queue drained by a single writer, so
/// frames from the session loop and the listener never interleave.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote: Arc<str>,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn channel(
        remote: impl Into<Arc<str>>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (outbound, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            remote: remote.into(),
            outbound,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote identity of the peer (its socket address).
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Queue a frame for the writer.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Queue a frame without waiting for room.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backlogged,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

/// A live connection, owned by its session loop for its whole lifetime.
pub struct Connection<S> {
    source: S,
    handle: ConnectionHandle,
    close_tx: oneshot::Sender<CloseReason>,
    writer: JoinHandle<Result<(), TransportError>>,
}

impl<S: FrameSource> Connection<S> {
    /// Wrap both halves of a transport and start its writer task.
    pub fn open<K: FrameSink>(
        remote: impl Into<Arc<str>>,
        source: S,
        sink: K,
        buffer: usize,
    ) -> Self {
        let (handle, rx) = ConnectionHandle::channel(remote, buffer);
        let (close_tx, close_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(handle.id(), sink, rx, close_rx));

        Self {
            source,
            handle,
            close_tx,
            writer,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub async fn next_submission(&mut self) -> Result<JobSubmission, TransportError> {
        self.source.next_submission().await
    }

    /// Stop the writer and close the transport.
    ///
    /// Frames already queued are not flushed; clones of the handle held
    /// elsewhere start failing with [`TransportError::Closed`].
    pub async fn close(self, reason: CloseReason) -> Result<(), TransportError> {
        // The writer may already be gone if the sink failed.
        let _ = self.close_tx.send(reason);
        match self.writer.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::Lost(format!("writer task failed: {}", e))),
        }
    }
}

async fn write_loop<K: FrameSink>(
    id: ConnectionId,
    mut sink: K,
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut close_rx: oneshot::Receiver<CloseReason>,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            reason = &mut close_rx => {
                let reason = reason.unwrap_or(CloseReason::GoingAway);
                // Frames queued before the close request still go out.
                while let Ok(frame) = rx.try_recv() {
                    if let Err(e) = sink.send_frame(&frame).await {
                        tracing::warn!(connection_id = %id, error = %e, "Failed to write frame");
                        break;
                    }
                }
                return sink.close(reason).await;
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send_frame(&frame).await {
                        tracing::warn!(connection_id = %id, error = %e, "Failed to write frame");
                    }
                }
                None => return sink.close(CloseReason::GoingAway).await,
            }
        }
    }
}
