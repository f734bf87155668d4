//! The per-connection session loop.
//!
//! # States
//! ```text
//! Connecting → Registered → (Reading ⇄ Dispatching) → Closed
//! ```
//!
//! - Registration failure ends the session before the loop starts
//! - Peer closure (normal or abnormal) moves to Closed
//! - Malformed frames and dispatch failures are reported to the client and
//!   the loop keeps reading
//! - Closed always unregisters and closes, logging failures of either step

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::correlation::{CorrelationStore, StoreError};
use crate::dispatch::JobDispatcher;
use crate::observability::metrics;
use crate::session::connection::{CloseReason, Connection, ConnectionHandle, FrameSource};
use crate::session::frames::{JobSubmission, OutboundFrame};

/// Everything a session needs besides its connection.
pub struct SessionContext {
    pub store: CorrelationStore,
    pub dispatcher: Arc<JobDispatcher>,
    /// Fires when the gateway shuts down.
    pub shutdown: broadcast::Receiver<()>,
}

/// Drive one connection until it closes.
///
/// Returns an error only for registry contract violations; every other
/// failure is handled inside the loop.
pub async fn run_session<S: FrameSource>(
    mut conn: Connection<S>,
    mut ctx: SessionContext,
) -> Result<(), StoreError> {
    let id = conn.id();
    let remote = conn.handle().remote().to_string();

    if let Err(e) = ctx.store.register(conn.handle()) {
        tracing::error!(connection_id = %id, error = %e, "Failed to register connection");
        let _ = conn
            .handle()
            .send(OutboundFrame::error("connection could not be registered", None))
            .await;
        if let Err(close_err) = conn.close(CloseReason::Internal).await {
            tracing::warn!(connection_id = %id, error = %close_err, "Failed to close connection");
        }
        return Err(e);
    }

    metrics::record_session_opened();
    tracing::info!(connection_id = %id, remote = %remote, "Session registered");

    let mut outcome = Ok(());
    let reason = loop {
        let next = tokio::select! {
            _ = ctx.shutdown.recv() => break CloseReason::GoingAway,
            next = conn.next_submission() => next,
        };

        match next {
            Ok(submission) => {
                if let Err(e) =
                    handle_submission(&ctx.store, &ctx.dispatcher, conn.handle(), submission).await
                {
                    tracing::error!(connection_id = %id, error = %e, "Registry contract violated");
                    outcome = Err(e);
                    break CloseReason::Internal;
                }
            }
            Err(e) if e.is_terminal() => {
                tracing::info!(connection_id = %id, reason = %e, "Connection closed");
                break CloseReason::Normal;
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Failed to read submission");
                if let Err(write_err) = conn
                    .handle()
                    .send(OutboundFrame::error(e.to_string(), None))
                    .await
                {
                    tracing::warn!(connection_id = %id, error = %write_err, "Failed to report read error");
                }
            }
        }
    };

    if let Err(e) = ctx.store.unregister(id) {
        tracing::error!(connection_id = %id, error = %e, "Failed to unregister connection");
    }
    if let Err(e) = conn.close(reason).await {
        tracing::warn!(connection_id = %id, error = %e, "Failed to close connection");
    }

    metrics::record_session_closed();
    tracing::info!(connection_id = %id, close_code = reason.code(), "Session ended");
    outcome
}

/// Issue a key, dispatch the job and acknowledge it.
async fn handle_submission(
    store: &CorrelationStore,
    dispatcher: &JobDispatcher,
    conn: &ConnectionHandle,
    submission: JobSubmission,
) -> Result<(), StoreError> {
    let id = conn.id();
    let key = store.add_job(id)?;

    let frame = match dispatcher.dispatch(&submission, &key).await {
        Ok(job) => {
            metrics::record_job_dispatch("accepted");
            tracing::info!(
                connection_id = %id,
                correlation_key = %key,
                job = %job.name,
                "Dispatched job, waiting for notifications"
            );
            OutboundFrame::Dispatched {
                correlation_key: key,
                job: job.name,
                submission,
            }
        }
        Err(e) => {
            metrics::record_job_dispatch("failed");
            tracing::warn!(
                connection_id = %id,
                correlation_key = %key,
                error = %e,
                "Failed to dispatch job"
            );
            store.release_job(id, &key)?;
            OutboundFrame::error(format!("dispatch failed: {}", e), Some(key))
        }
    };

    if let Err(e) = conn.send(frame).await {
        tracing::warn!(connection_id = %id, error = %e, "Failed to acknowledge submission");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{FailingQueue, RecordingQueue};
    use crate::session::connection::testing::{ChannelSource, RecordingSink, Written};
    use crate::session::connection::TransportError;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        input: mpsc::UnboundedSender<Result<JobSubmission, TransportError>>,
        output: mpsc::UnboundedReceiver<Written>,
        store: CorrelationStore,
        shutdown: broadcast::Sender<()>,
        task: tokio::task::JoinHandle<Result<(), StoreError>>,
    }

    fn start(dispatcher: JobDispatcher) -> Harness {
        let (input, in_rx) = mpsc::unbounded_channel();
        let (out_tx, output) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let store = CorrelationStore::new();

        let conn = Connection::open("127.0.0.1:7000", ChannelSource(in_rx), RecordingSink(out_tx), 8);
        let ctx = SessionContext {
            store: store.clone(),
            dispatcher: Arc::new(dispatcher),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(run_session(conn, ctx));

        Harness {
            input,
            output,
            store,
            shutdown,
            task,
        }
    }

    fn submission(url: &str) -> JobSubmission {
        JobSubmission::from_text(&format!(r#"{{"url":"{}"}}"#, url)).unwrap()
    }

    #[tokio::test]
    async fn submissions_are_dispatched_and_acknowledged() {
        let queue = Arc::new(RecordingQueue::default());
        let mut h = start(JobDispatcher::new(queue.clone(), "http://jobs", Duration::from_secs(1)));

        h.input.send(Ok(submission("a"))).unwrap();
        h.input.send(Ok(submission("b"))).unwrap();

        let mut keys = Vec::new();
        for expected_url in ["a", "b"] {
            match h.output.recv().await.unwrap() {
                Written::Frame(OutboundFrame::Dispatched {
                    correlation_key,
                    submission,
                    ..
                }) => {
                    assert_eq!(submission.fields()["url"], expected_url);
                    let conn = h.store.resolve(&correlation_key).unwrap();
                    assert_eq!(conn.remote(), "127.0.0.1:7000");
                    keys.push(correlation_key);
                }
                other => panic!("unexpected output: {:?}", other),
            }
        }
        assert_ne!(keys[0], keys[1]);
        assert_eq!(queue.requests.lock().unwrap().len(), 2);

        drop(h.input);
        assert_eq!(h.output.recv().await, Some(Written::Closed(CloseReason::Normal)));
        h.task.await.unwrap().unwrap();

        assert!(h.store.is_empty());
        for key in &keys {
            assert!(h.store.resolve(key).is_err());
        }
    }

    #[tokio::test]
    async fn transient_read_errors_do_not_end_the_session() {
        let queue = Arc::new(RecordingQueue::default());
        let mut h = start(JobDispatcher::new(queue, "http://jobs", Duration::from_secs(1)));

        h.input
            .send(Err(TransportError::UnsupportedFrame("binary frame".into())))
            .unwrap();
        match h.output.recv().await.unwrap() {
            Written::Frame(OutboundFrame::Error { message, .. }) => {
                assert!(message.contains("binary frame"))
            }
            other => panic!("unexpected output: {:?}", other),
        }

        h.input.send(Ok(submission("after-error"))).unwrap();
        assert!(matches!(
            h.output.recv().await.unwrap(),
            Written::Frame(OutboundFrame::Dispatched { .. })
        ));

        h.input.send(Err(TransportError::Lost("reset by peer".into()))).unwrap();
        assert_eq!(h.output.recv().await, Some(Written::Closed(CloseReason::Normal)));
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_dispatch_reports_error_and_releases_key() {
        let mut h = start(JobDispatcher::new(Arc::new(FailingQueue), "http://jobs", Duration::from_secs(1)));

        h.input.send(Ok(submission("a"))).unwrap();
        let key = match h.output.recv().await.unwrap() {
            Written::Frame(OutboundFrame::Error {
                message,
                correlation_key: Some(key),
            }) => {
                assert!(message.contains("dispatch failed"));
                key
            }
            other => panic!("unexpected output: {:?}", other),
        };
        assert!(h.store.resolve(&key).is_err());
        assert_eq!(h.store.len(), 1);

        drop(h.input);
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_with_going_away() {
        let queue = Arc::new(RecordingQueue::default());
        let mut h = start(JobDispatcher::new(queue, "http://jobs", Duration::from_secs(1)));

        h.input.send(Ok(submission("a"))).unwrap();
        assert!(matches!(
            h.output.recv().await.unwrap(),
            Written::Frame(OutboundFrame::Dispatched { .. })
        ));

        h.shutdown.send(()).unwrap();
        assert_eq!(h.output.recv().await, Some(Written::Closed(CloseReason::GoingAway)));
        h.task.await.unwrap().unwrap();
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn registration_failure_ends_session_before_loop() {
        let (_input, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut output) = mpsc::unbounded_channel();
        let (_shutdown, shutdown_rx) = broadcast::channel(1);
        let store = CorrelationStore::new();

        let conn = Connection::open("127.0.0.1:7001", ChannelSource(in_rx), RecordingSink(out_tx), 8);
        store.register(conn.handle()).unwrap();

        let ctx = SessionContext {
            store: store.clone(),
            dispatcher: Arc::new(JobDispatcher::new(
                Arc::new(RecordingQueue::default()),
                "http://jobs",
                Duration::from_secs(1),
            )),
            shutdown: shutdown_rx,
        };
        let err = run_session(conn, ctx).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyRegistered(_)));

        assert!(matches!(
            output.recv().await,
            Some(Written::Frame(OutboundFrame::Error { .. }))
        ));
        assert_eq!(output.recv().await, Some(Written::Closed(CloseReason::Internal)));
        assert_eq!(output.recv().await, None);
        // The pre-existing registration is left alone.
        assert_eq!(store.len(), 1);
    }
}
