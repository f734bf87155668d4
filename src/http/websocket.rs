//! The job websocket route.
//!
//! # Responsibilities
//! - Check the `Origin` header before upgrading
//! - Upgrade the request and split the socket into reader and writer halves
//! - Hand the connection to a session loop
//!
//! # Data Flow
//! ```text
//! Client ──── text frames (job submissions) ────▶ WsSource ──▶ session loop
//! Client ◀─── text frames (acks, status, errors) ── WsSink ◀── writer task
//! ```
//!
//! Binary frames are rejected; ping/pong is answered by the transport.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::correlation::CorrelationStore;
use crate::dispatch::JobDispatcher;
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::lifecycle::Shutdown;
use crate::session::{
    run_session, CloseReason, Connection, FrameSink, FrameSource, JobSubmission, OriginPolicy,
    OutboundFrame, SessionContext, TransportError,
};

/// Everything the job route needs to start sessions.
pub struct JobRoute {
    pub store: CorrelationStore,
    pub dispatcher: Arc<JobDispatcher>,
    pub origins: OriginPolicy,
    pub outbound_buffer: usize,
    pub shutdown: Shutdown,
}

/// `GET {jobs.route}`: upgrade to a job session.
pub async fn job_ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(jobs) = state.jobs.clone() else {
        return ApiError::Internal.into_response();
    };

    if !jobs.origins.check(&headers) {
        tracing::warn!(
            remote = %addr,
            origin = ?headers.get(axum::http::header::ORIGIN),
            "Rejected websocket upgrade from disallowed origin"
        );
        return ApiError::ForbiddenOrigin.into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::debug!(remote = %addr, error = %rejection, "Not a websocket upgrade");
            return ApiError::BadRequest.into_response();
        }
    };

    ws.on_upgrade(move |socket| serve_socket(socket, addr, jobs))
}

async fn serve_socket(socket: WebSocket, remote: SocketAddr, jobs: Arc<JobRoute>) {
    let (sink, stream) = socket.split();
    let conn = Connection::open(
        remote.to_string(),
        WsSource(stream),
        WsSink(sink),
        jobs.outbound_buffer,
    );
    let ctx = SessionContext {
        store: jobs.store.clone(),
        dispatcher: jobs.dispatcher.clone(),
        shutdown: jobs.shutdown.subscribe(),
    };

    if let Err(e) = run_session(conn, ctx).await {
        tracing::error!(remote = %remote, error = %e, "Session aborted");
    }
}

/// Reading half of an upgraded socket.
pub struct WsSource(SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for WsSource {
    async fn next_submission(&mut self) -> Result<JobSubmission, TransportError> {
        loop {
            let message = match self.0.next().await {
                None => return Err(TransportError::PeerClosed),
                Some(Err(e)) => return Err(TransportError::Lost(e.to_string())),
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => return Ok(JobSubmission::from_text(text.as_str())?),
                Message::Binary(_) => {
                    return Err(TransportError::UnsupportedFrame(
                        "binary frames are not accepted".to_string(),
                    ))
                }
                Message::Close(_) => return Err(TransportError::PeerClosed),
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
    }
}

/// Writing half of an upgraded socket.
pub struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame)?;
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Lost(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: reason.code(),
            reason: reason.description().into(),
        };
        match self.0.send(Message::Close(Some(frame))).await {
            Ok(()) => Ok(()),
            // The peer closed first; the transport already answered it.
            Err(_) if reason == CloseReason::Normal => Ok(()),
            Err(e) => Err(TransportError::Lost(e.to_string())),
        }
    }
}
