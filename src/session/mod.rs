//! Job session subsystem.
//!
//! # Data Flow
//! ```text
//! websocket upgrade (http/websocket.rs, after the origin check)
//!     → connection.rs (reader half + writer task behind a ConnectionHandle)
//!     → runner.rs (register → read submissions → add_job → dispatch → ack)
//!     → frames.rs (JSON frames in both directions)
//! ```
//!
//! # Design Decisions
//! - The session loop is the only reader of its connection
//! - All writes go through the connection's single writer task
//! - Transport details stay behind the FrameSource / FrameSink traits

pub mod connection;
pub mod frames;
pub mod origin;
pub mod runner;

pub use connection::{
    CloseReason, Connection, ConnectionHandle, ConnectionId, FrameSink, FrameSource,
    TransportError,
};
pub use frames::{JobSubmission, OutboundFrame};
pub use origin::OriginPolicy;
pub use runner::{run_session, SessionContext};
