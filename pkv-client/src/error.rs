//! Client-facing error taxonomy.
//!
//! Connection-level failures (`Protocol`, `Connection`) are handled by the
//! connection driver and only reach callers through the replay policy; all
//! other kinds are the direct result of one invocation.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pkv_common::ProtocolError;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Malformed or oversized frame; the connection was reset.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server answered with an error frame. The connection is healthy.
    #[error("server error: {}", String::from_utf8_lossy(.0))]
    Command(Bytes),

    /// No reply within the caller's deadline. The command stays queued.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// Socket-level failure or lifecycle rejection.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Keys of a multi-key command hash to different slots.
    #[error("keys of {command} map to different slots")]
    CrossSlot {
        /// Command name.
        command: String,
    },

    /// Redirected again after following one redirection.
    #[error("{command} redirected again by {node}")]
    RedirectLoop {
        /// Command name.
        command: String,
        /// Node that issued the second redirection.
        node: String,
    },

    /// Too many commands in flight on this connection.
    #[error("{limit} commands already in flight")]
    Capacity {
        /// Configured `max_in_flight`.
        limit: usize,
    },

    /// Command rejected before dispatch.
    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),

    /// Configuration failed validation or parsing.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reply shape did not match the requested type.
    #[error("unexpected {actual} reply, expected {expected}")]
    UnexpectedResponse {
        /// What the caller asked for.
        expected: &'static str,
        /// Frame kind actually received.
        actual: &'static str,
    },
}

impl ClientError {
    /// Server error payload, if this is a command error.
    pub fn server_message(&self) -> Option<&Bytes> {
        match self {
            ClientError::Command(message) => Some(message),
            _ => None,
        }
    }

    /// True for failures caused by the transport rather than the command.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Protocol(_))
    }

    /// True when the caller's deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Connection(ConnectionError::from(err))
    }
}

/// Why a connection could not carry a command.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// Read, write or connect failed.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// Socket was not established within `connect_timeout`.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Version negotiation or session setup was refused.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Not connected and configured to fail fast.
    #[error("not connected")]
    NotReady,

    /// Graceful close in progress; no new commands.
    #[error("connection closing")]
    Closing,

    /// Connection permanently shut down.
    #[error("connection closed")]
    Closed,

    /// Command was written but the connection dropped before its reply.
    #[error("connection lost after write, reply unknown")]
    ReplyUnknown,

    /// Command was never written and the replay policy forbids resending it.
    #[error("connection lost before write, command not replayed")]
    NotReplayed,
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(Arc::new(err))
    }
}
