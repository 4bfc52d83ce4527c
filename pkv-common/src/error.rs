//! Protocol-level errors raised while decoding frames.
//!
//! Every variant is fatal to the connection that produced it: once the
//! byte stream is out of sync there is no way to find the next frame
//! boundary, so the owner must drop the socket and reconnect.

/// Result alias for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Malformed or oversized input on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Leading type byte is not a known marker (or needs RESP3).
    #[error("unexpected type byte 0x{0:02x}")]
    UnknownType(u8),

    /// Length prefix below -1.
    #[error("invalid length prefix {0}")]
    InvalidLength(i64),

    /// Declared or buffered size exceeds the configured cutoff.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Claimed or observed size.
        size: usize,
        /// Configured `max_frame_size`.
        limit: usize,
    },

    /// Integer, double, boolean or length field did not parse.
    #[error("malformed {0} field")]
    Malformed(&'static str),

    /// Payload was not followed by CRLF.
    #[error("missing line terminator")]
    MissingTerminator,
}
