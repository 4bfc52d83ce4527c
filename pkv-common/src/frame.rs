//! # Reply Frames
//!
//! Purpose: Represent one decoded unit of the wire protocol as a flat
//! tagged union, covering RESP2 and the RESP3 extensions.
//!
//! ## Design Principles
//! 1. **Flat Union**: One enum for every reply shape; callers interpret
//!    domain types in a separate step after delivery.
//! 2. **Binary-Safe**: String payloads are `Bytes`, never re-encoded.
//! 3. **Push Is Just A Variant**: Server-initiated frames are tagged so the
//!    reader can route them away from the pending queue in one pass.

use bytes::Bytes;

/// One decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `+OK` style status line.
    Simple(Bytes),
    /// `-ERR ...` error line.
    Error(Bytes),
    /// `:123` integer.
    Integer(i64),
    /// `$..` bulk string, `None` for the `$-1` nil.
    Bulk(Option<Bytes>),
    /// `*..` array, `None` for the `*-1` nil.
    Array(Option<Vec<Frame>>),
    /// `%..` map (RESP3), pairs kept in wire order.
    Map(Vec<(Frame, Frame)>),
    /// `~..` set (RESP3).
    Set(Vec<Frame>),
    /// `,..` double (RESP3).
    Double(f64),
    /// `#t` / `#f` (RESP3).
    Boolean(bool),
    /// `(..` big number (RESP3), kept as its decimal text.
    BigNumber(Bytes),
    /// `=..` verbatim string (RESP3) with its three-byte format tag.
    Verbatim {
        /// Format such as `txt` or `mkd`.
        format: [u8; 3],
        /// Payload without the `fmt:` prefix.
        data: Bytes,
    },
    /// `>..` out-of-band push (RESP3).
    Push(Vec<Frame>),
    /// `_` null (RESP3).
    Null,
    /// `!..` blob error (RESP3).
    BlobError(Bytes),
}

impl Frame {
    /// Builds a bulk frame from anything convertible into `Bytes`.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(Some(data.into()))
    }

    /// Builds a status frame.
    pub fn simple(text: impl Into<Bytes>) -> Self {
        Frame::Simple(text.into())
    }

    /// Builds a non-nil array frame.
    pub fn array(items: Vec<Frame>) -> Self {
        Frame::Array(Some(items))
    }

    /// True for server-initiated frames that never match a pending command.
    pub fn is_push(&self) -> bool {
        matches!(self, Frame::Push(_))
    }

    /// True for `-` and `!` frames.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_) | Frame::BlobError(_))
    }

    /// True for the nil bulk, nil array and RESP3 null.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::Bulk(None) | Frame::Array(None))
    }

    /// Error payload for `-` and `!` frames.
    pub fn error_message(&self) -> Option<&Bytes> {
        match self {
            Frame::Error(msg) | Frame::BlobError(msg) => Some(msg),
            _ => None,
        }
    }

    /// String-like payload of simple, bulk, verbatim and big-number frames.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Frame::Simple(data) | Frame::Bulk(Some(data)) | Frame::BigNumber(data) => Some(data),
            Frame::Verbatim { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Short type name used in error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(Some(_)) => "bulk",
            Frame::Bulk(None) => "nil-bulk",
            Frame::Array(Some(_)) => "array",
            Frame::Array(None) => "nil-array",
            Frame::Map(_) => "map",
            Frame::Set(_) => "set",
            Frame::Double(_) => "double",
            Frame::Boolean(_) => "boolean",
            Frame::BigNumber(_) => "big-number",
            Frame::Verbatim { .. } => "verbatim",
            Frame::Push(_) => "push",
            Frame::Null => "null",
            Frame::BlobError(_) => "blob-error",
        }
    }
}
