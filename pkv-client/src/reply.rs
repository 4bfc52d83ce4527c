//! Typed views over delivered frames.
//!
//! The connection only ever delivers a generic `Frame`; turning it into a
//! caller type is a separate step applied by the caller.

use bytes::Bytes;
use pkv_common::Frame;

use crate::error::{ClientError, ClientResult};

/// Conversion from a reply frame into a caller type.
pub trait FromFrame: Sized {
    /// Converts or reports the mismatch.
    fn from_frame(frame: Frame) -> ClientResult<Self>;
}

fn unexpected<T>(expected: &'static str, frame: &Frame) -> ClientResult<T> {
    Err(ClientError::UnexpectedResponse {
        expected,
        actual: frame.kind(),
    })
}

impl FromFrame for Frame {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        Ok(frame)
    }
}

impl FromFrame for () {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        match frame {
            Frame::Simple(_) => Ok(()),
            other => unexpected("status", &other),
        }
    }
}

impl FromFrame for Bytes {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        match frame {
            Frame::Simple(data) | Frame::Bulk(Some(data)) | Frame::BigNumber(data) => Ok(data),
            Frame::Verbatim { data, .. } => Ok(data),
            other => unexpected("string", &other),
        }
    }
}

impl FromFrame for String {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        let kind = frame.kind();
        let data = Bytes::from_frame(frame)?;
        String::from_utf8(data.to_vec()).map_err(|_| ClientError::UnexpectedResponse {
            expected: "utf-8 string",
            actual: kind,
        })
    }
}

impl FromFrame for i64 {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        match frame {
            Frame::Integer(value) => Ok(value),
            other => unexpected("integer", &other),
        }
    }
}

impl FromFrame for f64 {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        match frame {
            Frame::Double(value) => Ok(value),
            Frame::Integer(value) => Ok(value as f64),
            Frame::Bulk(Some(ref data)) => std::str::from_utf8(data)
                .ok()
                .and_then(|text| text.parse().ok())
                .map_or_else(|| unexpected("double", &frame), Ok),
            other => unexpected("double", &other),
        }
    }
}

impl FromFrame for bool {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        match frame {
            Frame::Boolean(value) => Ok(value),
            Frame::Integer(value) => Ok(value != 0),
            other => unexpected("boolean", &other),
        }
    }
}

impl<T: FromFrame> FromFrame for Option<T> {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        if frame.is_null() {
            return Ok(None);
        }
        T::from_frame(frame).map(Some)
    }
}

impl<T: FromFrame> FromFrame for Vec<T> {
    fn from_frame(frame: Frame) -> ClientResult<Self> {
        match frame {
            Frame::Array(Some(items)) | Frame::Set(items) | Frame::Push(items) => {
                items.into_iter().map(T::from_frame).collect()
            }
            Frame::Array(None) | Frame::Null => Ok(Vec::new()),
            other => unexpected("array", &other),
        }
    }
}
