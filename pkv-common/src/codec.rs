//! # RESP2/RESP3 Encoding and Decoding
//!
//! Purpose: Encode commands into request frames and decode a byte stream
//! into reply frames without performing any I/O.
//!
//! ## Design Principles
//! 1. **Buffer-Driven**: The caller owns the receive buffer; `decode`
//!    consumes finished elements and keeps only open aggregates itself.
//! 2. **Binary-Safe**: Arguments go out as length-prefixed bulk strings and
//!    are never escaped.
//! 3. **Bounded**: Length claims and lines, terminated or not, are checked
//!    against `max_frame_size` so a misbehaving peer cannot grow memory.
//! 4. **Fail Fast**: Any framing violation is a `ProtocolError`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::Frame;

/// Default cutoff for a single frame (matches the server's proto-max-bulk-len).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Aggregates nested deeper than this are rejected.
const MAX_NESTING: usize = 128;

const CRLF: &[u8] = b"\r\n";

/// Negotiated protocol version; decides which type markers are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Original protocol: `+ - : $ *` only.
    #[default]
    Resp2,
    /// Extended protocol with maps, sets, doubles, pushes and friends.
    Resp3,
}

impl ProtocolVersion {
    /// Numeric version sent in `HELLO`.
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::Resp2 => 2,
            ProtocolVersion::Resp3 => 3,
        }
    }
}

/// Encodes a command as an array of bulk strings.
pub fn encode_command(cmd: &Command, out: &mut BytesMut) {
    let payload: usize = cmd.args().iter().map(|a| a.len() + 16).sum::<usize>() + cmd.name().len();
    out.reserve(payload + 32);

    out.put_u8(b'*');
    put_decimal(out, cmd.wire_len() as i64);
    out.put_slice(CRLF);
    put_blob(out, b'$', cmd.name());
    for arg in cmd.args() {
        put_blob(out, b'$', arg);
    }
}

/// Serializes any frame in its canonical wire form.
pub fn encode_frame(frame: &Frame, out: &mut BytesMut) {
    match frame {
        Frame::Simple(text) => put_line(out, b'+', text),
        Frame::Error(text) => put_line(out, b'-', text),
        Frame::Integer(value) => {
            out.put_u8(b':');
            put_decimal(out, *value);
            out.put_slice(CRLF);
        }
        Frame::Bulk(Some(data)) => put_blob(out, b'$', data),
        Frame::Bulk(None) => out.put_slice(b"$-1\r\n"),
        Frame::Array(Some(items)) => put_aggregate(out, b'*', items),
        Frame::Array(None) => out.put_slice(b"*-1\r\n"),
        Frame::Map(pairs) => {
            out.put_u8(b'%');
            put_decimal(out, pairs.len() as i64);
            out.put_slice(CRLF);
            for (key, value) in pairs {
                encode_frame(key, out);
                encode_frame(value, out);
            }
        }
        Frame::Set(items) => put_aggregate(out, b'~', items),
        Frame::Push(items) => put_aggregate(out, b'>', items),
        Frame::Double(value) => {
            out.put_u8(b',');
            if value.is_nan() {
                out.put_slice(b"nan");
            } else if value.is_infinite() {
                out.put_slice(if *value > 0.0 { &b"inf"[..] } else { &b"-inf"[..] });
            } else {
                out.put_slice(value.to_string().as_bytes());
            }
            out.put_slice(CRLF);
        }
        Frame::Boolean(value) => out.put_slice(if *value { b"#t\r\n" } else { b"#f\r\n" }),
        Frame::BigNumber(digits) => put_line(out, b'(', digits),
        Frame::Verbatim { format, data } => {
            out.put_u8(b'=');
            put_decimal(out, (data.len() + 4) as i64);
            out.put_slice(CRLF);
            out.put_slice(format);
            out.put_u8(b':');
            out.put_slice(data);
            out.put_slice(CRLF);
        }
        Frame::Null => out.put_slice(b"_\r\n"),
        Frame::BlobError(data) => put_blob(out, b'!', data),
    }
}

/// Incremental reply decoder.
///
/// Completed elements of an aggregate are consumed from the buffer as soon
/// as they arrive and parked on a stack until the aggregate is whole, so a
/// large reply fed in small reads is parsed once.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    version: ProtocolVersion,
    max_frame_size: usize,
    open: Vec<Partial>,
    // Bytes at the buffer front already searched for a line end.
    scanned: usize,
}

/// Aggregate whose elements are still arriving.
#[derive(Debug, Clone)]
struct Partial {
    marker: u8,
    remaining: usize,
    items: Vec<Frame>,
}

impl Partial {
    fn new(marker: u8, len: usize) -> Self {
        Partial {
            marker,
            remaining: len,
            // Cap the preallocation; the count is only a claim until the items arrive.
            items: Vec::with_capacity(len.min(1024)),
        }
    }

    /// The finished frame; attributes produce none.
    fn finish(self) -> Option<Frame> {
        match self.marker {
            b'*' => Some(Frame::Array(Some(self.items))),
            b'~' => Some(Frame::Set(self.items)),
            b'>' => Some(Frame::Push(self.items)),
            b'%' => {
                let mut pairs = Vec::with_capacity(self.items.len() / 2);
                let mut iter = self.items.into_iter();
                while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                    pairs.push((key, value));
                }
                Some(Frame::Map(pairs))
            }
            _ => None,
        }
    }
}

/// One unit read from the front of the buffer.
enum Token {
    Frame(Frame),
    Open { marker: u8, len: usize },
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    /// Creates a RESP2 decoder with the given size cutoff.
    pub fn new(max_frame_size: usize) -> Self {
        FrameDecoder::with_version(ProtocolVersion::Resp2, max_frame_size)
    }

    /// Creates a decoder that already accepts the given protocol version.
    pub fn with_version(version: ProtocolVersion, max_frame_size: usize) -> Self {
        FrameDecoder {
            version,
            max_frame_size,
            open: Vec::new(),
            scanned: 0,
        }
    }

    /// Protocol version currently accepted.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Switches the accepted marker set, e.g. after a handshake.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    /// Configured frame size cutoff.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// True while part of an aggregate has been consumed but not returned.
    pub fn is_mid_frame(&self) -> bool {
        !self.open.is_empty()
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds only part of a frame. Finished
    /// elements of an open aggregate are consumed; an unfinished scalar is
    /// left in place for the next call. After an error the decoder starts
    /// over and the buffer contents are undefined.
    pub fn decode(&mut self, buf: &mut BytesMut) -> ProtocolResult<Option<Frame>> {
        let result = self.resume(buf);
        if result.is_err() {
            self.open.clear();
            self.scanned = 0;
        }
        result
    }

    fn resume(&mut self, buf: &mut BytesMut) -> ProtocolResult<Option<Frame>> {
        loop {
            let (token, consumed) = match self.next_token(&buf[..])? {
                Some(found) => found,
                None => return Ok(None),
            };
            buf.advance(consumed);
            self.scanned = 0;

            let frame = match token {
                Token::Frame(frame) => frame,
                Token::Open { marker, len: 0 } => match Partial::new(marker, 0).finish() {
                    Some(frame) => frame,
                    None => continue,
                },
                Token::Open { marker, len } => {
                    if self.open.len() >= MAX_NESTING {
                        return Err(ProtocolError::Malformed("nesting depth"));
                    }
                    self.open.push(Partial::new(marker, len));
                    continue;
                }
            };
            if let Some(frame) = self.fold(frame) {
                return Ok(Some(frame));
            }
        }
    }

    /// Adds a finished element to the innermost open aggregate and closes
    /// every aggregate it completes. Returns the outermost frame once done.
    fn fold(&mut self, mut frame: Frame) -> Option<Frame> {
        loop {
            match self.open.last_mut() {
                None => return Some(frame),
                Some(top) => {
                    top.items.push(frame);
                    top.remaining -= 1;
                    if top.remaining > 0 {
                        return None;
                    }
                }
            }
            // Attributes annotate the frame that follows; callers only see that frame.
            frame = self.open.pop().and_then(Partial::finish)?;
        }
    }

    fn next_token(&mut self, src: &[u8]) -> ProtocolResult<Option<(Token, usize)>> {
        let marker = match src.first() {
            Some(&marker) => marker,
            None => return Ok(None),
        };
        if self.version == ProtocolVersion::Resp2 && !matches!(marker, b'+' | b'-' | b':' | b'$' | b'*') {
            return Err(ProtocolError::UnknownType(marker));
        }
        if !matches!(
            marker,
            b'+' | b'-' | b':' | b'$' | b'*' | b'%' | b'~' | b'>' | b',' | b'#' | b'(' | b'=' | b'!' | b'_' | b'|'
        ) {
            return Err(ProtocolError::UnknownType(marker));
        }

        let (line, cursor) = match self.read_line(src)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let frame = match marker {
            b'+' => Frame::Simple(Bytes::copy_from_slice(line)),
            b'-' => Frame::Error(Bytes::copy_from_slice(line)),
            b':' => Frame::Integer(parse_i64(line)?),
            b'(' => {
                let digits = line.strip_prefix(b"-").unwrap_or(line);
                if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
                    return Err(ProtocolError::Malformed("big number"));
                }
                Frame::BigNumber(Bytes::copy_from_slice(line))
            }
            b',' => Frame::Double(parse_f64(line)?),
            b'#' => match line {
                b"t" => Frame::Boolean(true),
                b"f" => Frame::Boolean(false),
                _ => return Err(ProtocolError::Malformed("boolean")),
            },
            b'_' => {
                if !line.is_empty() {
                    return Err(ProtocolError::Malformed("null"));
                }
                Frame::Null
            }
            b'$' | b'!' | b'=' => {
                let len = parse_i64(line)?;
                if len == -1 && marker == b'$' {
                    return Ok(Some((Token::Frame(Frame::Bulk(None)), cursor)));
                }
                let len = self.checked_len(len)?;
                let data = match read_payload(src, cursor, len)? {
                    Some(data) => data,
                    None => return Ok(None),
                };
                let frame = match marker {
                    b'$' => Frame::Bulk(Some(Bytes::copy_from_slice(data))),
                    b'!' => Frame::BlobError(Bytes::copy_from_slice(data)),
                    _ => {
                        if data.len() < 4 || data[3] != b':' {
                            return Err(ProtocolError::Malformed("verbatim string"));
                        }
                        Frame::Verbatim {
                            format: [data[0], data[1], data[2]],
                            data: Bytes::copy_from_slice(&data[4..]),
                        }
                    }
                };
                return Ok(Some((Token::Frame(frame), cursor + len + 2)));
            }
            b'*' | b'~' | b'>' => {
                let count = parse_i64(line)?;
                if count == -1 && marker == b'*' {
                    return Ok(Some((Token::Frame(Frame::Array(None)), cursor)));
                }
                let len = self.checked_len(count)?;
                return Ok(Some((Token::Open { marker, len }, cursor)));
            }
            b'%' | b'|' => {
                let count = self.checked_len(parse_i64(line)?)?;
                let len = count.checked_mul(2).ok_or(ProtocolError::InvalidLength(count as i64))?;
                return Ok(Some((Token::Open { marker, len }, cursor)));
            }
            other => return Err(ProtocolError::UnknownType(other)),
        };

        Ok(Some((Token::Frame(frame), cursor)))
    }

    /// Returns the line after the marker byte (without CRLF) and the index
    /// after it.
    ///
    /// A line longer than `max_frame_size` is rejected whether or not its
    /// terminator has arrived yet.
    fn read_line<'a>(&mut self, src: &'a [u8]) -> ProtocolResult<Option<(&'a [u8], usize)>> {
        let start = self.scanned.max(1);
        let rest = src.get(start..).unwrap_or(&[]);
        match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let end = start + idx;
                if end < 2 || src[end - 1] != b'\r' {
                    return Err(ProtocolError::MissingTerminator);
                }
                let line = &src[1..end - 1];
                if line.len() > self.max_frame_size {
                    return Err(ProtocolError::FrameTooLarge {
                        size: line.len(),
                        limit: self.max_frame_size,
                    });
                }
                Ok(Some((line, end + 1)))
            }
            None => {
                self.scanned = src.len();
                // The last byte may be the CR of a line that is exactly at the limit.
                let seen = src.len().saturating_sub(1);
                if seen > self.max_frame_size + 1 {
                    return Err(ProtocolError::FrameTooLarge {
                        size: seen,
                        limit: self.max_frame_size,
                    });
                }
                Ok(None)
            }
        }
    }

    fn checked_len(&self, len: i64) -> ProtocolResult<usize> {
        if len < 0 {
            return Err(ProtocolError::InvalidLength(len));
        }
        let len = len as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                limit: self.max_frame_size,
            });
        }
        Ok(len)
    }
}

fn read_payload(src: &[u8], start: usize, len: usize) -> ProtocolResult<Option<&[u8]>> {
    let end = start + len;
    if src.len() < end + 2 {
        return Ok(None);
    }
    if &src[end..end + 2] != CRLF {
        return Err(ProtocolError::MissingTerminator);
    }
    Ok(Some(&src[start..end]))
}

fn parse_i64(data: &[u8]) -> ProtocolResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(ProtocolError::Malformed("integer")),
    };
    if digits.is_empty() {
        return Err(ProtocolError::Malformed("integer"));
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::Malformed("integer"));
        }
        let digit = (b - b'0') as i64;
        // Accumulate negatively so i64::MIN is representable.
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub(digit))
            .ok_or(ProtocolError::Malformed("integer"))?;
    }

    if negative {
        Ok(value)
    } else {
        value.checked_neg().ok_or(ProtocolError::Malformed("integer"))
    }
}

fn parse_f64(data: &[u8]) -> ProtocolResult<f64> {
    match data {
        b"inf" | b"+inf" => return Ok(f64::INFINITY),
        b"-inf" => return Ok(f64::NEG_INFINITY),
        b"nan" | b"-nan" => return Ok(f64::NAN),
        _ => {}
    }
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .ok_or(ProtocolError::Malformed("double"))
}

fn put_line(out: &mut BytesMut, marker: u8, text: &[u8]) {
    out.put_u8(marker);
    out.put_slice(text);
    out.put_slice(CRLF);
}

fn put_blob(out: &mut BytesMut, marker: u8, data: &[u8]) {
    out.put_u8(marker);
    put_decimal(out, data.len() as i64);
    out.put_slice(CRLF);
    out.put_slice(data);
    out.put_slice(CRLF);
}

fn put_aggregate(out: &mut BytesMut, marker: u8, items: &[Frame]) {
    out.put_u8(marker);
    put_decimal(out, items.len() as i64);
    out.put_slice(CRLF);
    for item in items {
        encode_frame(item, out);
    }
}

fn put_decimal(out: &mut BytesMut, value: i64) {
    // Digits go into a stack buffer so length prefixes never allocate.
    let mut buf = [0u8; 20];
    let mut len = 0;
    let mut magnitude = value.unsigned_abs();
    if magnitude == 0 {
        out.put_u8(b'0');
        return;
    }
    while magnitude > 0 {
        buf[len] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        len += 1;
    }
    if value < 0 {
        out.put_u8(b'-');
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_all(input: &[u8], version: ProtocolVersion) -> ProtocolResult<Vec<Frame>> {
        let mut decoder = FrameDecoder::with_version(version, 1024 * 1024);
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn decode_one(input: &[u8]) -> Frame {
        let mut frames = decode_all(input, ProtocolVersion::Resp3).unwrap();
        assert_eq!(frames.len(), 1);
        frames.remove(0)
    }

    fn encoded(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(frame, &mut buf);
        buf
    }

    #[test]
    fn encodes_command() {
        let mut buf = BytesMut::new();
        encode_command(&Command::new("GET").key("key"), &mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_binary_arguments_verbatim() {
        let mut buf = BytesMut::new();
        let payload = Bytes::from_static(b"a\r\n\0b");
        encode_command(&Command::new("SET").key("k").arg(payload), &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\na\r\n\0b\r\n");
    }

    #[test]
    fn parses_resp2_scalars() {
        assert_eq!(decode_one(b"+OK\r\n"), Frame::simple("OK"));
        assert_eq!(decode_one(b"-ERR bad\r\n"), Frame::Error(Bytes::from_static(b"ERR bad")));
        assert_eq!(decode_one(b":-42\r\n"), Frame::Integer(-42));
        assert_eq!(decode_one(b"$5\r\nhello\r\n"), Frame::bulk("hello"));
        assert_eq!(decode_one(b"$0\r\n\r\n"), Frame::bulk(""));
        assert_eq!(decode_one(b"$-1\r\n"), Frame::Bulk(None));
        assert_eq!(decode_one(b"*-1\r\n"), Frame::Array(None));
        assert_eq!(decode_one(b"*0\r\n"), Frame::array(Vec::new()));
    }

    #[test]
    fn parses_integer_extremes() {
        assert_eq!(decode_one(b":-9223372036854775808\r\n"), Frame::Integer(i64::MIN));
        assert_eq!(decode_one(b":9223372036854775807\r\n"), Frame::Integer(i64::MAX));
        assert_eq!(
            decode_all(b":9223372036854775808\r\n", ProtocolVersion::Resp2),
            Err(ProtocolError::Malformed("integer"))
        );
    }

    #[test]
    fn parses_resp3_types() {
        assert_eq!(decode_one(b",3.25\r\n"), Frame::Double(3.25));
        assert_eq!(decode_one(b",-inf\r\n"), Frame::Double(f64::NEG_INFINITY));
        assert_eq!(decode_one(b"#t\r\n"), Frame::Boolean(true));
        assert_eq!(decode_one(b"_\r\n"), Frame::Null);
        assert_eq!(
            decode_one(b"(-3492890328409238509324850943850943825024385\r\n"),
            Frame::BigNumber(Bytes::from_static(b"-3492890328409238509324850943850943825024385"))
        );
        assert_eq!(
            decode_one(b"=15\r\ntxt:Some string\r\n"),
            Frame::Verbatim {
                format: *b"txt",
                data: Bytes::from_static(b"Some string"),
            }
        );
        assert_eq!(
            decode_one(b"!21\r\nSYNTAX invalid syntax\r\n"),
            Frame::BlobError(Bytes::from_static(b"SYNTAX invalid syntax"))
        );
        assert_eq!(
            decode_one(b"%2\r\n+a\r\n:1\r\n+b\r\n:2\r\n"),
            Frame::Map(vec![
                (Frame::simple("a"), Frame::Integer(1)),
                (Frame::simple("b"), Frame::Integer(2)),
            ])
        );
        assert_eq!(
            decode_one(b"~2\r\n+x\r\n+y\r\n"),
            Frame::Set(vec![Frame::simple("x"), Frame::simple("y")])
        );
        assert_eq!(
            decode_one(b">3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$2\r\nhi\r\n"),
            Frame::Push(vec![Frame::bulk("message"), Frame::bulk("news"), Frame::bulk("hi")])
        );
    }

    #[test]
    fn attributes_are_skipped() {
        let input = b"|1\r\n+key-popularity\r\n%1\r\n$1\r\na\r\n,0.19\r\n*1\r\n:7\r\n";
        assert_eq!(decode_one(input), Frame::array(vec![Frame::Integer(7)]));
    }

    #[test]
    fn resp3_markers_rejected_before_negotiation() {
        assert_eq!(
            decode_all(b"%1\r\n+a\r\n+b\r\n", ProtocolVersion::Resp2),
            Err(ProtocolError::UnknownType(b'%'))
        );
        assert_eq!(decode_all(b"@oops\r\n", ProtocolVersion::Resp3), Err(ProtocolError::UnknownType(b'@')));
    }

    #[test]
    fn rejects_invalid_lengths() {
        assert_eq!(decode_all(b"$-2\r\n", ProtocolVersion::Resp2), Err(ProtocolError::InvalidLength(-2)));
        assert_eq!(decode_all(b"*-5\r\n", ProtocolVersion::Resp2), Err(ProtocolError::InvalidLength(-5)));
        assert_eq!(decode_all(b"~-1\r\n", ProtocolVersion::Resp3), Err(ProtocolError::InvalidLength(-1)));
        assert_eq!(decode_all(b"$3\r\nabcXY", ProtocolVersion::Resp2), Err(ProtocolError::MissingTerminator));
        assert_eq!(decode_all(b"+OK\n", ProtocolVersion::Resp2), Err(ProtocolError::MissingTerminator));
    }

    #[test]
    fn enforces_max_frame_size() {
        let mut decoder = FrameDecoder::new(16);
        let mut buf = BytesMut::from(&b"$17\r\n"[..]);
        assert_eq!(
            decoder.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { size: 17, limit: 16 })
        );

        // A line that never terminates is caught once it passes the cutoff.
        let mut buf = BytesMut::from(&b"+aaaaaaaaaaaaaaaaaaaa"[..]);
        assert_eq!(
            decoder.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { size: 20, limit: 16 })
        );

        let mut buf = BytesMut::from(&b"+aaaaaaaaaaaaaaaaa\r\n"[..]);
        assert_eq!(
            decoder.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { size: 17, limit: 16 })
        );
    }

    #[test]
    fn frame_at_the_limit_is_accepted_however_it_is_split() {
        let bulk = b"$16\r\n0123456789abcdef\r\n";
        let line = b"+0123456789abcdef\r\n";
        for input in [&bulk[..], &line[..]] {
            for split in 1..input.len() {
                let mut decoder = FrameDecoder::new(16);
                let mut buf = BytesMut::from(&input[..split]);
                assert_eq!(decoder.decode(&mut buf), Ok(None), "split at {}", split);
                buf.extend_from_slice(&input[split..]);
                let frame = decoder.decode(&mut buf).unwrap().unwrap();
                assert_eq!(frame.as_bytes().map(|b| b.len()), Some(16));
                assert!(buf.is_empty());
            }
        }
    }

    #[test]
    fn partial_aggregate_resumes_where_it_stopped() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
        assert_eq!(decoder.decode(&mut buf), Ok(None));
        // The header and the finished element are consumed; the unfinished bulk string stays.
        assert_eq!(&buf[..], b"$3\r\nba");
        assert!(decoder.is_mid_frame());
        buf.extend_from_slice(b"r\r\n+OK\r\n");
        assert_eq!(
            decoder.decode(&mut buf),
            Ok(Some(Frame::array(vec![Frame::bulk("foo"), Frame::bulk("bar")])))
        );
        assert!(!decoder.is_mid_frame());
        assert_eq!(decoder.decode(&mut buf), Ok(Some(Frame::simple("OK"))));
        assert!(buf.is_empty());
    }

    #[test]
    fn large_array_fed_in_chunks_is_parsed_once() {
        const ITEMS: usize = 100_000;
        const CHUNK: usize = 4096;
        let frame = Frame::array((0..ITEMS as i64).map(Frame::Integer).collect());
        let bytes = encoded(&frame);

        let mut decoder = FrameDecoder::new(1024 * 1024);
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for chunk in bytes.chunks(CHUNK) {
            assert!(decoded.is_none());
            buf.extend_from_slice(chunk);
            decoded = decoder.decode(&mut buf).unwrap();
            // Only the tail of an unfinished element may stay behind.
            assert!(buf.len() < 32, "{} bytes left unparsed", buf.len());
        }
        assert_eq!(decoded, Some(frame));
    }

    #[test]
    fn nested_aggregates_resume_across_reads() {
        let frame = Frame::Map(vec![(
            Frame::bulk("k"),
            Frame::array(vec![Frame::Set(vec![Frame::Integer(1)]), Frame::Null]),
        )]);
        let bytes = encoded(&frame);
        let mut decoder = FrameDecoder::with_version(ProtocolVersion::Resp3, 1024);
        let mut buf = BytesMut::new();
        for chunk in bytes.chunks(3) {
            buf.extend_from_slice(chunk);
            if let Some(decoded) = decoder.decode(&mut buf).unwrap() {
                assert_eq!(decoded, frame);
                assert!(buf.is_empty());
                return;
            }
        }
        panic!("frame never completed");
    }

    #[test]
    fn decoder_starts_over_after_an_error() {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&b"*2\r\n:1\r\n"[..]);
        assert_eq!(decoder.decode(&mut buf), Ok(None));
        buf.extend_from_slice(b"?\r\n");
        assert_eq!(decoder.decode(&mut buf), Err(ProtocolError::UnknownType(b'?')));
        assert!(!decoder.is_mid_frame());

        let mut fresh = BytesMut::from(&b":5\r\n"[..]);
        assert_eq!(decoder.decode(&mut fresh), Ok(Some(Frame::Integer(5))));
    }

    #[test]
    fn nested_arrays_three_levels_round_trip() {
        let frame = Frame::array(vec![
            Frame::array(vec![Frame::array(vec![Frame::Integer(1), Frame::Bulk(None)]), Frame::array(Vec::new())]),
            Frame::bulk("x"),
        ]);
        let bytes = encoded(&frame);
        assert_eq!(&bytes[..], b"*2\r\n*2\r\n*2\r\n:1\r\n$-1\r\n*0\r\n$1\r\nx\r\n");
        assert_eq!(decode_one(&bytes), frame);
    }

    #[test]
    fn rejects_runaway_nesting() {
        let input = b"*1\r\n".repeat(MAX_NESTING + 2);
        assert_eq!(
            decode_all(&input, ProtocolVersion::Resp2),
            Err(ProtocolError::Malformed("nesting depth"))
        );
    }

    fn line_bytes() -> impl Strategy<Value = Bytes> {
        proptest::collection::vec(any::<u8>().prop_filter("no CR/LF", |b| *b != b'\r' && *b != b'\n'), 0..24)
            .prop_map(Bytes::from)
    }

    fn blob_bytes() -> impl Strategy<Value = Bytes> {
        proptest::collection::vec(any::<u8>(), 0..48).prop_map(Bytes::from)
    }

    fn frame_strategy() -> impl Strategy<Value = Frame> {
        let leaf = prop_oneof![
            line_bytes().prop_map(Frame::Simple),
            line_bytes().prop_map(Frame::Error),
            any::<i64>().prop_map(Frame::Integer),
            proptest::option::of(blob_bytes()).prop_map(Frame::Bulk),
            Just(Frame::Array(None)),
            any::<f64>().prop_filter("nan never equals itself", |v| !v.is_nan()).prop_map(Frame::Double),
            any::<bool>().prop_map(Frame::Boolean),
            any::<i64>().prop_map(|v| Frame::BigNumber(Bytes::from(v.to_string()))),
            (proptest::array::uniform3(b'a'..=b'z'), blob_bytes())
                .prop_map(|(format, data)| Frame::Verbatim { format, data }),
            Just(Frame::Null),
            blob_bytes().prop_map(Frame::BlobError),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Frame::array),
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Frame::Set),
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Frame::Push),
                proptest::collection::vec((inner.clone(), inner), 0..3).prop_map(Frame::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn frames_round_trip(frame in frame_strategy()) {
            let bytes = encoded(&frame);
            let decoded = decode_one(&bytes);
            prop_assert_eq!(&decoded, &frame);
            prop_assert_eq!(encoded(&decoded), bytes);
        }

        #[test]
        fn byte_at_a_time_yields_one_frame_at_the_end(frame in frame_strategy()) {
            let bytes = encoded(&frame);
            let mut decoder = FrameDecoder::with_version(ProtocolVersion::Resp3, 1024 * 1024);
            let mut buf = BytesMut::new();
            for (idx, byte) in bytes.iter().enumerate() {
                buf.put_u8(*byte);
                let out = decoder.decode(&mut buf).unwrap();
                if idx + 1 < bytes.len() {
                    prop_assert!(out.is_none());
                } else {
                    prop_assert_eq!(out, Some(frame.clone()));
                }
            }
            prop_assert!(buf.is_empty());
        }
    }
}
