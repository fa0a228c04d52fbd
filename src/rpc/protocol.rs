//! Wire format for tree transfer.
//!
//! Frame format: len:u32 | type:u8 | payload, all integers big-endian,
//! strings length-prefixed UTF-8. Session messages bracket per-file patch
//! record streams; the records themselves carry no field names, so both
//! sides must visit fields in the same deterministic order.

use crate::error::{Result, WireError};
use crate::tree::{Comment, CommentStyle, Marker, MarkerData, Markers, Space};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Protocol version 1.
pub const PROTOCOL_VERSION: u16 = 1;

/// Minimum supported protocol version.
pub const PROTOCOL_VERSION_MIN: u16 = 1;

/// Maximum supported protocol version.
pub const PROTOCOL_VERSION_MAX: u16 = 1;

/// Maximum frame size (16MB) - prevents OOM from malicious/corrupted frames.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum byte length of a file path in session messages. Paths use str16
/// fields on the wire; longer paths must be rejected before framing.
pub const MAX_PATH_LEN: usize = u16::MAX as usize;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Hello = 0x01,
    FileStart = 0x02,
    FileEnd = 0x03,
    ErrorMsg = 0x04,
    Done = 0x05,
    Fatal = 0x06,
    Reference = 0x10,
    Value = 0x11,
    TreeStart = 0x12,
    TreeEnd = 0x13,
    ListDiff = 0x14,
}

impl MessageType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::FileStart),
            0x03 => Some(Self::FileEnd),
            0x04 => Some(Self::ErrorMsg),
            0x05 => Some(Self::Done),
            0x06 => Some(Self::Fatal),
            0x10 => Some(Self::Reference),
            0x11 => Some(Self::Value),
            0x12 => Some(Self::TreeStart),
            0x13 => Some(Self::TreeEnd),
            0x14 => Some(Self::ListDiff),
            _ => None,
        }
    }

    /// Whether this frame is a patch record (valid between FileStart and
    /// FileEnd) rather than a session message.
    pub fn is_record(self) -> bool {
        matches!(
            self,
            Self::Reference | Self::Value | Self::TreeStart | Self::TreeEnd | Self::ListDiff
        )
    }
}

// =============================================================================
// Hello Flags
// =============================================================================

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HelloFlags: u32 {
        /// Receiver must run the print-idempotence check on every tree.
        const VERIFY = 1 << 0;
        /// Receiver reports record-level statistics in Done.
        const STATS = 1 << 1;
    }
}

// =============================================================================
// Buffer helpers
// =============================================================================

fn put_str16(buf: &mut BytesMut, s: &str) {
    // Callers bound these fields (MAX_PATH_LEN, truncated error messages);
    // a wrapped length prefix would corrupt the frame, never ship one.
    debug_assert!(
        s.len() <= u16::MAX as usize,
        "str16 field of {} bytes overflows its length prefix",
        s.len()
    );
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_str32(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_str16(payload: &mut Bytes, what: &str) -> Result<String> {
    if payload.remaining() < 2 {
        return Err(WireError::Protocol(format!("{what} length truncated")));
    }
    let len = payload.get_u16() as usize;
    get_str_body(payload, len, what)
}

fn get_str32(payload: &mut Bytes, what: &str) -> Result<String> {
    if payload.remaining() < 4 {
        return Err(WireError::Protocol(format!("{what} length truncated")));
    }
    let len = payload.get_u32() as usize;
    get_str_body(payload, len, what)
}

fn get_str_body(payload: &mut Bytes, len: usize, what: &str) -> Result<String> {
    if payload.remaining() < len {
        return Err(WireError::Protocol(format!(
            "{what} truncated: expected {len} bytes, got {}",
            payload.remaining()
        )));
    }
    String::from_utf8(payload.copy_to_bytes(len).to_vec())
        .map_err(|_| WireError::Protocol(format!("invalid UTF-8 in {what}")))
}

fn put_uuid(buf: &mut BytesMut, id: Uuid) {
    buf.put_slice(id.as_bytes());
}

fn get_uuid(payload: &mut Bytes, what: &str) -> Result<Uuid> {
    if payload.remaining() < 16 {
        return Err(WireError::Protocol(format!("{what} uuid truncated")));
    }
    let mut bytes = [0u8; 16];
    payload.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}

fn frame(msg_type: MessageType, payload: BytesMut) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_u8(msg_type as u8);
    buf.put_slice(&payload);
    buf.freeze()
}

// =============================================================================
// HELLO (0x01)
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct Hello {
    pub version: u16,
    pub flags: HelloFlags,
}

impl Hello {
    pub fn new(flags: HelloFlags) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u16(self.version);
        buf.put_u32(self.flags.bits());
        frame(MessageType::Hello, buf)
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 6 {
            return Err(WireError::Protocol("Hello payload too short".into()));
        }
        Ok(Self {
            version: payload.get_u16(),
            flags: HelloFlags::from_bits_truncate(payload.get_u32()),
        })
    }
}

// =============================================================================
// FILE_START (0x02) / FILE_END (0x03)
// =============================================================================

#[derive(Debug, Clone)]
pub struct FileStart {
    pub path: String,
    pub source_type: u8,
}

impl FileStart {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + self.path.len());
        put_str16(&mut buf, &self.path);
        buf.put_u8(self.source_type);
        frame(MessageType::FileStart, buf)
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let path = get_str16(&mut payload, "FileStart path")?;
        if payload.remaining() < 1 {
            return Err(WireError::Protocol("FileStart payload truncated".into()));
        }
        Ok(Self {
            path,
            source_type: payload.get_u8(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileEnd {
    pub status: u8,
}

impl FileEnd {
    pub const STATUS_OK: u8 = 0;
    pub const STATUS_ERROR: u8 = 1;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1);
        buf.put_u8(self.status);
        frame(MessageType::FileEnd, buf)
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 1 {
            return Err(WireError::Protocol("FileEnd payload too short".into()));
        }
        Ok(Self {
            status: payload.get_u8(),
        })
    }
}

// =============================================================================
// ERROR (0x04)
// =============================================================================

#[derive(Debug, Clone)]
pub struct ErrorMsg {
    pub path: String,
    pub code: u16,
    pub message: String,
}

impl ErrorMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6 + self.path.len() + self.message.len());
        put_str16(&mut buf, &self.path);
        buf.put_u16(self.code);
        put_str16(&mut buf, &self.message);
        frame(MessageType::ErrorMsg, buf)
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let path = get_str16(&mut payload, "Error path")?;
        if payload.remaining() < 2 {
            return Err(WireError::Protocol("Error payload truncated".into()));
        }
        let code = payload.get_u16();
        let message = get_str16(&mut payload, "Error message")?;
        Ok(Self {
            path,
            code,
            message,
        })
    }
}

// =============================================================================
// DONE (0x05)
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Done {
    pub files_ok: u64,
    pub files_err: u64,
    pub records: u64,
}

impl Done {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u64(self.files_ok);
        buf.put_u64(self.files_err);
        buf.put_u64(self.records);
        frame(MessageType::Done, buf)
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 24 {
            return Err(WireError::Protocol("Done payload too short".into()));
        }
        Ok(Self {
            files_ok: payload.get_u64(),
            files_err: payload.get_u64(),
            records: payload.get_u64(),
        })
    }
}

// =============================================================================
// FATAL (0x06)
// =============================================================================

#[derive(Debug, Clone)]
pub struct Fatal {
    pub code: u16,
    pub message: String,
}

impl Fatal {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.message.len());
        buf.put_u16(self.code);
        put_str16(&mut buf, &self.message);
        frame(MessageType::Fatal, buf)
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 2 {
            return Err(WireError::Protocol("Fatal payload too short".into()));
        }
        let code = payload.get_u16();
        let message = get_str16(&mut payload, "Fatal message")?;
        Ok(Self { code, message })
    }
}

// =============================================================================
// Patch records (0x10..0x14)
// =============================================================================

/// Type-tagged scalar payload of a Value record. Scalars are never cached:
/// re-sending a short value is cheaper than a cache round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Uuid(Uuid),
    Space(Space),
    Markers(Markers),
}

impl Scalar {
    fn tag(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Bool(_) => 1,
            Scalar::Int(_) => 2,
            Scalar::Str(_) => 3,
            Scalar::Uuid(_) => 4,
            Scalar::Space(_) => 5,
            Scalar::Markers(_) => 6,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Str(_) => "str",
            Scalar::Uuid(_) => "uuid",
            Scalar::Space(_) => "space",
            Scalar::Markers(_) => "markers",
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag());
        match self {
            Scalar::Null => {}
            Scalar::Bool(b) => buf.put_u8(*b as u8),
            Scalar::Int(i) => buf.put_i64(*i),
            Scalar::Str(s) => put_str32(buf, s),
            Scalar::Uuid(id) => put_uuid(buf, *id),
            Scalar::Space(space) => encode_space(buf, space),
            Scalar::Markers(markers) => encode_markers(buf, markers),
        }
    }

    fn decode(payload: &mut Bytes) -> Result<Self> {
        if payload.remaining() < 1 {
            return Err(WireError::Protocol("Value tag truncated".into()));
        }
        match payload.get_u8() {
            0 => Ok(Scalar::Null),
            1 => {
                if payload.remaining() < 1 {
                    return Err(WireError::Protocol("bool value truncated".into()));
                }
                Ok(Scalar::Bool(payload.get_u8() != 0))
            }
            2 => {
                if payload.remaining() < 8 {
                    return Err(WireError::Protocol("int value truncated".into()));
                }
                Ok(Scalar::Int(payload.get_i64()))
            }
            3 => Ok(Scalar::Str(get_str32(payload, "str value")?)),
            4 => Ok(Scalar::Uuid(get_uuid(payload, "value")?)),
            5 => Ok(Scalar::Space(decode_space(payload)?)),
            6 => Ok(Scalar::Markers(decode_markers(payload)?)),
            tag => Err(WireError::Protocol(format!("unknown scalar tag {tag}"))),
        }
    }
}

fn encode_space(buf: &mut BytesMut, space: &Space) {
    buf.put_u16(space.comments.len() as u16);
    for comment in &space.comments {
        buf.put_u8(comment.style.as_u8());
        put_str32(buf, &comment.prefix);
        put_str32(buf, &comment.text);
    }
    put_str32(buf, &space.whitespace);
}

fn decode_space(payload: &mut Bytes) -> Result<Space> {
    if payload.remaining() < 2 {
        return Err(WireError::Protocol("space comment count truncated".into()));
    }
    let count = payload.get_u16() as usize;
    let mut comments = Vec::with_capacity(count);
    for _ in 0..count {
        if payload.remaining() < 1 {
            return Err(WireError::Protocol("comment style truncated".into()));
        }
        let style = CommentStyle::from_u8(payload.get_u8())
            .ok_or_else(|| WireError::Protocol("unknown comment style".into()))?;
        let prefix = get_str32(payload, "comment prefix")?;
        let text = get_str32(payload, "comment text")?;
        comments.push(Comment {
            style,
            text,
            prefix,
        });
    }
    let whitespace = get_str32(payload, "space whitespace")?;
    Ok(Space {
        comments,
        whitespace,
    })
}

fn encode_markers(buf: &mut BytesMut, markers: &Markers) {
    buf.put_u16(markers.len() as u16);
    for marker in markers.iter() {
        put_uuid(buf, marker.id);
        match &marker.data {
            MarkerData::SearchResult { description } => {
                buf.put_u8(0);
                match description {
                    Some(text) => {
                        buf.put_u8(1);
                        put_str32(buf, text);
                    }
                    None => buf.put_u8(0),
                }
            }
            MarkerData::Warning { message } => {
                buf.put_u8(1);
                put_str32(buf, message);
            }
            MarkerData::Provenance { tool } => {
                buf.put_u8(2);
                put_str32(buf, tool);
            }
        }
    }
}

fn decode_markers(payload: &mut Bytes) -> Result<Markers> {
    if payload.remaining() < 2 {
        return Err(WireError::Protocol("marker count truncated".into()));
    }
    let count = payload.get_u16() as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let id = get_uuid(payload, "marker")?;
        if payload.remaining() < 1 {
            return Err(WireError::Protocol("marker tag truncated".into()));
        }
        let data = match payload.get_u8() {
            0 => {
                if payload.remaining() < 1 {
                    return Err(WireError::Protocol("marker payload truncated".into()));
                }
                let description = if payload.get_u8() != 0 {
                    Some(get_str32(payload, "marker description")?)
                } else {
                    None
                };
                MarkerData::SearchResult { description }
            }
            1 => MarkerData::Warning {
                message: get_str32(payload, "marker message")?,
            },
            2 => MarkerData::Provenance {
                tool: get_str32(payload, "marker tool")?,
            },
            tag => return Err(WireError::Protocol(format!("unknown marker tag {tag}"))),
        };
        out.push(Marker { id, data });
    }
    Ok(out.into_iter().collect())
}

/// One list edit operation. Ops apply in emitted order against the working
/// list, so positions are always relative to the list as it stands when
/// the op runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOp {
    Remove { pos: u32 },
    Move { from: u32, to: u32 },
    /// The inserted element's padding Value and node records follow the
    /// ListDiff record in stream order, one group per insert.
    Insert { pos: u32 },
}

/// A decoded patch record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Reference { index: u32 },
    Value(Scalar),
    TreeStart { index: u32, id: Uuid, kind: u8 },
    TreeEnd,
    ListDiff { ops: Vec<ListOp> },
}

impl Record {
    pub fn message_type(&self) -> MessageType {
        match self {
            Record::Reference { .. } => MessageType::Reference,
            Record::Value(_) => MessageType::Value,
            Record::TreeStart { .. } => MessageType::TreeStart,
            Record::TreeEnd => MessageType::TreeEnd,
            Record::ListDiff { .. } => MessageType::ListDiff,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Record::Reference { .. } => "reference",
            Record::Value(_) => "value",
            Record::TreeStart { .. } => "tree-start",
            Record::TreeEnd => "tree-end",
            Record::ListDiff { .. } => "list-diff",
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Record::Reference { index } => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*index);
                frame(MessageType::Reference, buf)
            }
            Record::Value(scalar) => {
                let mut buf = BytesMut::new();
                scalar.encode_into(&mut buf);
                frame(MessageType::Value, buf)
            }
            Record::TreeStart { index, id, kind } => {
                let mut buf = BytesMut::with_capacity(21);
                buf.put_u32(*index);
                put_uuid(&mut buf, *id);
                buf.put_u8(*kind);
                frame(MessageType::TreeStart, buf)
            }
            Record::TreeEnd => frame(MessageType::TreeEnd, BytesMut::new()),
            Record::ListDiff { ops } => {
                let mut buf = BytesMut::with_capacity(4 + ops.len() * 9);
                buf.put_u32(ops.len() as u32);
                for op in ops {
                    match op {
                        ListOp::Remove { pos } => {
                            buf.put_u8(0);
                            buf.put_u32(*pos);
                        }
                        ListOp::Move { from, to } => {
                            buf.put_u8(1);
                            buf.put_u32(*from);
                            buf.put_u32(*to);
                        }
                        ListOp::Insert { pos } => {
                            buf.put_u8(2);
                            buf.put_u32(*pos);
                        }
                    }
                }
                frame(MessageType::ListDiff, buf)
            }
        }
    }

    pub fn decode(msg_type: MessageType, mut payload: Bytes) -> Result<Self> {
        match msg_type {
            MessageType::Reference => {
                if payload.remaining() < 4 {
                    return Err(WireError::Protocol("Reference payload too short".into()));
                }
                Ok(Record::Reference {
                    index: payload.get_u32(),
                })
            }
            MessageType::Value => Ok(Record::Value(Scalar::decode(&mut payload)?)),
            MessageType::TreeStart => {
                if payload.remaining() < 21 {
                    return Err(WireError::Protocol("TreeStart payload too short".into()));
                }
                let index = payload.get_u32();
                let id = get_uuid(&mut payload, "TreeStart")?;
                let kind = payload.get_u8();
                Ok(Record::TreeStart { index, id, kind })
            }
            MessageType::TreeEnd => Ok(Record::TreeEnd),
            MessageType::ListDiff => {
                if payload.remaining() < 4 {
                    return Err(WireError::Protocol("ListDiff payload too short".into()));
                }
                let count = payload.get_u32() as usize;
                let mut ops = Vec::with_capacity(count);
                for _ in 0..count {
                    if payload.remaining() < 1 {
                        return Err(WireError::Protocol("ListDiff op truncated".into()));
                    }
                    let op = match payload.get_u8() {
                        0 => {
                            if payload.remaining() < 4 {
                                return Err(WireError::Protocol("Remove op truncated".into()));
                            }
                            ListOp::Remove {
                                pos: payload.get_u32(),
                            }
                        }
                        1 => {
                            if payload.remaining() < 8 {
                                return Err(WireError::Protocol("Move op truncated".into()));
                            }
                            ListOp::Move {
                                from: payload.get_u32(),
                                to: payload.get_u32(),
                            }
                        }
                        2 => {
                            if payload.remaining() < 4 {
                                return Err(WireError::Protocol("Insert op truncated".into()));
                            }
                            ListOp::Insert {
                                pos: payload.get_u32(),
                            }
                        }
                        tag => {
                            return Err(WireError::Protocol(format!("unknown list op tag {tag}")))
                        }
                    };
                    ops.push(op);
                }
                Ok(Record::ListDiff { ops })
            }
            other => Err(WireError::Protocol(format!(
                "{other:?} is not a patch record"
            ))),
        }
    }
}

// =============================================================================
// Frame reading/writing
// =============================================================================

/// Read a single frame from the stream. Returns (message_type, payload).
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(MessageType, Bytes)> {
    let len = r.read_u32().await?;

    // Validate frame size before allocation
    if len > MAX_FRAME_SIZE {
        return Err(WireError::Protocol(format!(
            "frame size {len} exceeds maximum allowed size {MAX_FRAME_SIZE}"
        )));
    }

    let msg_type = r.read_u8().await?;
    let msg_type = MessageType::from_u8(msg_type)
        .ok_or_else(|| WireError::Protocol(format!("unknown message type 0x{msg_type:02x}")))?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;

    Ok((msg_type, Bytes::from(payload)))
}

/// Write a pre-encoded frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Bytes) -> Result<()> {
    w.write_all(frame).await?;
    Ok(())
}

// =============================================================================
// Version Negotiation
// =============================================================================

/// Result of version negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionNegotiationResult {
    Supported(u16),
    TooOld { peer: u16, min_supported: u16 },
    TooNew { peer: u16, max_supported: u16 },
}

/// Check if a peer protocol version is supported.
pub fn negotiate_version(peer_version: u16) -> VersionNegotiationResult {
    if peer_version < PROTOCOL_VERSION_MIN {
        VersionNegotiationResult::TooOld {
            peer: peer_version,
            min_supported: PROTOCOL_VERSION_MIN,
        }
    } else if peer_version > PROTOCOL_VERSION_MAX {
        VersionNegotiationResult::TooNew {
            peer: peer_version,
            max_supported: PROTOCOL_VERSION_MAX,
        }
    } else {
        VersionNegotiationResult::Supported(peer_version)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_header(encoded: Bytes) -> Bytes {
        Bytes::copy_from_slice(&encoded[5..])
    }

    #[test]
    fn test_hello_roundtrip() {
        let hello = Hello::new(HelloFlags::VERIFY | HelloFlags::STATS);
        let decoded = Hello::decode(strip_header(hello.encode())).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert!(decoded.flags.contains(HelloFlags::VERIFY));
        assert!(decoded.flags.contains(HelloFlags::STATS));
    }

    #[test]
    fn test_file_start_roundtrip() {
        let start = FileStart {
            path: "config/app.json".into(),
            source_type: 1,
        };
        let decoded = FileStart::decode(strip_header(start.encode())).unwrap();
        assert_eq!(decoded.path, "config/app.json");
        assert_eq!(decoded.source_type, 1);
    }

    #[test]
    #[should_panic(expected = "str16 field")]
    fn test_oversized_str16_field_never_frames() {
        let start = FileStart {
            path: "p".repeat(MAX_PATH_LEN + 1),
            source_type: 1,
        };
        let _ = start.encode();
    }

    #[test]
    fn test_error_roundtrip() {
        let err = ErrorMsg {
            path: "bad.yaml".into(),
            code: 2,
            message: "no codec registered".into(),
        };
        let decoded = ErrorMsg::decode(strip_header(err.encode())).unwrap();
        assert_eq!(decoded.path, "bad.yaml");
        assert_eq!(decoded.code, 2);
        assert_eq!(decoded.message, "no codec registered");
    }

    #[test]
    fn test_done_roundtrip() {
        let done = Done {
            files_ok: 10,
            files_err: 2,
            records: 1234,
        };
        let decoded = Done::decode(strip_header(done.encode())).unwrap();
        assert_eq!(decoded.files_ok, 10);
        assert_eq!(decoded.files_err, 2);
        assert_eq!(decoded.records, 1234);
    }

    #[test]
    fn test_record_roundtrips() {
        let space = Space {
            comments: vec![Comment {
                style: CommentStyle::Line,
                text: " note".into(),
                prefix: "  ".into(),
            }],
            whitespace: "\n".into(),
        };
        let mut markers = Markers::default();
        markers.push(MarkerData::Warning {
            message: "deprecated".into(),
        });

        let records = vec![
            Record::Reference { index: 7 },
            Record::Value(Scalar::Null),
            Record::Value(Scalar::Bool(true)),
            Record::Value(Scalar::Int(-42)),
            Record::Value(Scalar::Str("\"quoted\"".into())),
            Record::Value(Scalar::Uuid(Uuid::new_v4())),
            Record::Value(Scalar::Space(space)),
            Record::Value(Scalar::Markers(markers)),
            Record::TreeStart {
                index: 3,
                id: Uuid::new_v4(),
                kind: 2,
            },
            Record::TreeEnd,
            Record::ListDiff {
                ops: vec![
                    ListOp::Remove { pos: 1 },
                    ListOp::Move { from: 2, to: 0 },
                    ListOp::Insert { pos: 2 },
                ],
            },
        ];

        for record in records {
            let encoded = record.encode();
            let msg_type = MessageType::from_u8(encoded[4]).unwrap();
            let decoded = Record::decode(msg_type, strip_header(encoded)).unwrap();
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn test_truncated_payloads_are_protocol_errors() {
        let err = Record::decode(MessageType::Reference, Bytes::from_static(&[0, 0])).unwrap_err();
        assert!(err.is_connection_fatal());

        let err = Record::decode(MessageType::TreeStart, Bytes::from_static(&[1])).unwrap_err();
        assert!(err.is_connection_fatal());

        assert!(Hello::decode(Bytes::from_static(&[0])).is_err());
        assert!(Done::decode(Bytes::from_static(&[0; 8])).is_err());
    }

    #[test]
    fn test_session_frames_are_not_records() {
        let err = Record::decode(MessageType::Hello, Bytes::new()).unwrap_err();
        match err {
            WireError::Protocol(msg) => assert!(msg.contains("not a patch record")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_message_type_from_u8() {
        assert_eq!(MessageType::from_u8(0x01), Some(MessageType::Hello));
        assert_eq!(MessageType::from_u8(0x12), Some(MessageType::TreeStart));
        assert_eq!(MessageType::from_u8(0x14), Some(MessageType::ListDiff));
        assert_eq!(MessageType::from_u8(0xFF), None);
        assert!(MessageType::ListDiff.is_record());
        assert!(!MessageType::Done.is_record());
    }

    #[test]
    fn test_version_negotiation() {
        assert_eq!(
            negotiate_version(PROTOCOL_VERSION),
            VersionNegotiationResult::Supported(PROTOCOL_VERSION)
        );
        match negotiate_version(99) {
            VersionNegotiationResult::TooNew {
                peer,
                max_supported,
            } => {
                assert_eq!(peer, 99);
                assert_eq!(max_supported, PROTOCOL_VERSION_MAX);
            }
            other => panic!("expected TooNew, got {other:?}"),
        }
        match negotiate_version(0) {
            VersionNegotiationResult::TooOld { peer, .. } => assert_eq!(peer, 0),
            other => panic!("expected TooOld, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_frame_io_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let hello = Hello::new(HelloFlags::VERIFY);
        write_frame(&mut a, &hello.encode()).await.unwrap();
        let (msg_type, payload) = read_frame(&mut b).await.unwrap();
        assert_eq!(msg_type, MessageType::Hello);
        let decoded = Hello::decode(payload).unwrap();
        assert!(decoded.flags.contains(HelloFlags::VERIFY));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_u8(MessageType::Hello as u8);
        tokio::io::AsyncWriteExt::write_all(&mut a, &buf)
            .await
            .unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(err.is_connection_fatal());
    }
}
