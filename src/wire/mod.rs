//! Wire message port
//!
//! The engine builds request values, hands them to a [`WireCodec`] for
//! serialization, and interprets the two kinds of payload it gets back:
//! the length-prefixed data stream of a read exchange and the single
//! response message of a write exchange. The byte layout of the framed
//! messages themselves belongs to the codec, not to the engine.

use bytes::Bytes;

use crate::error::Result;
use crate::target::TargetId;

// =============================================================================
// Framing Constants
// =============================================================================

/// Size of the data-length prefix on a read response stream
pub const DATA_LEN_PREFIX_SIZE: usize = 8;

/// Upper bound for a serialized request or response message
pub const MAX_MSG_SIZE: usize = 4096;

// =============================================================================
// Request / Response Types
// =============================================================================

/// Per-request flags mirrored into the message header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    /// Ask the server to verify the client's session still covers this
    /// target (set once a write to the target succeeded in this session)
    pub session_check: bool,

    /// The addressed target ID names a buddy mirror group
    pub mirror: bool,

    /// Address the secondary member of the mirror group
    pub mirror_second: bool,

    /// Ask the server to forward the write to its mirror buddy
    pub mirror_forward: bool,

    /// Ask the server to skip disk I/O (benchmarking)
    pub disable_io: bool,
}

/// Quota accounting identity attached to writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    pub uid: u32,
    pub gid: u32,
}

/// Request for one chunk read from one target.
#[derive(Debug)]
pub struct ReadRequest<'a> {
    /// Session file handle
    pub handle_id: &'a str,

    /// Stripe target (mirror group ID for mirrored patterns)
    pub target: TargetId,

    /// Offset inside the target's chunk file
    pub local_offset: u64,

    /// Bytes requested
    pub len: u64,

    pub flags: RequestFlags,
}

/// Request for one chunk write to one target.
#[derive(Debug)]
pub struct WriteRequest<'a> {
    /// Session file handle
    pub handle_id: &'a str,

    /// Stripe target (mirror group ID for mirrored patterns)
    pub target: TargetId,

    /// Offset inside the target's chunk file
    pub local_offset: u64,

    /// Bytes that will follow the request message
    pub len: u64,

    pub flags: RequestFlags,

    /// Owner identity, present when quota accounting is enabled
    pub quota: Option<QuotaInfo>,
}

/// Server response to a write exchange.
///
/// `value` is the number of bytes the server wrote, or a negated wire
/// error code (see [`Error::from_code`](crate::Error::from_code)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    pub value: i64,
}

// =============================================================================
// Codec Port
// =============================================================================

/// Port for message serialization.
pub trait WireCodec: Send + Sync {
    /// Serialize a read request into one framed message.
    fn encode_read(&self, req: &ReadRequest<'_>) -> Bytes;

    /// Serialize a write request into one framed message.
    fn encode_write(&self, req: &WriteRequest<'_>) -> Bytes;

    /// Decode the response message of a write exchange.
    fn decode_write_response(&self, buf: &[u8]) -> Result<WriteResponse>;

    /// Decode one data-length prefix of a read response stream.
    ///
    /// Positive: that many payload bytes follow. Zero: clean end of
    /// stream. Negative: negated wire error code, stream ends.
    fn decode_data_len(&self, buf: &[u8; DATA_LEN_PREFIX_SIZE]) -> i64;
}
