//! Session codecs.
//!
//! Every payload starts with a five byte [`FrameHeader`]: the big-endian `i32` type
//! tag of the codec that wrote it, followed by a frame byte saying whether the body is
//! a full record or a delta. Codecs use the tag to recognise their own payloads, which
//! is what lets [`ComposableSerializer`] route reads without a global registry.
//!
//! Three codecs are provided:
//!
//! - [`DataSerializer`]: compact binary, full state on first write and deltas afterwards
//!   for [`RecordKind::DeltaCapableSession`] records.
//! - [`SchemaSerializer`]: named-field portable document, always full state.
//! - [`ComposableSerializer`]: ordered fallback chain over other codecs.

mod composite;
mod data;
mod schema;

pub use composite::ComposableSerializer;
pub use data::{DataSerializer, DATA_SERIALIZER_TYPE_TAG};
pub use schema::{PortableSession, SchemaSerializer, SCHEMA_SERIALIZER_TYPE_TAG};

use crate::error::{SessionError, SessionResult};
use crate::model::{RecordKind, SessionRecord};
use crate::wire;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Frame {
    Full(RecordKind),
    Delta,
}

impl Frame {
    fn to_byte(self) -> u8 {
        match self {
            Frame::Full(RecordKind::Session) => 0,
            Frame::Full(RecordKind::DeltaCapableSession) => 1,
            Frame::Delta => 2,
        }
    }

    fn from_byte(byte: u8) -> SessionResult<Self> {
        match byte {
            0 => Ok(Frame::Full(RecordKind::Session)),
            1 => Ok(Frame::Full(RecordKind::DeltaCapableSession)),
            2 => Ok(Frame::Delta),
            other => Err(SessionError::serialization(format!(
                "unknown session frame marker {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub type_tag: i32,
    pub frame: Frame,
}

impl FrameHeader {
    pub const LEN: usize = 5;

    pub fn new(type_tag: i32, frame: Frame) -> Self {
        Self { type_tag, frame }
    }

    /// Reads the header from the front of `payload`.
    pub fn read(payload: &[u8]) -> SessionResult<Self> {
        let mut input = payload;
        let type_tag = wire::read_i32(&mut input, "type tag")?;
        let frame = Frame::from_byte(wire::read_u8(&mut input, "frame marker")?)?;
        Ok(Self { type_tag, frame })
    }

    pub(crate) fn write(&self, sink: &mut Vec<u8>) -> SessionResult<()> {
        wire::write_i32(sink, self.type_tag, "type tag")?;
        wire::write_u8(sink, self.frame.to_byte(), "frame marker")
    }

    pub fn is_delta(&self) -> bool {
        self.frame == Frame::Delta
    }
}

/// A codec for [`SessionRecord`]s.
///
/// Writing is the commit point for change tracking: a successful `serialize` clears
/// the record's delta. The `&mut` receiver on the record is the exclusive section
/// that keeps writers out while the payload is produced.
pub trait SessionSerializer: Send + Sync + fmt::Debug {
    /// Stable tag written at the front of every payload this codec produces.
    fn type_tag(&self) -> i32;

    /// Record kinds this codec can encode.
    fn supported_types(&self) -> &[RecordKind];

    fn can_serialize(&self, kind: RecordKind) -> bool {
        self.supported_types().contains(&kind)
    }

    /// True when `header` was written by this codec.
    fn accepts(&self, header: &FrameHeader) -> bool {
        header.type_tag == self.type_tag()
    }

    /// Writes the whole record. Returns `Ok(false)` without touching `sink` when the
    /// record kind is not supported.
    fn serialize_full(&self, session: &mut SessionRecord, sink: &mut Vec<u8>)
        -> SessionResult<bool>;

    /// Writes the record in whatever form the codec prefers (full or delta).
    fn serialize(&self, session: &mut SessionRecord, sink: &mut Vec<u8>) -> SessionResult<bool> {
        self.serialize_full(session, sink)
    }

    /// Rebuilds a record from a full payload. Returns `Ok(None)` when the payload was
    /// written by another codec.
    fn deserialize(&self, source: &[u8]) -> SessionResult<Option<SessionRecord>>;

    /// Applies a delta payload on top of `base`. Returns `Ok(false)` when the payload
    /// is not a delta this codec understands.
    fn apply_delta(&self, _base: &mut SessionRecord, _source: &[u8]) -> SessionResult<bool> {
        Ok(false)
    }
}

/// What a codec hands to a backing store's type registry.
#[derive(Clone, Debug)]
pub struct SerializerRegistration {
    pub type_tag: i32,
    pub supported_types: Vec<RecordKind>,
    pub serializer: Arc<dyn SessionSerializer>,
}

impl SerializerRegistration {
    pub fn of(serializer: Arc<dyn SessionSerializer>) -> Self {
        Self {
            type_tag: serializer.type_tag(),
            supported_types: serializer.supported_types().to_vec(),
            serializer,
        }
    }
}

/// Serializes `session` with `serializer`, failing if no codec claims the record.
pub fn encode(
    serializer: &dyn SessionSerializer,
    session: &mut SessionRecord,
) -> SessionResult<Vec<u8>> {
    let mut sink = Vec::new();
    if serializer.serialize(session, &mut sink)? {
        Ok(sink)
    } else {
        Err(unsupported_kind(session.kind()))
    }
}

/// Like [`encode`] but always produces a full payload.
pub fn encode_full(
    serializer: &dyn SessionSerializer,
    session: &mut SessionRecord,
) -> SessionResult<Vec<u8>> {
    let mut sink = Vec::new();
    if serializer.serialize_full(session, &mut sink)? {
        Ok(sink)
    } else {
        Err(unsupported_kind(session.kind()))
    }
}

/// Deserializes a full payload, failing if no codec recognises it.
pub fn decode(serializer: &dyn SessionSerializer, payload: &[u8]) -> SessionResult<SessionRecord> {
    match serializer.deserialize(payload)? {
        Some(session) => Ok(session),
        None => {
            let header = FrameHeader::read(payload)?;
            Err(SessionError::serialization(format!(
                "no serializer registered for type tag {:#x}",
                header.type_tag
            )))
        }
    }
}

fn unsupported_kind(kind: RecordKind) -> SessionError {
    SessionError::serialization(format!("no serializer accepts record kind {kind:?}"))
}
