use super::{Frame, FrameHeader, SessionSerializer};
use crate::attributes::{AttributeMap, AttributeValue};
use crate::clock::{from_epoch_millis, to_epoch_millis};
use crate::error::{serde_error, SessionError, SessionResult};
use crate::model::{RecordKind, SessionId, SessionRecord};
use crate::wire;
use std::io::Read;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::trace;

/// Type tag of [`DataSerializer`] payloads ("GSD1").
pub const DATA_SERIALIZER_TYPE_TAG: i32 = 0x4753_4431;

const SUPPORTED: [RecordKind; 2] = [RecordKind::Session, RecordKind::DeltaCapableSession];

const ATTRIBUTE_SET: u8 = 1;
const ATTRIBUTE_REMOVED: u8 = 0;

/// Compact binary codec.
///
/// Full body, in order: `id | creation millis (i64) | last accessed millis (i64) |
/// max inactive seconds (i64) | principal length (i32) | principal bytes |
/// attributes blob`. A principal length of zero means no principal.
///
/// Delta body: `id | last accessed millis | max inactive seconds | principal |
/// change count (i32) | (name | marker | value?)*`, written only for persisted
/// delta-capable records.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataSerializer;

impl DataSerializer {
    pub fn new() -> Self {
        Self
    }

    fn write_full(&self, session: &SessionRecord, sink: &mut Vec<u8>) -> SessionResult<()> {
        FrameHeader::new(DATA_SERIALIZER_TYPE_TAG, Frame::Full(session.kind())).write(sink)?;
        wire::write_string(sink, session.id().as_str(), "session id")?;
        wire::write_i64(sink, to_epoch_millis(session.creation_time()), "creation time")?;
        wire::write_i64(sink, to_epoch_millis(session.last_accessed_time()), "last accessed time")?;
        wire::write_i64(
            sink,
            session.max_inactive_interval().whole_seconds(),
            "max inactive interval",
        )?;
        write_principal(sink, session.principal_name())?;

        let mut blob = Vec::new();
        wire::write_len(&mut blob, session.attributes().len(), "attribute count")?;
        for (name, value) in session.attributes().iter() {
            wire::write_string(&mut blob, name, "attribute name")?;
            write_value(&mut blob, value)?;
        }
        wire::write_bytes(sink, &blob, "attributes")
    }

    fn write_delta(&self, session: &SessionRecord, sink: &mut Vec<u8>) -> SessionResult<()> {
        FrameHeader::new(DATA_SERIALIZER_TYPE_TAG, Frame::Delta).write(sink)?;
        wire::write_string(sink, session.id().as_str(), "session id")?;
        wire::write_i64(sink, to_epoch_millis(session.last_accessed_time()), "last accessed time")?;
        wire::write_i64(
            sink,
            session.max_inactive_interval().whole_seconds(),
            "max inactive interval",
        )?;
        write_principal(sink, session.principal_name())?;

        let changes: Vec<_> = session.attributes().delta_entries().collect();
        wire::write_len(sink, changes.len(), "change count")?;
        for (name, value) in changes {
            wire::write_string(sink, name, "attribute name")?;
            match value {
                Some(value) => {
                    wire::write_u8(sink, ATTRIBUTE_SET, "attribute marker")?;
                    write_value(sink, value)?;
                }
                None => wire::write_u8(sink, ATTRIBUTE_REMOVED, "attribute marker")?,
            }
        }
        Ok(())
    }

    fn read_full(&self, kind: RecordKind, mut input: &[u8]) -> SessionResult<SessionRecord> {
        let id = read_id(&mut input)?;
        let creation_time = read_time(&mut input, "creation time")?;
        let last_accessed_time = read_time(&mut input, "last accessed time")?;
        let max_inactive = wire::read_i64(&mut input, "max inactive interval")?;
        let principal_name = read_principal(&mut input)?;

        let blob = wire::read_bytes(&mut input, "attributes")?;
        let mut blob = blob.as_slice();
        let count = wire::read_len(&mut blob, "attribute count")?;
        let mut attributes = AttributeMap::new();
        for _ in 0..count {
            let name = wire::read_string(&mut blob, "attribute name")?;
            let value = read_value(&mut blob)?;
            attributes.load(name, value);
        }

        SessionRecord::restore(
            id,
            creation_time,
            last_accessed_time,
            Duration::seconds(max_inactive),
            principal_name,
            attributes,
            kind,
        )
    }
}

impl SessionSerializer for DataSerializer {
    fn type_tag(&self) -> i32 {
        DATA_SERIALIZER_TYPE_TAG
    }

    fn supported_types(&self) -> &[RecordKind] {
        &SUPPORTED
    }

    fn serialize_full(
        &self,
        session: &mut SessionRecord,
        sink: &mut Vec<u8>,
    ) -> SessionResult<bool> {
        if !self.can_serialize(session.kind()) {
            return Ok(false);
        }
        self.write_full(session, sink)?;
        session.commit();
        Ok(true)
    }

    fn serialize(&self, session: &mut SessionRecord, sink: &mut Vec<u8>) -> SessionResult<bool> {
        if !self.can_serialize(session.kind()) {
            return Ok(false);
        }
        let delta = session.kind() == RecordKind::DeltaCapableSession
            && !session.requires_full_write();
        if delta {
            trace!(
                session_id = %session.id(),
                changed = session.attributes().changed_names().len(),
                "writing session delta"
            );
            self.write_delta(session, sink)?;
        } else {
            self.write_full(session, sink)?;
        }
        session.commit();
        Ok(true)
    }

    fn deserialize(&self, source: &[u8]) -> SessionResult<Option<SessionRecord>> {
        let header = FrameHeader::read(source)?;
        if !self.accepts(&header) {
            return Ok(None);
        }
        match header.frame {
            Frame::Full(kind) => self
                .read_full(kind, &source[FrameHeader::LEN..])
                .map(Some),
            Frame::Delta => Err(SessionError::serialization(
                "a delta payload cannot be read without the stored base record",
            )),
        }
    }

    fn apply_delta(&self, base: &mut SessionRecord, source: &[u8]) -> SessionResult<bool> {
        let header = FrameHeader::read(source)?;
        if !self.accepts(&header) || !header.is_delta() {
            return Ok(false);
        }
        let mut input = &source[FrameHeader::LEN..];
        let id = read_id(&mut input)?;
        if &id != base.id() {
            return Err(SessionError::serialization(format!(
                "delta for session {id} applied to session {}",
                base.id()
            )));
        }
        let last_accessed_time = read_time(&mut input, "last accessed time")?;
        let max_inactive = wire::read_i64(&mut input, "max inactive interval")?;
        let principal_name = read_principal(&mut input)?;
        base.restore_metadata(last_accessed_time, Duration::seconds(max_inactive))?;
        base.restore_principal_name(principal_name);

        let count = wire::read_len(&mut input, "change count")?;
        for _ in 0..count {
            let name = wire::read_string(&mut input, "attribute name")?;
            match wire::read_u8(&mut input, "attribute marker")? {
                ATTRIBUTE_SET => {
                    let value = read_value(&mut input)?;
                    base.attributes_mut().load(name, value);
                }
                ATTRIBUTE_REMOVED => base.attributes_mut().unload(&name),
                other => {
                    return Err(SessionError::serialization(format!(
                        "unknown attribute marker {other} for {name}"
                    )))
                }
            }
        }
        Ok(true)
    }
}

fn write_principal(sink: &mut Vec<u8>, principal: Option<&str>) -> SessionResult<()> {
    let bytes = principal.unwrap_or_default().as_bytes();
    wire::write_len(sink, bytes.len(), "principal name length")?;
    if !bytes.is_empty() {
        std::io::Write::write_all(sink, bytes)
            .map_err(|err| crate::error::io_error("writing principal name", err))?;
    }
    Ok(())
}

fn read_principal<R: Read>(input: &mut R) -> SessionResult<Option<String>> {
    let len = wire::read_len(input, "principal name length")?;
    if len == 0 {
        return Ok(None);
    }
    let bytes = wire::read_exact_vec(input, len, "principal name")?;
    wire::utf8(bytes, "principal name").map(Some)
}

fn write_value(sink: &mut Vec<u8>, value: &AttributeValue) -> SessionResult<()> {
    let encoded = serde_json::to_vec(value.as_ref()).map_err(serde_error)?;
    wire::write_bytes(sink, &encoded, "attribute value")
}

fn read_value<R: Read>(input: &mut R) -> SessionResult<AttributeValue> {
    let bytes = wire::read_bytes(input, "attribute value")?;
    let value = serde_json::from_slice(&bytes).map_err(serde_error)?;
    Ok(Arc::new(value))
}

fn read_id<R: Read>(input: &mut R) -> SessionResult<SessionId> {
    let raw = wire::read_string(input, "session id")?;
    SessionId::parse(raw).map_err(|err| SessionError::serialization(err.to_string()))
}

fn read_time<R: Read>(input: &mut R, field: &str) -> SessionResult<OffsetDateTime> {
    let millis = wire::read_i64(input, field)?;
    from_epoch_millis(millis)
        .ok_or_else(|| SessionError::serialization(format!("{field} {millis} is out of range")))
}
