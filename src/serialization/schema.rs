use super::{Frame, FrameHeader, SessionSerializer};
use crate::attributes::AttributeMap;
use crate::clock::{from_epoch_millis, to_epoch_millis};
use crate::error::{serde_error, SessionError, SessionResult};
use crate::model::{RecordKind, SessionId, SessionRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::Duration;

/// Type tag of [`SchemaSerializer`] payloads ("GSP1").
pub const SCHEMA_SERIALIZER_TYPE_TAG: i32 = 0x4753_5031;

const SUPPORTED: [RecordKind; 1] = [RecordKind::Session];

/// Named-field form of a session, readable without the Rust types.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PortableSession {
    pub id: String,
    pub creation_time: i64,
    pub last_accessed_time: i64,
    pub max_inactive_interval_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_name: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl PortableSession {
    pub fn from_record(session: &SessionRecord) -> Self {
        Self {
            id: session.id().as_str().to_owned(),
            creation_time: to_epoch_millis(session.creation_time()),
            last_accessed_time: to_epoch_millis(session.last_accessed_time()),
            max_inactive_interval_seconds: session.max_inactive_interval().whole_seconds(),
            principal_name: session.principal_name().map(str::to_owned),
            attributes: session
                .attributes()
                .iter()
                .map(|(name, value)| (name.to_owned(), value.as_ref().clone()))
                .collect(),
        }
    }

    pub fn into_record(self) -> SessionResult<SessionRecord> {
        let id = SessionId::parse(self.id)
            .map_err(|err| SessionError::serialization(err.to_string()))?;
        let creation_time = from_epoch_millis(self.creation_time).ok_or_else(|| {
            SessionError::serialization(format!(
                "creation time {} is out of range",
                self.creation_time
            ))
        })?;
        let last_accessed_time = from_epoch_millis(self.last_accessed_time).ok_or_else(|| {
            SessionError::serialization(format!(
                "last accessed time {} is out of range",
                self.last_accessed_time
            ))
        })?;
        let mut attributes = AttributeMap::new();
        for (name, value) in self.attributes {
            attributes.load(name, Arc::new(value));
        }
        SessionRecord::restore(
            id,
            creation_time,
            last_accessed_time,
            Duration::seconds(self.max_inactive_interval_seconds),
            self.principal_name,
            attributes,
            RecordKind::Session,
        )
    }
}

/// Portable codec: a JSON document of named fields behind the frame header.
///
/// Always writes the full record.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchemaSerializer;

impl SchemaSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Reads the portable document without building a [`SessionRecord`].
    pub fn read_portable(&self, source: &[u8]) -> SessionResult<Option<PortableSession>> {
        let header = FrameHeader::read(source)?;
        if !self.accepts(&header) {
            return Ok(None);
        }
        if header.is_delta() {
            return Err(SessionError::serialization(
                "portable session payloads are never deltas",
            ));
        }
        serde_json::from_slice(&source[FrameHeader::LEN..])
            .map(Some)
            .map_err(serde_error)
    }
}

impl SessionSerializer for SchemaSerializer {
    fn type_tag(&self) -> i32 {
        SCHEMA_SERIALIZER_TYPE_TAG
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
        let document = PortableSession::from_record(session);
        let body = serde_json::to_vec(&document).map_err(serde_error)?;
        FrameHeader::new(SCHEMA_SERIALIZER_TYPE_TAG, Frame::Full(RecordKind::Session)).write(sink)?;
        sink.extend_from_slice(&body);
        session.commit();
        Ok(true)
    }

    fn deserialize(&self, source: &[u8]) -> SessionResult<Option<SessionRecord>> {
        match self.read_portable(source)? {
            Some(document) => document.into_record().map(Some),
            None => Ok(None),
        }
    }
}
