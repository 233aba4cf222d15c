use super::{FrameHeader, SessionSerializer};
use crate::error::SessionResult;
use crate::model::{RecordKind, SessionRecord};
use std::sync::Arc;
use tracing::trace;

/// Tries each codec in order; the first that claims the record or payload wins.
#[derive(Debug)]
pub struct ComposableSerializer {
    serializers: Vec<Arc<dyn SessionSerializer>>,
    supported: Vec<RecordKind>,
}

impl ComposableSerializer {
    /// Builds a chain. An empty list yields `None` and a single codec is returned
    /// as-is rather than wrapped.
    pub fn compose(
        mut serializers: Vec<Arc<dyn SessionSerializer>>,
    ) -> Option<Arc<dyn SessionSerializer>> {
        match serializers.len() {
            0 => None,
            1 => serializers.pop(),
            _ => Some(Arc::new(Self::new(serializers))),
        }
    }

    fn new(serializers: Vec<Arc<dyn SessionSerializer>>) -> Self {
        let mut supported: Vec<RecordKind> = Vec::new();
        for kind in serializers
            .iter()
            .flat_map(|serializer| serializer.supported_types().iter().copied())
        {
            if !supported.contains(&kind) {
                supported.push(kind);
            }
        }
        Self {
            serializers,
            supported,
        }
    }

    pub fn serializers(&self) -> &[Arc<dyn SessionSerializer>] {
        &self.serializers
    }

    fn write_with<F>(
        &self,
        session: &mut SessionRecord,
        sink: &mut Vec<u8>,
        mut write: F,
    ) -> SessionResult<bool>
    where
        F: FnMut(&dyn SessionSerializer, &mut SessionRecord, &mut Vec<u8>) -> SessionResult<bool>,
    {
        for serializer in &self.serializers {
            let mark = sink.len();
            if write(serializer.as_ref(), &mut *session, &mut *sink)? {
                trace!(
                    session_id = %session.id(),
                    type_tag = serializer.type_tag(),
                    "session written by chained serializer"
                );
                return Ok(true);
            }
            sink.truncate(mark);
        }
        Ok(false)
    }
}

impl SessionSerializer for ComposableSerializer {
    /// Tag of the first codec in the chain.
    fn type_tag(&self) -> i32 {
        self.serializers
            .first()
            .map(|serializer| serializer.type_tag())
            .unwrap_or_default()
    }

    fn supported_types(&self) -> &[RecordKind] {
        &self.supported
    }

    fn accepts(&self, header: &FrameHeader) -> bool {
        self.serializers
            .iter()
            .any(|serializer| serializer.accepts(header))
    }

    fn serialize_full(
        &self,
        session: &mut SessionRecord,
        sink: &mut Vec<u8>,
    ) -> SessionResult<bool> {
        self.write_with(session, sink, |serializer, session, sink| {
            serializer.serialize_full(session, sink)
        })
    }

    fn serialize(&self, session: &mut SessionRecord, sink: &mut Vec<u8>) -> SessionResult<bool> {
        self.write_with(session, sink, |serializer, session, sink| {
            serializer.serialize(session, sink)
        })
    }

    fn deserialize(&self, source: &[u8]) -> SessionResult<Option<SessionRecord>> {
        for serializer in &self.serializers {
            if let Some(session) = serializer.deserialize(source)? {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }

    fn apply_delta(&self, base: &mut SessionRecord, source: &[u8]) -> SessionResult<bool> {
        for serializer in &self.serializers {
            if serializer.apply_delta(base, source)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
