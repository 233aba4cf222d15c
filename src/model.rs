use crate::attributes::{AttributeMap, AttributeValue, DirtyPredicate};
use crate::clock::truncate_to_millis;
use crate::error::{invalid_argument, SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Attribute whose string value is denormalized into [`SessionRecord::principal_name`].
pub const PRINCIPAL_NAME_ATTRIBUTE: &str = "PRINCIPAL_NAME_INDEX_NAME";

pub const DEFAULT_MAX_INACTIVE_INTERVAL: Duration = Duration::seconds(1800);

/// Longest idle interval or fixed lifetime accepted from configuration or a payload.
pub const MAX_EXPIRY_INTERVAL: Duration = Duration::seconds(i32::MAX as i64);

/// True when `interval` can be added to any session timestamp without overflow.
pub fn expiry_interval_in_range(interval: Duration) -> bool {
    interval <= MAX_EXPIRY_INTERVAL
}

/// Opaque session identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: impl Into<String>) -> SessionResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(invalid_argument("session id must not be empty"));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concrete record shape, used by serializers to claim what they can encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Always written in full.
    Session,
    /// May be written as a delta once persisted.
    DeltaCapableSession,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    New,
    Persisted,
    Expired,
    Deleted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Deleted)
    }
}

/// One user session: identity, timestamps and attributes.
///
/// Invariant: `last_accessed_time >= creation_time`.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    id: SessionId,
    previous_id: Option<SessionId>,
    creation_time: OffsetDateTime,
    last_accessed_time: OffsetDateTime,
    max_inactive_interval: Duration,
    principal_name: Option<String>,
    attributes: AttributeMap,
    kind: RecordKind,
    state: SessionState,
    dirty: bool,
}

/// A record shared between threads; the lock spans serialize and commit.
pub type SharedSession = Arc<parking_lot::Mutex<SessionRecord>>;

impl SessionRecord {
    pub fn new() -> Self {
        Self::create(SessionId::new(), OffsetDateTime::now_utc(), RecordKind::Session)
    }

    pub fn create(id: SessionId, now: OffsetDateTime, kind: RecordKind) -> Self {
        let now = truncate_to_millis(now);
        Self {
            id,
            previous_id: None,
            creation_time: now,
            last_accessed_time: now,
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL,
            principal_name: None,
            attributes: AttributeMap::new(),
            kind,
            state: SessionState::New,
            dirty: true,
        }
    }

    /// Rebuilds a persisted record from decoded fields.
    pub(crate) fn restore(
        id: SessionId,
        creation_time: OffsetDateTime,
        last_accessed_time: OffsetDateTime,
        max_inactive_interval: Duration,
        principal_name: Option<String>,
        attributes: AttributeMap,
        kind: RecordKind,
    ) -> SessionResult<Self> {
        if last_accessed_time < creation_time {
            return Err(SessionError::serialization(format!(
                "session {id} was last accessed before it was created"
            )));
        }
        check_decoded_interval(max_inactive_interval)?;
        Ok(Self {
            id,
            previous_id: None,
            creation_time,
            last_accessed_time,
            max_inactive_interval,
            principal_name,
            attributes,
            kind,
            state: SessionState::Persisted,
            dirty: false,
        })
    }

    pub fn with_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_interval = interval.min(MAX_EXPIRY_INTERVAL);
        self
    }

    pub fn with_dirty_predicate(mut self, predicate: Arc<dyn DirtyPredicate>) -> Self {
        self.attributes.set_predicate(predicate);
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Id this record was stored under before [`change_session_id`](Self::change_session_id).
    pub fn previous_id(&self) -> Option<&SessionId> {
        self.previous_id.as_ref()
    }

    pub fn change_session_id(&mut self) -> &SessionId {
        let old = std::mem::take(&mut self.id);
        if self.previous_id.is_none() && self.state != SessionState::New {
            self.previous_id = Some(old);
        }
        self.dirty = true;
        &self.id
    }

    pub fn creation_time(&self) -> OffsetDateTime {
        self.creation_time
    }

    pub fn last_accessed_time(&self) -> OffsetDateTime {
        self.last_accessed_time
    }

    pub fn set_last_accessed_time(&mut self, at: OffsetDateTime) -> SessionResult<()> {
        let at = truncate_to_millis(at);
        if at < self.creation_time {
            return Err(invalid_argument(format!(
                "last accessed time {at} precedes creation time {}",
                self.creation_time
            )));
        }
        if at != self.last_accessed_time {
            self.last_accessed_time = at;
            self.dirty = true;
        }
        Ok(())
    }

    /// Records an access at `now`, never moving before the creation time.
    pub fn touch(&mut self, now: OffsetDateTime) {
        let at = truncate_to_millis(now).max(self.creation_time);
        if at != self.last_accessed_time {
            self.last_accessed_time = at;
            self.dirty = true;
        }
    }

    pub fn max_inactive_interval(&self) -> Duration {
        self.max_inactive_interval
    }

    /// A negative interval disables idle expiry. Longer intervals than
    /// [`MAX_EXPIRY_INTERVAL`] are clamped to it.
    pub fn set_max_inactive_interval(&mut self, interval: Duration) {
        let interval = interval.min(MAX_EXPIRY_INTERVAL);
        if interval != self.max_inactive_interval {
            self.max_inactive_interval = interval;
            self.dirty = true;
        }
    }

    pub fn principal_name(&self) -> Option<&str> {
        self.principal_name.as_deref()
    }

    pub fn set_principal_name(&mut self, name: Option<&str>) -> SessionResult<()> {
        match name {
            Some(name) => self.set_attribute(PRINCIPAL_NAME_ATTRIBUTE, Value::from(name))?,
            None => self.remove_attribute(PRINCIPAL_NAME_ATTRIBUTE)?,
        };
        Ok(())
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.attributes.names()
    }

    pub fn set_attribute(
        &mut self,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> SessionResult<Option<AttributeValue>> {
        let previous = self.attributes.set(name, value)?;
        if name == PRINCIPAL_NAME_ATTRIBUTE {
            self.sync_principal_name();
        }
        Ok(previous)
    }

    pub fn remove_attribute(&mut self, name: &str) -> SessionResult<Option<AttributeValue>> {
        let removed = self.attributes.remove(name)?;
        if name == PRINCIPAL_NAME_ATTRIBUTE {
            self.sync_principal_name();
        }
        Ok(removed)
    }

    pub(crate) fn sync_principal_name(&mut self) {
        let principal = self
            .attributes
            .get(PRINCIPAL_NAME_ATTRIBUTE)
            .and_then(|value| value.as_str())
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        if principal != self.principal_name {
            self.principal_name = principal;
            self.dirty = true;
        }
    }

    pub(crate) fn restore_principal_name(&mut self, principal: Option<String>) {
        self.principal_name = principal;
    }

    pub(crate) fn restore_metadata(
        &mut self,
        last_accessed_time: OffsetDateTime,
        max_inactive_interval: Duration,
    ) -> SessionResult<()> {
        check_decoded_interval(max_inactive_interval)?;
        self.last_accessed_time = last_accessed_time.max(self.creation_time);
        self.max_inactive_interval = max_inactive_interval;
        Ok(())
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_new(&self) -> bool {
        self.state == SessionState::New
    }

    /// True when anything changed since the last commit.
    pub fn has_delta(&self) -> bool {
        self.dirty || self.attributes.has_delta()
    }

    /// True when the next write must carry the whole record.
    pub fn requires_full_write(&self) -> bool {
        self.state == SessionState::New || self.previous_id.is_some()
    }

    /// Clears all change tracking; called once a payload has been produced.
    pub fn commit(&mut self) {
        self.attributes.commit();
        self.dirty = false;
        self.previous_id = None;
        if self.state == SessionState::New {
            self.state = SessionState::Persisted;
        }
    }

    pub(crate) fn mark_expired(&mut self) {
        self.state = SessionState::Expired;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = SessionState::Deleted;
    }

    /// Idle check against `max_inactive_interval`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        if self.max_inactive_interval.is_negative() {
            return false;
        }
        // An interval reaching past the representable range never elapses.
        now.checked_sub(self.max_inactive_interval)
            .is_some_and(|cutoff| cutoff >= self.last_accessed_time)
    }
}

fn check_decoded_interval(interval: Duration) -> SessionResult<()> {
    if expiry_interval_in_range(interval) {
        Ok(())
    } else {
        Err(SessionError::serialization(format!(
            "max inactive interval {interval} is out of range"
        )))
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SessionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.creation_time == other.creation_time
            && self.last_accessed_time == other.last_accessed_time
            && self.max_inactive_interval == other.max_inactive_interval
            && self.principal_name == other.principal_name
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(seconds)
    }

    fn record() -> SessionRecord {
        SessionRecord::create(SessionId::new(), at(1_000), RecordKind::Session)
    }

    #[test]
    fn new_record_is_new_and_dirty() {
        let session = record();
        assert_eq!(session.state(), SessionState::New);
        assert!(session.has_delta());
        assert!(session.requires_full_write());
        assert_eq!(session.creation_time(), session.last_accessed_time());
    }

    #[test]
    fn commit_moves_to_persisted_and_clears_delta() {
        let mut session = record();
        session.set_attribute("a", json!("x")).expect("set");
        session.commit();
        assert_eq!(session.state(), SessionState::Persisted);
        assert!(!session.has_delta());
        assert!(!session.requires_full_write());
    }

    #[test]
    fn touch_never_precedes_creation() {
        let mut session = record();
        session.commit();
        session.touch(at(10));
        assert_eq!(session.last_accessed_time(), at(1_000));
        assert!(!session.has_delta());

        session.touch(at(1_005));
        assert_eq!(session.last_accessed_time(), at(1_005));
        assert!(session.has_delta());

        assert!(session.set_last_accessed_time(at(999)).is_err());
    }

    #[test]
    fn principal_attribute_is_denormalized() {
        let mut session = record();
        session
            .set_attribute(PRINCIPAL_NAME_ATTRIBUTE, json!("alice"))
            .expect("set principal");
        assert_eq!(session.principal_name(), Some("alice"));

        session.set_principal_name(None).expect("clear principal");
        assert_eq!(session.principal_name(), None);
        assert!(session.get_attribute(PRINCIPAL_NAME_ATTRIBUTE).is_none());
    }

    #[test]
    fn idle_expiry_honours_negative_interval() {
        let mut session = record();
        session.set_max_inactive_interval(Duration::seconds(30));
        assert!(!session.is_expired(at(1_029)));
        assert!(session.is_expired(at(1_030)));

        session.set_max_inactive_interval(Duration::seconds(-1));
        assert!(!session.is_expired(at(1_000_000)));

        session.set_max_inactive_interval(Duration::seconds(i64::MAX));
        assert_eq!(session.max_inactive_interval(), MAX_EXPIRY_INTERVAL);
        assert!(!session.is_expired(at(1_000_000)));
        assert!(!session.is_expired(time::PrimitiveDateTime::MIN.assume_utc()));
    }

    #[test]
    fn empty_principal_name_is_treated_as_absent() {
        let mut session = record();
        session.set_principal_name(Some("")).expect("set principal");
        assert_eq!(session.principal_name(), None);

        session.set_principal_name(Some("bob")).expect("set principal");
        assert_eq!(session.principal_name(), Some("bob"));
    }

    #[test]
    fn change_session_id_remembers_stored_id() {
        let mut session = record();
        session.commit();
        let original = session.id().clone();
        let rotated = session.change_session_id().clone();
        assert_ne!(original, rotated);
        assert_eq!(session.previous_id(), Some(&original));
        assert!(session.requires_full_write());

        session.commit();
        assert!(session.previous_id().is_none());
    }

    #[test]
    fn empty_session_id_is_rejected() {
        assert!(SessionId::parse("").is_err());
        assert_eq!(SessionId::parse("abc").expect("id").as_str(), "abc");
    }
}
