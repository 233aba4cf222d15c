//! Session repositories: the save/find/delete surface a web layer drives.
//!
//! [`GridSessionRepository`] turns [`SessionRecord`]s into payloads for a
//! [`SessionStore`], choosing delta or full writes and maintaining index keys.
//! [`FixedDurationExpirationSessionRepository`] wraps any repository and hides
//! sessions older than a fixed lifetime, deleting them on the read that notices.

use crate::attributes::{DirtyPredicate, IdentityDirtyPredicate};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{invalid_argument, SessionResult};
use crate::index::{attribute_index_key, index_keys, principal_index_key, IndexKey};
use crate::model::{
    expiry_interval_in_range, RecordKind, SessionId, SessionRecord, SharedSession,
    DEFAULT_MAX_INACTIVE_INTERVAL, MAX_EXPIRY_INTERVAL, PRINCIPAL_NAME_ATTRIBUTE,
};
use crate::serialization::{self, FrameHeader, SessionSerializer};
use crate::store::SessionStore;
use serde_json::Value;
use std::sync::Arc;
use time::Duration;
use tracing::{debug, trace};

pub trait SessionRepository: Send + Sync {
    /// A new, unsaved session.
    fn create_session(&self) -> SessionRecord;

    /// Persists the session and commits its change tracking.
    fn save(&self, session: &mut SessionRecord) -> SessionResult<()>;

    /// Loads a live session; expired or missing sessions are `Ok(None)`.
    fn find_by_id(&self, id: &SessionId) -> SessionResult<Option<SessionRecord>>;

    fn delete_by_id(&self, id: &SessionId) -> SessionResult<()>;
}

/// Repository over a key/value [`SessionStore`].
#[derive(Debug)]
pub struct GridSessionRepository<S> {
    store: S,
    serializer: Arc<dyn SessionSerializer>,
    clock: Arc<dyn Clock>,
    max_inactive_interval: Duration,
    indexable_attributes: Vec<String>,
    dirty_predicate: Arc<dyn DirtyPredicate>,
    record_kind: RecordKind,
}

impl<S: SessionStore> GridSessionRepository<S> {
    /// New sessions are delta-capable whenever `serializer` can write deltas.
    pub fn new(store: S, serializer: Arc<dyn SessionSerializer>) -> Self {
        let record_kind = if serializer.can_serialize(RecordKind::DeltaCapableSession) {
            RecordKind::DeltaCapableSession
        } else {
            RecordKind::Session
        };
        Self {
            store,
            serializer,
            clock: Arc::new(SystemClock),
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL,
            indexable_attributes: Vec::new(),
            dirty_predicate: Arc::new(IdentityDirtyPredicate),
            record_kind,
        }
    }

    /// Builds the serializer and defaults from `config` after validating it.
    pub fn from_config(store: S, config: &SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        Ok(Self::new(store, config.build_serializer()?)
            .with_max_inactive_interval(config.max_inactive_interval())
            .with_indexable_attributes(config.indexable_session_attributes.clone()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_interval = interval;
        self
    }

    /// Attribute names whose values are queryable via
    /// [`find_by_indexed_attribute`](Self::find_by_indexed_attribute).
    pub fn with_indexable_attributes<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.indexable_attributes = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dirty_predicate(mut self, predicate: Arc<dyn DirtyPredicate>) -> Self {
        self.dirty_predicate = predicate;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn serializer(&self) -> &Arc<dyn SessionSerializer> {
        &self.serializer
    }

    pub fn record_kind(&self) -> RecordKind {
        self.record_kind
    }

    /// Saves a session shared between threads, holding its lock across the write.
    pub fn save_shared(&self, session: &SharedSession) -> SessionResult<()> {
        let mut guard = session.lock();
        self.save(&mut guard)
    }

    /// Removes the session from the store and marks the record unusable.
    pub fn invalidate(&self, session: &mut SessionRecord) -> SessionResult<()> {
        self.delete_by_id(session.id())?;
        session.mark_deleted();
        Ok(())
    }

    /// Live sessions owned by `principal`.
    pub fn find_by_principal_name(&self, principal: &str) -> SessionResult<Vec<SessionRecord>> {
        self.find_by_index_key(&principal_index_key(principal))
    }

    /// Live sessions whose indexable attribute `name` currently equals `value`.
    pub fn find_by_indexed_attribute(
        &self,
        name: &str,
        value: &Value,
    ) -> SessionResult<Vec<SessionRecord>> {
        if name != PRINCIPAL_NAME_ATTRIBUTE && !self.indexable_attributes.iter().any(|n| n == name)
        {
            return Err(invalid_argument(format!(
                "attribute {name} is not configured as indexable"
            )));
        }
        self.find_by_index_key(&attribute_index_key(name, value))
    }

    fn find_by_index_key(&self, key: &IndexKey) -> SessionResult<Vec<SessionRecord>> {
        let mut sessions = Vec::new();
        for id in self.store.find_by_index(key)? {
            if let Some(session) = self.load(&id, false)? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    fn load(&self, id: &SessionId, touch: bool) -> SessionResult<Option<SessionRecord>> {
        let Some(payload) = self.store.get(id)? else {
            return Ok(None);
        };
        let session = serialization::decode(self.serializer.as_ref(), &payload)?;
        let mut session = session.with_dirty_predicate(Arc::clone(&self.dirty_predicate));

        let now = self.clock.now();
        if session.is_expired(now) {
            debug!(session_id = %id, "session idle past its max inactive interval");
            self.store.remove(id)?;
            return Ok(None);
        }
        if touch {
            session.touch(now);
        }
        Ok(Some(session))
    }
}

impl<S: SessionStore> SessionRepository for GridSessionRepository<S> {
    fn create_session(&self) -> SessionRecord {
        SessionRecord::create(SessionId::new(), self.clock.now(), self.record_kind)
            .with_max_inactive_interval(self.max_inactive_interval)
            .with_dirty_predicate(Arc::clone(&self.dirty_predicate))
    }

    fn save(&self, session: &mut SessionRecord) -> SessionResult<()> {
        if session.state().is_terminal() {
            return Err(invalid_argument(format!(
                "session {} can no longer be saved ({:?})",
                session.id(),
                session.state()
            )));
        }
        if !session.is_new() && session.is_expired(self.clock.now()) {
            debug!(session_id = %session.id(), "dropping idle-expired session instead of saving");
            session.mark_expired();
            self.store.remove(session.id())?;
            return Ok(());
        }
        if !session.has_delta() && !session.requires_full_write() {
            trace!(session_id = %session.id(), "session unchanged; skipping save");
            return Ok(());
        }
        if let Some(previous) = session.previous_id().cloned() {
            debug!(session_id = %session.id(), previous_id = %previous, "session id changed");
            self.store.remove(&previous)?;
        }

        let keys = index_keys(session, &self.indexable_attributes);
        let payload = serialization::encode(self.serializer.as_ref(), session)?;
        if !FrameHeader::read(&payload)?.is_delta() {
            return self.store.put(session.id(), payload, keys);
        }

        if self.store.put_delta(session.id(), payload, keys.clone())? {
            return Ok(());
        }
        debug!(session_id = %session.id(), "stored base missing; resending full session");
        let payload = serialization::encode_full(self.serializer.as_ref(), session)?;
        self.store.put(session.id(), payload, keys)
    }

    fn find_by_id(&self, id: &SessionId) -> SessionResult<Option<SessionRecord>> {
        self.load(id, true)
    }

    fn delete_by_id(&self, id: &SessionId) -> SessionResult<()> {
        let removed = self.store.remove(id)?;
        trace!(session_id = %id, removed, "session deleted");
        Ok(())
    }
}

/// Hides and deletes sessions that outlived a fixed lifetime since creation.
///
/// The check happens on read, before the session reaches the caller, so it applies
/// even when the backing store has not yet expired the entry itself.
#[derive(Debug)]
pub struct FixedDurationExpirationSessionRepository<R> {
    delegate: R,
    expiration: Duration,
    clock: Arc<dyn Clock>,
}

impl<R: SessionRepository> FixedDurationExpirationSessionRepository<R> {
    pub fn new(delegate: R, expiration: Duration) -> SessionResult<Self> {
        if expiration <= Duration::ZERO || !expiry_interval_in_range(expiration) {
            return Err(invalid_argument(format!(
                "fixed session lifetime must be positive and at most {MAX_EXPIRY_INTERVAL}, \
                 got {expiration}"
            )));
        }
        Ok(Self {
            delegate,
            expiration,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    pub fn delegate(&self) -> &R {
        &self.delegate
    }
}

impl<R: SessionRepository> SessionRepository for FixedDurationExpirationSessionRepository<R> {
    fn create_session(&self) -> SessionRecord {
        self.delegate.create_session()
    }

    fn save(&self, session: &mut SessionRecord) -> SessionResult<()> {
        self.delegate.save(session)
    }

    fn find_by_id(&self, id: &SessionId) -> SessionResult<Option<SessionRecord>> {
        let Some(session) = self.delegate.find_by_id(id)? else {
            return Ok(None);
        };
        let Some(deadline) = session.creation_time().checked_add(self.expiration) else {
            return Ok(Some(session));
        };
        if self.clock.now() > deadline {
            debug!(session_id = %id, %deadline, "session past its fixed lifetime");
            self.delegate.delete_by_id(id)?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    fn delete_by_id(&self, id: &SessionId) -> SessionResult<()> {
        self.delegate.delete_by_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::inmemory::InMemorySessionStore;
    use crate::model::SessionState;
    use crate::serialization::{DataSerializer, SchemaSerializer};
    use serde_json::json;
    use time::OffsetDateTime;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            OffsetDateTime::UNIX_EPOCH + Duration::days(19_000),
        ))
    }

    fn repository(
        serializer: Arc<dyn SessionSerializer>,
        clock: Arc<ManualClock>,
    ) -> GridSessionRepository<InMemorySessionStore> {
        let store = InMemorySessionStore::new(Arc::clone(&serializer)).with_clock(clock.clone());
        GridSessionRepository::new(store, serializer).with_clock(clock)
    }

    #[test]
    fn record_kind_follows_serializer() {
        let clock = clock();
        let data = repository(Arc::new(DataSerializer::new()), clock.clone());
        assert_eq!(data.create_session().kind(), RecordKind::DeltaCapableSession);
        let schema = repository(Arc::new(SchemaSerializer::new()), clock);
        assert_eq!(schema.create_session().kind(), RecordKind::Session);
    }

    #[test]
    fn find_touches_and_idle_expiry_hides() {
        let clock = clock();
        let repo = repository(Arc::new(DataSerializer::new()), clock.clone())
            .with_max_inactive_interval(Duration::seconds(30));
        let mut session = repo.create_session();
        repo.save(&mut session).expect("save");

        clock.advance(Duration::seconds(20));
        let mut found = repo
            .find_by_id(session.id())
            .expect("find")
            .expect("present");
        assert_eq!(found.last_accessed_time(), clock.now());
        repo.save(&mut found).expect("save touch");

        clock.advance(Duration::seconds(29));
        assert!(repo.find_by_id(session.id()).expect("find").is_some());

        clock.advance(Duration::seconds(31));
        assert!(repo.find_by_id(session.id()).expect("find").is_none());
    }

    #[test]
    fn rotated_id_moves_the_entry() {
        let clock = clock();
        let repo = repository(Arc::new(DataSerializer::new()), clock);
        let mut session = repo.create_session();
        session.set_attribute("cart", json!([1, 2])).expect("set");
        repo.save(&mut session).expect("save");
        let old = session.id().clone();

        session.change_session_id();
        repo.save(&mut session).expect("save rotated");

        assert!(repo.find_by_id(&old).expect("find old").is_none());
        let moved = repo
            .find_by_id(session.id())
            .expect("find new")
            .expect("present");
        assert_eq!(moved.get_attribute("cart").map(|v| v.as_ref()), Some(&json!([1, 2])));
    }

    #[test]
    fn invalidated_session_cannot_be_saved() {
        let clock = clock();
        let repo = repository(Arc::new(DataSerializer::new()), clock);
        let mut session = repo.create_session();
        repo.save(&mut session).expect("save");
        repo.invalidate(&mut session).expect("invalidate");
        assert_eq!(session.state(), SessionState::Deleted);
        assert!(repo.save(&mut session).is_err());
        assert!(repo.find_by_id(session.id()).expect("find").is_none());
    }

    #[test]
    fn fixed_duration_wrapper_rejects_non_positive_lifetime() {
        let repo = repository(Arc::new(DataSerializer::new()), clock());
        assert!(FixedDurationExpirationSessionRepository::new(repo, Duration::ZERO).is_err());
        let repo = repository(Arc::new(DataSerializer::new()), clock());
        assert!(
            FixedDurationExpirationSessionRepository::new(repo, Duration::seconds(i64::MAX))
                .is_err()
        );
    }

    #[test]
    fn longest_lifetimes_do_not_overflow_on_find() {
        let clock = clock();
        let grid = repository(Arc::new(DataSerializer::new()), clock.clone())
            .with_max_inactive_interval(Duration::seconds(i64::MAX));
        let repo = FixedDurationExpirationSessionRepository::new(grid, MAX_EXPIRY_INTERVAL)
            .expect("wrapper")
            .with_clock(clock.clone());
        let mut session = repo.create_session();
        repo.save(&mut session).expect("save");

        clock.advance(Duration::days(365));
        assert!(repo.find_by_id(session.id()).expect("find").is_some());
    }
}
