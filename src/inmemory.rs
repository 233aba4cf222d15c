use crate::clock::{Clock, SystemClock};
use crate::error::{SessionError, SessionResult};
use crate::expiry::{ExpirationAction, ExpiryAttributes, SessionExpiry, StoredValue};
use crate::index::IndexKey;
use crate::model::SessionId;
use crate::serialization::{self, FrameHeader, SessionSerializer};
use crate::store::SessionStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, trace};

const CLEANUP_INTERVAL: Duration = Duration::seconds(60);

/// How long an invalidated key is kept before the sweep drops it.
pub const DEFAULT_TOMBSTONE_RETENTION: Duration = Duration::minutes(30);

struct Entry {
    /// `None` once invalidated; the key is kept until the retention window passes.
    payload: Option<Vec<u8>>,
    index_keys: Vec<IndexKey>,
    expiry: Option<(OffsetDateTime, ExpirationAction)>,
    invalidated_at: Option<OffsetDateTime>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.payload.is_some()
    }

    fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.expiry {
            Some((deadline, _)) => now >= deadline,
            None => false,
        }
    }

    fn expire(&mut self, now: OffsetDateTime) -> ExpirationAction {
        let action = self
            .expiry
            .map(|(_, action)| action)
            .unwrap_or_default();
        self.payload = None;
        self.index_keys.clear();
        self.expiry = None;
        self.invalidated_at.get_or_insert(now);
        action
    }

    fn tombstone_due(&self, now: OffsetDateTime, retention: Duration) -> bool {
        self.invalidated_at
            .is_some_and(|invalidated_at| now - invalidated_at >= retention)
    }
}

/// In-memory implementation backed by a concurrent hash map.
///
/// Expiry is computed by the optional [`SessionExpiry`] hook on every write, falling
/// back to the default idle timeout when the hook has no opinion. Expired entries
/// are dealt with lazily on access and by a sweep at most once a minute. The same
/// sweep drops invalidated keys once they are older than the tombstone retention.
pub struct InMemorySessionStore {
    entries: DashMap<SessionId, Entry>,
    serializer: Arc<dyn SessionSerializer>,
    expiry: Option<SessionExpiry>,
    default_expiry: Option<ExpiryAttributes>,
    clock: Arc<dyn Clock>,
    cleanup_hint: Mutex<OffsetDateTime>,
    tombstone_retention: Duration,
}

impl InMemorySessionStore {
    /// Constructs a store with no background maintenance.
    pub fn new(serializer: Arc<dyn SessionSerializer>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();
        Self {
            entries: DashMap::new(),
            serializer,
            expiry: None,
            default_expiry: None,
            clock,
            cleanup_hint: Mutex::new(now),
            tombstone_retention: DEFAULT_TOMBSTONE_RETENTION,
        }
    }

    pub fn with_expiry(mut self, expiry: SessionExpiry) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Expiry used when no hook is set or the hook has no opinion.
    pub fn with_default_expiry(mut self, default: ExpiryAttributes) -> Self {
        self.default_expiry = Some(default);
        self
    }

    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = retention.max(Duration::ZERO);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        *self.cleanup_hint.get_mut() = clock.now();
        self.clock = clock;
        self
    }

    /// Number of live (not invalidated, not expired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|entry| entry.is_live() && !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of invalidated keys still held.
    pub fn tombstone_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_live()).count()
    }

    /// True when `id` is kept as an invalidated key.
    pub fn is_invalidated(&self, id: &SessionId) -> bool {
        self.entries
            .get(id)
            .map(|entry| !entry.is_live())
            .unwrap_or(false)
    }

    fn resolve_expiry(
        &self,
        stored: StoredValue<'_>,
        now: OffsetDateTime,
    ) -> SessionResult<Option<(OffsetDateTime, ExpirationAction)>> {
        let resolved = match &self.expiry {
            Some(hook) => hook.resolve_expiry(stored)?,
            None => None,
        };
        Ok(resolved
            .or(self.default_expiry)
            .map(|attributes| (now + attributes.ttl(), attributes.action)))
    }

    /// Applies the expiration action to an expired entry. Returns true if it was live.
    fn expire_entry(&self, id: &SessionId, now: OffsetDateTime) -> bool {
        let mut destroy = false;
        let mut was_live = false;
        if let Some(mut entry) = self.entries.get_mut(id) {
            was_live = entry.is_live();
            let action = entry.expire(now);
            debug!(session_id = %id, ?action, "session entry expired");
            destroy = action == ExpirationAction::Destroy;
        }
        if destroy {
            self.entries.remove(id);
        }
        was_live
    }

    fn maybe_cleanup(&self, now: OffsetDateTime) {
        let mut guard = self.cleanup_hint.lock();
        if now - *guard < CLEANUP_INTERVAL {
            return;
        }

        let stale_keys: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| {
                if entry.value().is_live() && entry.value().is_expired(now) {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();

        for key in stale_keys {
            self.expire_entry(&key, now);
        }

        let retention = self.tombstone_retention;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.tombstone_due(now, retention));
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            debug!(dropped, "dropped invalidated session keys");
        }

        *guard = now;
    }

    /// Returns the live payload for `id`, expiring the entry first if it is due.
    fn live_payload(&self, id: &SessionId, now: OffsetDateTime) -> Option<Vec<u8>> {
        let expired = match self.entries.get(id) {
            Some(entry) if entry.is_expired(now) && entry.is_live() => true,
            Some(entry) => return entry.payload.clone(),
            None => return None,
        };
        if expired {
            self.expire_entry(id, now);
        }
        None
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &SessionId) -> SessionResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        self.maybe_cleanup(now);
        Ok(self.live_payload(id, now))
    }

    fn put(
        &self,
        id: &SessionId,
        payload: Vec<u8>,
        index_keys: Vec<IndexKey>,
    ) -> SessionResult<()> {
        let now = self.clock.now();
        self.maybe_cleanup(now);
        if FrameHeader::read(&payload)?.is_delta() {
            return Err(SessionError::serialization(
                "put expects a full payload; use put_delta for deltas",
            ));
        }
        let expiry = self.resolve_expiry(StoredValue::Portable(&payload), now)?;
        trace!(session_id = %id, bytes = payload.len(), "storing full session payload");
        self.entries.insert(
            id.clone(),
            Entry {
                payload: Some(payload),
                index_keys,
                expiry,
                invalidated_at: None,
            },
        );
        Ok(())
    }

    fn put_delta(
        &self,
        id: &SessionId,
        delta: Vec<u8>,
        index_keys: Vec<IndexKey>,
    ) -> SessionResult<bool> {
        let now = self.clock.now();
        self.maybe_cleanup(now);
        let Some(base_payload) = self.live_payload(id, now) else {
            debug!(session_id = %id, "no stored base for session delta");
            return Ok(false);
        };

        let mut base = serialization::decode(self.serializer.as_ref(), &base_payload)?;
        if !self.serializer.apply_delta(&mut base, &delta)? {
            return Err(SessionError::serialization(format!(
                "session {id}: delta payload not understood by the configured serializer"
            )));
        }
        let expiry = self.resolve_expiry(StoredValue::Session(&base), now)?;
        let merged = serialization::encode_full(self.serializer.as_ref(), &mut base)?;
        trace!(session_id = %id, delta_bytes = delta.len(), "merged session delta");

        match self.entries.get_mut(id) {
            Some(mut entry) if entry.is_live() => {
                entry.payload = Some(merged);
                entry.index_keys = index_keys;
                entry.expiry = expiry;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove(&self, id: &SessionId) -> SessionResult<bool> {
        Ok(self
            .entries
            .remove(id)
            .map(|(_, entry)| entry.is_live())
            .unwrap_or(false))
    }

    fn find_by_index(&self, key: &IndexKey) -> SessionResult<Vec<SessionId>> {
        let now = self.clock.now();
        self.maybe_cleanup(now);
        let mut ids: Vec<SessionId> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.is_live() && !entry.is_expired(now) && entry.index_keys.contains(key)
            })
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
