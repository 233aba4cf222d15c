use crate::error::{redis_error, SessionError, SessionResult};
use crate::expiry::{ExpiryAttributes, SessionExpiry, StoredValue};
use crate::index::IndexKey;
use crate::model::SessionId;
use crate::serialization::{self, FrameHeader, SessionSerializer};
use crate::store::SessionStore;
use redis::{Client, Commands, Connection};
use std::sync::Arc;
use tracing::{debug, trace};

const DEFAULT_NAMESPACE: &str = "gridsession";

/// Redis-backed session store that mirrors the in-memory semantics.
///
/// Payloads live under `{namespace}:session:{id}` with a `PEXPIRE` computed by the
/// [`SessionExpiry`] hook. Redis has no notion of a value-less key, so both
/// expiration actions end in the key being removed.
///
/// Constructors accept connection URLs only; no Redis client types appear in the
/// public API.
pub struct RedisSessionStore {
    client: Client,
    namespace: String,
    serializer: Arc<dyn SessionSerializer>,
    expiry: Option<SessionExpiry>,
    default_expiry: Option<ExpiryAttributes>,
}

impl RedisSessionStore {
    /// Creates a store using a Redis URL and the default namespace prefix.
    pub fn from_url(
        url: impl AsRef<str>,
        serializer: Arc<dyn SessionSerializer>,
    ) -> SessionResult<Self> {
        Self::from_url_with_namespace(url, DEFAULT_NAMESPACE, serializer)
    }

    /// Creates a store using a Redis URL and a custom namespace prefix.
    pub fn from_url_with_namespace(
        url: impl AsRef<str>,
        namespace: impl Into<String>,
        serializer: Arc<dyn SessionSerializer>,
    ) -> SessionResult<Self> {
        let client = Client::open(url.as_ref()).map_err(redis_error)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            serializer,
            expiry: None,
            default_expiry: None,
        })
    }

    pub fn with_expiry(mut self, expiry: SessionExpiry) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// TTL applied when no hook is set or the hook has no opinion.
    pub fn with_default_expiry(mut self, default: ExpiryAttributes) -> Self {
        self.default_expiry = Some(default);
        self
    }

    fn conn(&self) -> SessionResult<Connection> {
        self.client.get_connection().map_err(redis_error)
    }

    fn session_entry_key(&self, id: &SessionId) -> String {
        format!("{}:session:{}", self.namespace, id.as_str())
    }

    fn index_set_key(&self, key: &IndexKey) -> String {
        format!("{}:index:{}", self.namespace, key.as_str())
    }

    fn session_indexes_key(&self, id: &SessionId) -> String {
        format!("{}:indexes:{}", self.namespace, id.as_str())
    }

    fn resolve_expiry(&self, stored: StoredValue<'_>) -> SessionResult<Option<ExpiryAttributes>> {
        let resolved = match &self.expiry {
            Some(hook) => hook.resolve_expiry(stored)?,
            None => None,
        };
        Ok(resolved.or(self.default_expiry))
    }

    fn apply_ttl(
        conn: &mut Connection,
        key: &str,
        expiry: Option<ExpiryAttributes>,
    ) -> SessionResult<()> {
        if let Some(expiry) = expiry {
            let ttl_ms = i64::from(expiry.ttl_seconds) * 1_000;
            conn.pexpire::<_, ()>(key, ttl_ms).map_err(redis_error)?;
        }
        Ok(())
    }

    fn clear_indexes(&self, conn: &mut Connection, id: &SessionId) -> SessionResult<()> {
        let indexes_key = self.session_indexes_key(id);
        let previous: Vec<String> = conn.smembers(&indexes_key).map_err(redis_error)?;
        for raw in previous {
            conn.srem::<_, _, ()>(format!("{}:index:{}", self.namespace, raw), id.as_str())
                .map_err(redis_error)?;
        }
        let _: () = conn.del(&indexes_key).map_err(redis_error)?;
        Ok(())
    }

    fn write_entry(
        &self,
        conn: &mut Connection,
        id: &SessionId,
        payload: Vec<u8>,
        index_keys: &[IndexKey],
        expiry: Option<ExpiryAttributes>,
    ) -> SessionResult<()> {
        let entry_key = self.session_entry_key(id);
        conn.set::<_, _, ()>(&entry_key, payload)
            .map_err(redis_error)?;
        Self::apply_ttl(conn, &entry_key, expiry)?;

        self.clear_indexes(conn, id)?;
        if index_keys.is_empty() {
            return Ok(());
        }
        let indexes_key = self.session_indexes_key(id);
        for key in index_keys {
            conn.sadd::<_, _, ()>(self.index_set_key(key), id.as_str())
                .map_err(redis_error)?;
            conn.sadd::<_, _, ()>(&indexes_key, key.as_str())
                .map_err(redis_error)?;
        }
        Self::apply_ttl(conn, &indexes_key, expiry)
    }
}

impl SessionStore for RedisSessionStore {
    fn get(&self, id: &SessionId) -> SessionResult<Option<Vec<u8>>> {
        let mut conn = self.conn()?;
        conn.get(self.session_entry_key(id)).map_err(redis_error)
    }

    fn put(
        &self,
        id: &SessionId,
        payload: Vec<u8>,
        index_keys: Vec<IndexKey>,
    ) -> SessionResult<()> {
        if FrameHeader::read(&payload)?.is_delta() {
            return Err(SessionError::serialization(
                "put expects a full payload; use put_delta for deltas",
            ));
        }
        let expiry = self.resolve_expiry(StoredValue::Portable(&payload))?;
        trace!(
            session_id = %id,
            bytes = payload.len(),
            ttl_secs = expiry.map(|e| e.ttl_seconds),
            "storing session in redis"
        );
        let mut conn = self.conn()?;
        self.write_entry(&mut conn, id, payload, &index_keys, expiry)
    }

    fn put_delta(
        &self,
        id: &SessionId,
        delta: Vec<u8>,
        index_keys: Vec<IndexKey>,
    ) -> SessionResult<bool> {
        let mut conn = self.conn()?;
        let stored: Option<Vec<u8>> = conn.get(self.session_entry_key(id)).map_err(redis_error)?;
        let Some(base_payload) = stored else {
            debug!(session_id = %id, "no stored base for session delta");
            return Ok(false);
        };

        let mut base = serialization::decode(self.serializer.as_ref(), &base_payload)?;
        if !self.serializer.apply_delta(&mut base, &delta)? {
            return Err(SessionError::serialization(format!(
                "session {id}: delta payload not understood by the configured serializer"
            )));
        }
        let expiry = self.resolve_expiry(StoredValue::Session(&base))?;
        let merged = serialization::encode_full(self.serializer.as_ref(), &mut base)?;
        self.write_entry(&mut conn, id, merged, &index_keys, expiry)?;
        Ok(true)
    }

    fn remove(&self, id: &SessionId) -> SessionResult<bool> {
        let mut conn = self.conn()?;
        let removed: i64 = conn.del(self.session_entry_key(id)).map_err(redis_error)?;
        self.clear_indexes(&mut conn, id)?;
        Ok(removed > 0)
    }

    fn find_by_index(&self, key: &IndexKey) -> SessionResult<Vec<SessionId>> {
        let mut conn = self.conn()?;
        let set_key = self.index_set_key(key);
        let members: Vec<String> = conn.smembers(&set_key).map_err(redis_error)?;
        let mut ids = Vec::with_capacity(members.len());
        for raw in members {
            let id = SessionId::parse(raw.clone())?;
            let live: bool = conn.exists(self.session_entry_key(&id)).map_err(redis_error)?;
            if live {
                ids.push(id);
            } else {
                conn.srem::<_, _, ()>(&set_key, raw).map_err(redis_error)?;
            }
        }
        ids.sort();
        Ok(ids)
    }
}
