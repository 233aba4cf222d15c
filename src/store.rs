use crate::error::SessionResult;
use crate::index::IndexKey;
use crate::model::SessionId;
use std::sync::Arc;

/// Backing key/value store holding encoded session payloads.
///
/// Payloads are opaque to the store except for their
/// [`FrameHeader`](crate::serialization::FrameHeader): full frames replace the entry,
/// delta frames are merged onto the stored record. Expiry is the store's business,
/// usually driven by a [`SessionExpiry`](crate::expiry::SessionExpiry) hook.
pub trait SessionStore: Send + Sync + 'static {
    /// Fetches the full payload stored under `id`, if it exists and has not expired.
    fn get(&self, id: &SessionId) -> SessionResult<Option<Vec<u8>>>;

    /// Stores a full payload, replacing any previous entry and its index keys.
    fn put(&self, id: &SessionId, payload: Vec<u8>, index_keys: Vec<IndexKey>)
        -> SessionResult<()>;

    /// Merges a delta payload onto the stored entry.
    ///
    /// Returns `Ok(false)` when there is no live entry to merge onto; the caller is
    /// expected to fall back to [`put`](Self::put) with a full payload.
    fn put_delta(
        &self,
        id: &SessionId,
        delta: Vec<u8>,
        index_keys: Vec<IndexKey>,
    ) -> SessionResult<bool>;

    /// Removes the entry and its index keys. Returns whether a live entry existed.
    fn remove(&self, id: &SessionId) -> SessionResult<bool>;

    /// Ids of live entries registered under `key`.
    fn find_by_index(&self, key: &IndexKey) -> SessionResult<Vec<SessionId>>;
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn get(&self, id: &SessionId) -> SessionResult<Option<Vec<u8>>> {
        (**self).get(id)
    }

    fn put(&self, id: &SessionId, payload: Vec<u8>, index_keys: Vec<IndexKey>)
        -> SessionResult<()> {
        (**self).put(id, payload, index_keys)
    }

    fn put_delta(
        &self,
        id: &SessionId,
        delta: Vec<u8>,
        index_keys: Vec<IndexKey>,
    ) -> SessionResult<bool> {
        (**self).put_delta(id, delta, index_keys)
    }

    fn remove(&self, id: &SessionId) -> SessionResult<bool> {
        (**self).remove(id)
    }

    fn find_by_index(&self, key: &IndexKey) -> SessionResult<Vec<SessionId>> {
        (**self).find_by_index(key)
    }
}
