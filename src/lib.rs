#![forbid(unsafe_code)]
//! Session state for key/value data grids.
//!
//! A [`SessionRecord`] tracks which attributes changed since it was last written, so
//! a delta-capable [`SessionSerializer`] can ship only those changes. An
//! [`ExpirationPolicy`] decides how long each session may live and is translated into
//! the backing store's own TTL by the [`SessionExpiry`] hook.

pub mod attributes;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod index;
pub mod inmemory;
pub mod model;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod repository;
pub mod serialization;
pub mod store;
mod wire;

pub use attributes::{
    AttributeMap, AttributeValue, DeltaTracker, DirtyPredicate, EqualityDirtyPredicate,
    IdentityDirtyPredicate,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::{ErrorCode, SessionError, SessionResult};
pub use expiry::{
    CompositePolicy, ExpirationAction, ExpirationPolicy, ExpiryAttributes, FixedDurationPolicy,
    IdleTimeoutPolicy, SessionExpiry,
};
pub use inmemory::InMemorySessionStore;
pub use model::{RecordKind, SessionId, SessionRecord, SessionState, SharedSession};
pub use repository::{
    FixedDurationExpirationSessionRepository, GridSessionRepository, SessionRepository,
};
pub use serialization::{
    ComposableSerializer, DataSerializer, SchemaSerializer, SessionSerializer,
};
pub use store::SessionStore;
