use gridsession::inmemory::InMemorySessionStore;
use gridsession::repository::{
    FixedDurationExpirationSessionRepository, GridSessionRepository, SessionRepository,
};
use gridsession::serialization::{self, DataSerializer, SessionSerializer};
use gridsession::{ErrorCode, SessionConfig, SessionId, SessionStore};
use serde_json::json;
use std::sync::Arc;
use time::Duration;

fn repository() -> GridSessionRepository<InMemorySessionStore> {
    let serializer: Arc<dyn SessionSerializer> = Arc::new(DataSerializer::new());
    GridSessionRepository::new(InMemorySessionStore::new(Arc::clone(&serializer)), serializer)
}

/// Stores a truncated copy of a real payload under a fresh id.
fn store_truncated(repo: &GridSessionRepository<InMemorySessionStore>) -> SessionId {
    let mut session = repo.create_session();
    session.set_attribute("cart", json!(["book", "pen"])).expect("set");
    let mut payload = serialization::encode(&DataSerializer, &mut session).expect("encode");
    payload.truncate(payload.len() - 4);
    repo.store()
        .put(session.id(), payload, Vec::new())
        .expect("put corrupt payload");
    session.id().clone()
}

#[test]
fn corrupt_stored_payload_surfaces_as_serialization_error() {
    let repo = repository();
    let id = store_truncated(&repo);

    let err = repo.find_by_id(&id).expect_err("corrupt payload");
    assert!(err.is_serialization(), "{err}");
    assert_eq!(err.code(), ErrorCode::Serialization);
}

#[test]
fn missing_session_is_a_clean_miss() {
    let repo = repository();
    assert!(repo.find_by_id(&SessionId::new()).expect("find").is_none());
}

#[test]
fn fixed_duration_wrapper_propagates_decode_errors() {
    let repo = repository();
    let id = store_truncated(&repo);
    let wrapper =
        FixedDurationExpirationSessionRepository::new(repo, Duration::hours(1)).expect("wrapper");

    let err = wrapper.find_by_id(&id).expect_err("corrupt payload");
    assert!(err.is_serialization(), "{err}");
}

#[test]
fn unbounded_idle_interval_is_rejected_by_config() {
    let config = SessionConfig::default().with_max_inactive_interval_seconds(i64::MAX);
    let err = config.validate().expect_err("out of range");
    assert_eq!(err.code(), ErrorCode::InvalidInput);
}
