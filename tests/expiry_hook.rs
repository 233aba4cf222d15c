use gridsession::clock::ManualClock;
use gridsession::expiry::{
    CompositePolicy, ExpirationAction, ExpirationPolicy, ExpiryAttributes, FixedDurationPolicy,
    IdleTimeoutPolicy, SessionExpiry, StoredValue,
};
use gridsession::inmemory::InMemorySessionStore;
use gridsession::repository::{GridSessionRepository, SessionRepository};
use gridsession::serialization::{self, SchemaSerializer, SessionSerializer};
use gridsession::store::SessionStore;
use gridsession::{RecordKind, SessionId, SessionRecord};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

fn t0() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::days(19_800)
}

#[test]
fn default_action_is_invalidate_for_every_builtin_policy() {
    let idle = IdleTimeoutPolicy::new(Some(Duration::seconds(5))).expect("idle");
    let fixed = FixedDurationPolicy::new(Duration::seconds(5)).expect("fixed");
    let composite = CompositePolicy::new(vec![Arc::new(idle) as Arc<dyn ExpirationPolicy>]);
    assert_eq!(idle.expiration_action(), ExpirationAction::Invalidate);
    assert_eq!(fixed.expiration_action(), ExpirationAction::Invalidate);
    assert_eq!(composite.expiration_action(), ExpirationAction::Invalidate);
}

#[test]
fn destroy_action_reaches_the_store_callback_unchanged() {
    let clock = Arc::new(ManualClock::new(t0()));
    let policy = IdleTimeoutPolicy::new(Some(Duration::seconds(90)))
        .expect("idle")
        .with_action(ExpirationAction::Destroy);
    let hook = SessionExpiry::new(Arc::new(policy)).with_clock(clock.clone());

    let session = SessionRecord::create(SessionId::new(), t0(), RecordKind::Session);
    clock.advance(Duration::seconds(30));
    let attributes = hook
        .resolve_expiry(StoredValue::Session(&session))
        .expect("resolve")
        .expect("policy has an opinion");
    assert_eq!(
        attributes,
        ExpiryAttributes {
            ttl_seconds: 60,
            action: ExpirationAction::Destroy,
        }
    );
}

#[test]
fn portable_values_are_unwrapped_before_evaluation() {
    let clock = Arc::new(ManualClock::new(t0()));
    let serializer: Arc<dyn SessionSerializer> = Arc::new(SchemaSerializer::new());
    let hook = SessionExpiry::new(Arc::new(
        FixedDurationPolicy::new(Duration::seconds(120)).expect("fixed"),
    ))
    .with_serializer(Arc::clone(&serializer))
    .with_clock(clock.clone());

    let mut session = SessionRecord::create(SessionId::new(), t0(), RecordKind::Session)
        .with_max_inactive_interval(Duration::seconds(-1));
    let payload = serialization::encode(serializer.as_ref(), &mut session).expect("encode");

    clock.advance(Duration::seconds(20));
    let attributes = hook
        .resolve_expiry(StoredValue::Portable(&payload))
        .expect("resolve")
        .expect("fixed policy opinion");
    assert_eq!(attributes.ttl_seconds, 100);
    assert_eq!(attributes.action, ExpirationAction::Invalidate);
}

#[test]
fn no_opinion_and_missing_codec_defer_to_store_defaults() {
    let silent = SessionExpiry::new(Arc::new(IdleTimeoutPolicy::new(None).expect("silent")));
    let session = SessionRecord::create(SessionId::new(), t0(), RecordKind::Session);
    assert!(silent
        .resolve_expiry(StoredValue::Session(&session))
        .expect("resolve")
        .is_none());

    let no_codec = SessionExpiry::new(Arc::new(
        IdleTimeoutPolicy::new(Some(Duration::seconds(1))).expect("idle"),
    ));
    assert!(no_codec
        .resolve_expiry(StoredValue::Portable(&[0u8, 1, 2, 3, 4]))
        .expect("resolve")
        .is_none());
}

#[test]
fn already_due_sessions_get_the_minimum_ttl() {
    let clock = Arc::new(ManualClock::new(t0() + Duration::hours(1)));
    let hook = SessionExpiry::new(Arc::new(
        IdleTimeoutPolicy::new(Some(Duration::seconds(10))).expect("idle"),
    ))
    .with_clock(clock);
    let session = SessionRecord::create(SessionId::new(), t0(), RecordKind::Session);
    let attributes = hook
        .resolve_expiry(StoredValue::Session(&session))
        .expect("resolve")
        .expect("opinion");
    assert_eq!(attributes.ttl_seconds, 1);
}

fn repository_with_action(
    action: ExpirationAction,
    clock: &Arc<ManualClock>,
) -> GridSessionRepository<Arc<InMemorySessionStore>> {
    let serializer: Arc<dyn SessionSerializer> = Arc::new(SchemaSerializer::new());
    let policy = IdleTimeoutPolicy::new(Some(Duration::seconds(10)))
        .expect("idle")
        .with_action(action);
    let hook = SessionExpiry::new(Arc::new(policy))
        .with_serializer(Arc::clone(&serializer))
        .with_clock(clock.clone());
    let store = Arc::new(
        InMemorySessionStore::new(Arc::clone(&serializer))
            .with_expiry(hook)
            .with_clock(clock.clone()),
    );
    GridSessionRepository::new(store, serializer).with_clock(clock.clone())
}

#[test]
fn store_invalidates_or_destroys_per_policy_action() {
    for action in [ExpirationAction::Invalidate, ExpirationAction::Destroy] {
        let clock = Arc::new(ManualClock::new(t0()));
        let repo = repository_with_action(action, &clock);
        let mut session = repo.create_session();
        repo.save(&mut session).expect("save");

        clock.advance(Duration::seconds(11));
        assert!(repo.find_by_id(session.id()).expect("find").is_none());
        let store = repo.store();
        assert_eq!(
            store.is_invalidated(session.id()),
            action == ExpirationAction::Invalidate,
            "{action:?}"
        );
        assert!(store.get(session.id()).expect("get").is_none());
    }
}

#[test]
fn saving_refreshes_the_store_ttl() {
    let clock = Arc::new(ManualClock::new(t0()));
    let repo = repository_with_action(ExpirationAction::Destroy, &clock);
    let mut session = repo.create_session();
    repo.save(&mut session).expect("save");

    for _ in 0..5 {
        clock.advance(Duration::seconds(8));
        let mut found = repo
            .find_by_id(session.id())
            .expect("find")
            .expect("kept alive by access");
        repo.save(&mut found).expect("save touched session");
    }
}
