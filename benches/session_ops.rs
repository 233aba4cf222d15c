use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use gridsession::inmemory::InMemorySessionStore;
use gridsession::model::{RecordKind, SessionId, SessionRecord};
use gridsession::repository::{GridSessionRepository, SessionRepository};
use gridsession::serialization::{self, DataSerializer, SchemaSerializer, SessionSerializer};
use serde_json::json;
use time::OffsetDateTime;

fn bench_session(kind: RecordKind) -> SessionRecord {
    let mut session = SessionRecord::create(SessionId::new(), OffsetDateTime::now_utc(), kind);
    session
        .set_principal_name(Some("bench-user"))
        .expect("principal");
    for i in 0..16 {
        session
            .set_attribute(&format!("attr-{i}"), json!({"index": i, "label": "bench"}))
            .expect("attribute");
    }
    session
}

fn serializer_benches(c: &mut Criterion) {
    let data = DataSerializer::new();
    let schema = SchemaSerializer::new();

    c.bench_function("data_full_encode", |b| {
        let template = bench_session(RecordKind::Session);
        b.iter(|| {
            let mut session = template.clone();
            black_box(serialization::encode(&data, &mut session).expect("encode"));
        });
    });

    c.bench_function("schema_full_encode", |b| {
        let template = bench_session(RecordKind::Session);
        b.iter(|| {
            let mut session = template.clone();
            black_box(serialization::encode(&schema, &mut session).expect("encode"));
        });
    });

    c.bench_function("data_delta_encode", |b| {
        let mut session = bench_session(RecordKind::DeltaCapableSession);
        serialization::encode(&data, &mut session).expect("initial full");
        let mut counter = 0u64;
        b.iter(|| {
            counter = counter.wrapping_add(1);
            session
                .set_attribute("attr-0", json!(counter))
                .expect("attribute");
            black_box(serialization::encode(&data, &mut session).expect("delta"));
        });
    });

    c.bench_function("data_decode", |b| {
        let mut session = bench_session(RecordKind::Session);
        let payload = serialization::encode(&data, &mut session).expect("encode");
        b.iter(|| {
            black_box(serialization::decode(&data, &payload).expect("decode"));
        });
    });
}

fn repository_benches(c: &mut Criterion) {
    let serializer: Arc<dyn SessionSerializer> = Arc::new(DataSerializer::new());
    let repo = GridSessionRepository::new(
        InMemorySessionStore::new(Arc::clone(&serializer)),
        serializer,
    );

    c.bench_function("inmemory_save_delta", |b| {
        let mut session = repo.create_session();
        repo.save(&mut session).expect("initial save");
        let mut counter = 0u64;
        b.iter(|| {
            counter = counter.wrapping_add(1);
            session
                .set_attribute("counter", json!(counter))
                .expect("attribute");
            repo.save(&mut session).expect("save");
        });
    });

    c.bench_function("inmemory_find", |b| {
        let mut session = repo.create_session();
        session.set_attribute("cart", json!([1, 2, 3])).expect("attribute");
        repo.save(&mut session).expect("save");
        let id = session.id().clone();
        b.iter(|| {
            black_box(repo.find_by_id(&id).expect("find"));
        });
    });
}

criterion_group!(session_ops, serializer_benches, repository_benches);
criterion_main!(session_ops);
