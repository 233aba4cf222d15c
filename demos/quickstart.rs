use gridsession::config::{ExpirationPolicySelector, SerializerSelector, SessionConfig};
use gridsession::expiry::SessionExpiry;
use gridsession::inmemory::InMemorySessionStore;
use gridsession::repository::{
    FixedDurationExpirationSessionRepository, GridSessionRepository, SessionRepository,
};
use gridsession::{ExpirationAction, SessionResult};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn run_inmemory_demo() -> SessionResult<()> {
    println!("== In-memory session demo ==");
    let config = SessionConfig::default()
        .with_serializer(SerializerSelector::Composite)
        .with_indexable_session_attributes(["team"])
        .with_expiration_policy(ExpirationPolicySelector::FixedDuration {
            fixed_timeout_seconds: 3600,
            idle_timeout_seconds: Some(900),
        })
        .with_expiration_action(ExpirationAction::Destroy);
    config.validate()?;

    let serializer = config.build_serializer()?;
    let hook = SessionExpiry::new(config.build_expiration_policy()?)
        .with_serializer(Arc::clone(&serializer));
    let store = InMemorySessionStore::new(serializer).with_expiry(hook);
    let grid = GridSessionRepository::from_config(store, &config)?;
    match config.fixed_duration() {
        Some(lifetime) => {
            let repo = FixedDurationExpirationSessionRepository::new(grid, lifetime)?;
            exercise(&repo, repo.delegate())
        }
        None => exercise(&grid, &grid),
    }
}

fn exercise<R: SessionRepository>(
    repo: &R,
    grid: &GridSessionRepository<InMemorySessionStore>,
) -> SessionResult<()> {
    let mut session = repo.create_session();
    session.set_principal_name(Some("user-123"))?;
    session.set_attribute("team", json!("onboarding"))?;
    session.set_attribute("step", json!(1))?;
    repo.save(&mut session)?;
    println!("Created session {} ({:?})", session.id(), session.kind());

    if let Some(mut loaded) = repo.find_by_id(session.id())? {
        println!(
            "Loaded step {}",
            loaded.get_attribute("step").map(|v| v.to_string()).unwrap_or_default()
        );
        loaded.set_attribute("step", json!(2))?;
        repo.save(&mut loaded)?;
        println!("Saved changes: {:?}", loaded.has_delta());
    }

    let owned = grid.find_by_principal_name("user-123")?;
    println!("Principal lookup found {} session(s)", owned.len());

    let team = grid.find_by_indexed_attribute("team", &json!("onboarding"))?;
    println!("Team lookup found {} session(s)", team.len());

    repo.delete_by_id(session.id())?;
    println!("Session removed");
    Ok(())
}

fn main() -> SessionResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    run_inmemory_demo()
}
