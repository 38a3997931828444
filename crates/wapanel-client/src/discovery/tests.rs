use super::*;
use crate::testing::{
    closed_port, discovery_config, spawn_backend, spawn_unhealthy_backend,
};
use wapanel_core::state::MemoryStateStore;

fn discovery(
    initial_port: u16,
    config: DiscoveryConfig,
    store: Arc<dyn StateStore>,
) -> Arc<Discovery> {
    let endpoint = EndpointHandle::new(BackendEndpoint::new("127.0.0.1", initial_port));
    Arc::new(Discovery::new(endpoint, store, config, None).unwrap())
}

#[tokio::test]
async fn test_concurrent_discover_shares_one_scan() {
    let backend = spawn_backend().await;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let d = discovery(backend.port, discovery_config(&[backend.port]), store);

    let (a, b) = tokio::join!(
        d.discover(DiscoverOptions::default()),
        d.discover(DiscoverOptions::default()),
    );

    assert_eq!(a, Some(backend.port));
    assert_eq!(b, Some(backend.port));
    assert_eq!(d.rounds_run(), 1);
    assert_eq!(backend.hits.health(), 1);
    assert!(!d.is_discovering());
}

#[tokio::test]
async fn test_finds_backend_and_persists_port() {
    let backend = spawn_backend().await;
    let stale = closed_port().await;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let d = discovery(
        stale,
        discovery_config(&[stale, backend.port]),
        Arc::clone(&store),
    );

    let found = d.discover(DiscoverOptions::default()).await;

    assert_eq!(found, Some(backend.port));
    assert_eq!(d.endpoint().current().port, backend.port);
    assert!(d.endpoint().is_resolved());
    assert_eq!(load_backend_port(store.as_ref()).await, Some(backend.port));
}

#[tokio::test]
async fn test_persisted_port_wins_in_first_round() {
    let backend = spawn_backend().await;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    save_backend_port(store.as_ref(), backend.port).await.unwrap();

    // The configured ranges point elsewhere entirely.
    let elsewhere = closed_port().await;
    let mut config = discovery_config(&[elsewhere]);
    config.max_rounds = 3;
    let d = discovery(elsewhere, config, store);

    let resolved = d.resolve_initial().await;

    assert_eq!(resolved.port, backend.port);
    assert_eq!(d.rounds_run(), 1);
    assert_eq!(backend.hits.health(), 1);
    assert_eq!(d.last_known_port(), Some(backend.port));
    assert_eq!(d.current(), resolved);
}

#[tokio::test]
async fn test_unhealthy_responder_is_not_adopted() {
    let starting = spawn_unhealthy_backend().await;
    let ready = spawn_backend().await;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let d = discovery(
        starting.port,
        discovery_config(&[starting.port, ready.port]),
        store,
    );

    assert_eq!(
        d.discover(DiscoverOptions::default()).await,
        Some(ready.port)
    );
    assert!(starting.hits.health() >= 1);
}

#[tokio::test]
async fn test_exhausted_rounds_keep_endpoint() {
    let dead = closed_port().await;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let mut config = discovery_config(&[dead]);
    config.max_rounds = 2;
    let d = discovery(dead, config, Arc::clone(&store));

    let found = d.discover(DiscoverOptions::default()).await;

    assert_eq!(found, None);
    assert_eq!(d.rounds_run(), 2);
    assert_eq!(d.endpoint().current().port, dead);
    assert!(!d.endpoint().is_resolved());
    assert_eq!(load_backend_port(store.as_ref()).await, None);
}

#[tokio::test]
async fn test_option_overrides_rounds() {
    let dead = closed_port().await;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let d = discovery(dead, discovery_config(&[dead]), store);

    let opts = DiscoverOptions {
        max_rounds: Some(3),
        retry_delay: Some(Duration::from_millis(1)),
        ..DiscoverOptions::default()
    };
    assert_eq!(d.discover(opts).await, None);
    assert_eq!(d.rounds_run(), 3);
}

#[tokio::test]
async fn test_resolve_initial_falls_back_to_guess() {
    let dead = closed_port().await;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let d = discovery(dead, discovery_config(&[dead]), store);

    let resolved = d.resolve_initial().await;

    assert_eq!(resolved.port, dead);
    assert!(d.endpoint().is_resolved());
}

#[tokio::test]
async fn test_explicit_backend_skips_scanning() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let endpoint = EndpointHandle::new(BackendEndpoint::new("127.0.0.1", 3001));
    let explicit = BackendEndpoint::new("10.1.2.3", 4100);
    let d = Arc::new(
        Discovery::new(
            endpoint,
            store,
            discovery_config(&[3001]),
            Some(explicit.clone()),
        )
        .unwrap(),
    );

    assert_eq!(d.resolve_initial().await, explicit);
    assert_eq!(d.rounds_run(), 0);
    assert!(d.endpoint().is_resolved());
}

#[tokio::test]
async fn test_port_info_document_skips_scanning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".port-info.json");
    std::fs::write(&path, r#"{"frontendPort": 3000, "backendPort": 3009}"#).unwrap();

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let mut config = discovery_config(&[3001]);
    config.port_info = path.to_string_lossy().into_owned();
    let d = discovery(3001, config, Arc::clone(&store));

    let resolved = d.resolve_initial().await;

    assert_eq!(resolved.port, 3009);
    assert_eq!(d.rounds_run(), 0);
    assert_eq!(load_backend_port(store.as_ref()).await, Some(3009));
}

#[tokio::test]
async fn test_persist_disabled() {
    let backend = spawn_backend().await;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let mut config = discovery_config(&[backend.port]);
    config.persist = false;
    let d = discovery(backend.port, config, Arc::clone(&store));

    d.discover(DiscoverOptions::default()).await;
    assert_eq!(load_backend_port(store.as_ref()).await, None);
}
