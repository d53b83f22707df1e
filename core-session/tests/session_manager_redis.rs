//! Redis-dependent session manager scenarios. Gated behind `REDIS_URL` since
//! they exercise real `SET NX`/Lua-script CAS behavior against a live
//! server; `cargo test` skips them by default.

use core_session::manager::SessionManager;
use core_shared::config::{RedisConfig, SessionConfig};
use core_shared::redis::RedisFabric;

async fn fabric() -> RedisFabric {
    let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for this test");
    RedisFabric::new(&RedisConfig { url, key_prefix: "test-core-session".into(), pool_size: 4 })
        .await
        .expect("redis fabric connects")
}

fn session_config() -> SessionConfig {
    SessionConfig {
        cookie_name: "opsi-session".into(),
        min_age_seconds: 1,
        max_age_seconds: 86400,
        max_sessions_per_ip: 3,
    }
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn create_store_load_round_trip() {
    let manager = SessionManager::new(fabric().await, session_config());

    let session = manager.create("10.0.0.1", Some("Mozilla/5.0"), None, 1_000).await.unwrap();
    manager.store(&session, None).await.unwrap();

    let loaded = manager.load(&session.session_id, "10.0.0.1", 1_050).await.unwrap();
    let loaded = loaded.expect("session round-trips through redis");
    assert_eq!(loaded.session_id, session.session_id);

    manager.delete(&loaded).await.unwrap();
    let gone = manager.load(&session.session_id, "10.0.0.1", 1_050).await.unwrap();
    assert!(gone.is_none());
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn concurrent_store_with_stale_version_is_rejected() {
    let manager = SessionManager::new(fabric().await, session_config());

    let session = manager.create("10.0.0.2", None, None, 2_000).await.unwrap();
    manager.store(&session, None).await.unwrap();

    let mut racer_a = session.clone();
    racer_a.touch(2_010);
    manager.store(&racer_a, Some(&session.version.to_string())).await.unwrap();

    // `session`'s version is now stale — a second writer using it must lose.
    let mut racer_b = session.clone();
    racer_b.touch(2_020);
    let result = manager.store(&racer_b, Some(&session.version.to_string())).await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn max_sessions_per_ip_is_enforced() {
    let manager = SessionManager::new(fabric().await, session_config());
    let addr = "10.0.0.3";

    for _ in 0..3 {
        let session = manager.create(addr, None, None, 3_000).await.unwrap();
        manager.store(&session, None).await.unwrap();
    }

    let result = manager.create(addr, None, None, 3_000).await;
    assert!(result.is_err());
}
