mod common;

use chatswarm::registry::TenantRegistry;
use chatswarm::storage::MemoryStorage;
use chatswarm::types::{
    ChannelInfo, CredentialSet, ProxyConfig, ProxyKind, SpamMode, TenantConfig,
};
use common::{mock_bot, ready_clearance, MockPlatform};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn credentials(username: &str) -> CredentialSet {
    CredentialSet {
        username: username.to_string(),
        session_token: "session".to_string(),
        auth_cookie_name: "auth".to_string(),
        auth_cookie_value: "cookie".to_string(),
        xsrf_token: "xsrf".to_string(),
        proxy: ProxyConfig {
            kind: ProxyKind::Http,
            host: "127.0.0.1".to_string(),
            port: 3128,
            username: None,
            password: None,
        },
    }
}

fn tenant_config(id: u64) -> TenantConfig {
    TenantConfig {
        id,
        credentials: vec![credentials("alpha"), credentials("beta")],
        channel: ChannelInfo {
            username: "streamer".to_string(),
            chatroom_id: Some(99),
        },
        spam_templates: vec![],
    }
}

#[tokio::test]
async fn registry_materializes_pools_from_persisted_config() {
    let storage = Arc::new(MemoryStorage::default());
    storage.insert_tenant(tenant_config(7)).await;
    let registry = TenantRegistry::new(
        storage,
        ready_clearance(),
        "http://127.0.0.1:1".to_string(),
    );

    assert!(!registry.contains(7).await);
    registry.connect_all(7).await.unwrap();
    assert!(registry.contains(7).await);
    assert!(registry.is_connected(7, "alpha").await);
    assert!(registry.is_connected(7, "beta").await);
    assert!(!registry.is_connected(7, "ghost").await);

    registry.disconnect_bot(7, "alpha").await.unwrap();
    assert!(!registry.is_connected(7, "alpha").await);

    // An unconfigured tenant never materializes.
    assert!(registry.connect_all(8).await.is_err());
    assert!(!registry.contains(8).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eviction_stops_spam_and_drops_the_pool() {
    let storage = Arc::new(MemoryStorage::default());
    storage.insert_tenant(tenant_config(7)).await;
    let registry = TenantRegistry::new(
        storage.clone(),
        ready_clearance(),
        "http://127.0.0.1:1".to_string(),
    );

    registry.connect_all(7).await.unwrap();
    let pool = registry.get(7).await.expect("pool exists");

    // Swap the transport-backed bots for instrumented ones.
    let platform = MockPlatform::new();
    pool.disconnect_all().await;
    pool.adopt(mock_bot("alpha", platform.clone())).await;
    pool.adopt(mock_bot("beta", platform.clone())).await;

    registry
        .start_spam(
            7,
            2,
            Duration::from_millis(10),
            vec!["spam".to_string()],
            SpamMode::Random,
        )
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(registry.spam_started(7).await.unwrap());

    registry.remove(7).await;

    assert!(!registry.contains(7).await);
    assert!(pool.connected_bots().await.is_empty());
    assert!(!pool.spam_started().await);

    // No sender survives eviction.
    let settled = platform.send_calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(platform.send_calls.load(Ordering::SeqCst), settled);

    // Eviction is audited.
    let logs = storage.logs().await;
    assert!(logs.iter().any(|e| e.message.contains("stopped spam run")));
    assert!(logs
        .iter()
        .any(|e| e.message.contains("disconnected all bots")));
}

#[tokio::test]
async fn removing_an_unknown_tenant_is_a_no_op() {
    let storage = Arc::new(MemoryStorage::default());
    let registry = TenantRegistry::new(
        storage.clone(),
        ready_clearance(),
        "http://127.0.0.1:1".to_string(),
    );
    registry.remove(42).await;
    assert!(registry.is_empty().await);
    assert!(storage.logs().await.is_empty());
}
