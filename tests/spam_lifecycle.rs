mod common;

use chatswarm::tenant::TenantPool;
use chatswarm::types::{ChannelInfo, SpamMode};
use chatswarm::Error;
use common::{mock_bot, MockPlatform};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn pool_with_bots(platform: &Arc<MockPlatform>, names: &[&str]) -> Arc<TenantPool> {
    let pool = Arc::new(TenantPool::new(1, ChannelInfo::default()));
    for name in names {
        pool.adopt(mock_bot(name, platform.clone())).await;
    }
    pool
}

async fn wait_until_idle(pool: &TenantPool) {
    timeout(Duration::from_secs(5), async {
        while pool.spam_started().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("spam run should wind down");
}

#[tokio::test]
async fn list_mode_consumes_messages_in_order_and_self_terminates() {
    let platform = MockPlatform::new();
    let pool = Arc::new(TenantPool::new(1, ChannelInfo::default()));
    pool.adopt(mock_bot("alpha", platform.clone())).await;
    pool.adopt(mock_bot("beta", platform.clone())).await;

    let messages = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    pool.start_spam(2, Duration::from_millis(5), messages, SpamMode::List)
        .await
        .unwrap();

    wait_until_idle(&pool).await;
    assert_eq!(platform.sent_messages(), vec!["one", "two", "three"]);
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let platform = MockPlatform::new();
    let pool = pool_with_bots(&platform, &["alpha"]).await;

    pool.start_spam(
        1,
        Duration::from_millis(20),
        vec!["hello".to_string()],
        SpamMode::Random,
    )
    .await
    .unwrap();

    let err = pool
        .start_spam(
            1,
            Duration::from_millis(20),
            vec!["again".to_string()],
            SpamMode::Random,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SpamAlreadyRunning));

    pool.stop_spam().await;
    assert!(!pool.spam_started().await);

    // With the run gone, a new one is accepted.
    pool.start_spam(
        1,
        Duration::from_millis(20),
        vec!["fresh".to_string()],
        SpamMode::Random,
    )
    .await
    .unwrap();
    pool.stop_spam().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_spam_is_a_barrier() {
    let platform = Arc::new(MockPlatform {
        send_delay: Some(Duration::from_millis(30)),
        ..MockPlatform::default()
    });
    let pool = Arc::new(TenantPool::new(1, ChannelInfo::default()));
    for name in ["alpha", "beta", "gamma"] {
        pool.adopt(mock_bot(name, platform.clone())).await;
    }

    pool.start_spam(
        3,
        Duration::from_millis(10),
        vec!["spam".to_string()],
        SpamMode::Random,
    )
    .await
    .unwrap();

    sleep(Duration::from_millis(100)).await;
    pool.stop_spam().await;

    // Once stop returns, no sender is left to produce further sends.
    let settled = platform.send_calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(150)).await;
    assert_eq!(platform.send_calls.load(Ordering::SeqCst), settled);
    assert!(!pool.spam_started().await);
}

#[tokio::test]
async fn random_mode_with_no_messages_exits_immediately() {
    let platform = MockPlatform::new();
    let pool = pool_with_bots(&platform, &["alpha"]).await;

    pool.start_spam(2, Duration::from_millis(5), vec![], SpamMode::Random)
        .await
        .unwrap();

    wait_until_idle(&pool).await;
    assert_eq!(platform.send_calls.load(Ordering::SeqCst), 0);
}
