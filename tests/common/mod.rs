//! Shared fixtures: an instrumented in-memory transport and bot builders.
#![allow(dead_code)] // each test binary uses a different subset

use async_trait::async_trait;
use chatswarm::bot::{Bot, ClearanceSource};
use chatswarm::clearance::{Clearance, ClearanceState};
use chatswarm::platform::PlatformClient;
use chatswarm::types::{ChannelInfo, ReplyMetadata};
use chatswarm::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Transport double that records every call and lets a test script failures.
#[derive(Default)]
pub struct MockPlatform {
    pub send_calls: AtomicUsize,
    pub follow_calls: AtomicUsize,
    pub unfollow_calls: AtomicUsize,
    pub check_calls: AtomicUsize,
    pub following: AtomicBool,
    /// Follow/unfollow attempts that bounce off a challenge page before one
    /// succeeds. `usize::MAX` keeps bouncing forever.
    pub transient_failures: AtomicUsize,
    pub sent: Mutex<Vec<String>>,
    pub send_delay: Option<Duration>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn consume_transient(&self) -> bool {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining == 0 {
            return false;
        }
        if remaining != usize::MAX {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
        }
        true
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn send_message(
        &self,
        _channel: &ChannelInfo,
        message: &str,
        _reply: Option<&ReplyMetadata>,
        _user_agent: &str,
    ) -> Result<()> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
        Ok(())
    }

    async fn follow(&self, _channel: &ChannelInfo, _clearance: &Clearance) -> Result<()> {
        self.follow_calls.fetch_add(1, Ordering::SeqCst);
        if self.consume_transient() {
            return Err(Error::TransientRejection);
        }
        self.following.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unfollow(&self, _channel: &ChannelInfo, _clearance: &Clearance) -> Result<()> {
        self.unfollow_calls.fetch_add(1, Ordering::SeqCst);
        if self.consume_transient() {
            return Err(Error::TransientRejection);
        }
        self.following.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_following(&self, _channel: &ChannelInfo, _clearance: &Clearance) -> Result<bool> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.following.load(Ordering::SeqCst))
    }
}

/// Clearance source backed by a state that already holds a token, so
/// state-changing calls never bounce on a missing clearance.
pub fn ready_clearance() -> ClearanceSource {
    let state = Arc::new(ClearanceState::new("test-agent"));
    state.publish("clearance-token", "test-agent");
    ClearanceSource::Shared(state)
}

pub fn mock_bot(name: &str, platform: Arc<MockPlatform>) -> Arc<Bot> {
    Arc::new(Bot::with_platform(
        name.to_string(),
        ChannelInfo {
            username: "streamer".to_string(),
            chatroom_id: Some(99),
        },
        ready_clearance(),
        platform,
    ))
}
