//! The follow work queue.
//!
//! A single mutex guards the item list; every mutation (append, scan, claim,
//! removal) holds it for the whole mutation and never across network I/O.
//! The scan-and-mark of `take_next_eligible` is atomic, so two workers can
//! never claim the same item.

use crate::bot::Bot;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowAction {
    Follow,
    Unfollow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Waiting,
    InProgress,
    Followed,
    Unfollowed,
}

/// One scheduled follow/unfollow action. At most one item per
/// (tenant, bot username) exists in the queue at any time; the queue itself
/// enforces this on enqueue.
pub struct QueueItem {
    pub tenant_id: u64,
    pub bot: Arc<Bot>,
    pub action: FollowAction,
    pub scheduled_at: DateTime<Utc>,
    pub state: ItemState,
}

impl QueueItem {
    /// An item eligible immediately.
    #[must_use]
    pub fn new(tenant_id: u64, bot: Arc<Bot>, action: FollowAction) -> Self {
        Self::scheduled(tenant_id, bot, action, Utc::now())
    }

    #[must_use]
    pub fn scheduled(
        tenant_id: u64,
        bot: Arc<Bot>,
        action: FollowAction,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            bot,
            action,
            scheduled_at,
            state: ItemState::Waiting,
        }
    }
}

/// An item a worker has taken ownership of. The underlying entry stays in the
/// queue (marked in-progress) until the worker completes it, so membership
/// checks keep answering truthfully while the action runs.
pub struct Claim {
    pub tenant_id: u64,
    pub bot: Arc<Bot>,
    pub action: FollowAction,
}

#[derive(Default)]
pub struct FollowQueue {
    items: Mutex<Vec<QueueItem>>,
}

impl FollowQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one item.
    ///
    /// # Errors
    ///
    /// `AlreadyQueued` when an item for the same (tenant, bot) is present.
    pub async fn enqueue(&self, item: QueueItem) -> Result<()> {
        let mut items = self.items.lock().await;
        if contains(&items, item.tenant_id, item.bot.username()) {
            return Err(Error::AlreadyQueued(item.bot.username().to_string()));
        }
        items.push(item);
        Ok(())
    }

    /// Append a batch, atomically filtering entries already queued (or
    /// duplicated within the batch itself). Returns how many were accepted.
    pub async fn enqueue_many(&self, batch: Vec<QueueItem>) -> usize {
        let mut items = self.items.lock().await;
        let mut accepted = 0;
        for item in batch {
            if contains(&items, item.tenant_id, item.bot.username()) {
                continue;
            }
            items.push(item);
            accepted += 1;
        }
        accepted
    }

    /// Build a staggered batch: the n-th item becomes eligible `n * step`
    /// after now, spreading bulk operations instead of bursting them.
    #[must_use]
    pub fn staggered(
        tenant_id: u64,
        bots: Vec<Arc<Bot>>,
        action: FollowAction,
        step: Duration,
    ) -> Vec<QueueItem> {
        let now = Utc::now();
        bots.into_iter()
            .enumerate()
            .map(|(n, bot)| {
                let offset = step * i32::try_from(n + 1).unwrap_or(i32::MAX);
                QueueItem::scheduled(tenant_id, bot, action, now + offset)
            })
            .collect()
    }

    pub async fn is_queued(&self, bot_username: &str, tenant_id: u64) -> bool {
        contains(&*self.items.lock().await, tenant_id, bot_username)
    }

    /// Of the given usernames, those currently queued for the tenant.
    pub async fn queued_of(&self, bot_usernames: &[String], tenant_id: u64) -> Vec<String> {
        let items = self.items.lock().await;
        bot_usernames
            .iter()
            .filter(|name| contains(&items, tenant_id, name))
            .cloned()
            .collect()
    }

    /// Usernames of every item queued for the tenant.
    pub async fn pending_for(&self, tenant_id: u64) -> Vec<String> {
        self.items
            .lock()
            .await
            .iter()
            .filter(|item| item.tenant_id == tenant_id)
            .map(|item| item.bot.username().to_string())
            .collect()
    }

    /// Administrative cancellation of one item. Returns whether it existed.
    pub async fn remove(&self, bot_username: &str, tenant_id: u64) -> bool {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| {
            !(item.tenant_id == tenant_id && item.bot.username() == bot_username)
        });
        items.len() != before
    }

    /// Remove every item matching the predicate. Returns how many went.
    pub async fn remove_all<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&QueueItem) -> bool,
    {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| !predicate(item));
        before - items.len()
    }

    /// Cancel everything still waiting for a tenant (pause, channel change).
    pub async fn cancel_all_for_tenant(&self, tenant_id: u64) -> usize {
        self.remove_all(|item| item.tenant_id == tenant_id && item.state == ItemState::Waiting)
            .await
    }

    /// Atomically claim the first waiting item whose scheduled-at has passed,
    /// marking it in-progress.
    pub async fn take_next_eligible(&self, now: DateTime<Utc>) -> Option<Claim> {
        let mut items = self.items.lock().await;
        let item = items
            .iter_mut()
            .find(|item| item.state == ItemState::Waiting && item.scheduled_at <= now)?;
        item.state = ItemState::InProgress;
        Some(Claim {
            tenant_id: item.tenant_id,
            bot: item.bot.clone(),
            action: item.action,
        })
    }

    /// Drop a claimed item, recording its terminal state on the way out.
    pub async fn complete(&self, tenant_id: u64, bot_username: &str, terminal: ItemState) {
        let mut items = self.items.lock().await;
        if let Some(item) = items
            .iter_mut()
            .find(|item| item.tenant_id == tenant_id && item.bot.username() == bot_username)
        {
            item.state = terminal;
        }
        items.retain(|item| {
            !(item.tenant_id == tenant_id && item.bot.username() == bot_username)
        });
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

fn contains(items: &[QueueItem], tenant_id: u64, bot_username: &str) -> bool {
    items
        .iter()
        .any(|item| item.tenant_id == tenant_id && item.bot.username() == bot_username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::ClearanceSource;
    use crate::clearance::{Clearance, ClearanceState};
    use crate::platform::PlatformClient;
    use crate::types::{ChannelInfo, ReplyMetadata};
    use async_trait::async_trait;

    struct NullPlatform;

    #[async_trait]
    impl PlatformClient for NullPlatform {
        async fn send_message(
            &self,
            _channel: &ChannelInfo,
            _message: &str,
            _reply: Option<&ReplyMetadata>,
            _user_agent: &str,
        ) -> crate::Result<()> {
            Ok(())
        }

        async fn follow(&self, _channel: &ChannelInfo, _clearance: &Clearance) -> crate::Result<()> {
            Ok(())
        }

        async fn unfollow(
            &self,
            _channel: &ChannelInfo,
            _clearance: &Clearance,
        ) -> crate::Result<()> {
            Ok(())
        }

        async fn is_following(
            &self,
            _channel: &ChannelInfo,
            _clearance: &Clearance,
        ) -> crate::Result<bool> {
            Ok(false)
        }
    }

    fn bot(name: &str) -> Arc<Bot> {
        Arc::new(Bot::with_platform(
            name.to_string(),
            ChannelInfo::default(),
            ClearanceSource::Shared(Arc::new(ClearanceState::new("ua"))),
            Arc::new(NullPlatform),
        ))
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let queue = FollowQueue::new();
        queue
            .enqueue(QueueItem::new(5, bot("x"), FollowAction::Follow))
            .await
            .unwrap();
        assert!(queue.is_queued("x", 5).await);

        let err = queue
            .enqueue(QueueItem::new(5, bot("x"), FollowAction::Unfollow))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyQueued(name) if name == "x"));

        // Same bot under a different tenant is a different slot.
        queue
            .enqueue(QueueItem::new(6, bot("x"), FollowAction::Follow))
            .await
            .unwrap();
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn batch_enqueue_filters_duplicates_atomically() {
        let queue = FollowQueue::new();
        queue
            .enqueue(QueueItem::new(1, bot("a"), FollowAction::Follow))
            .await
            .unwrap();

        let accepted = queue
            .enqueue_many(vec![
                QueueItem::new(1, bot("a"), FollowAction::Follow), // already queued
                QueueItem::new(1, bot("b"), FollowAction::Follow),
                QueueItem::new(1, bot("b"), FollowAction::Follow), // duplicate in batch
                QueueItem::new(1, bot("c"), FollowAction::Follow),
            ])
            .await;
        assert_eq!(accepted, 2);
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn claim_respects_schedule_and_marks_in_progress() {
        let queue = FollowQueue::new();
        let now = Utc::now();
        queue
            .enqueue(QueueItem::scheduled(
                1,
                bot("later"),
                FollowAction::Follow,
                now + Duration::seconds(60),
            ))
            .await
            .unwrap();
        queue
            .enqueue(QueueItem::scheduled(
                1,
                bot("due"),
                FollowAction::Follow,
                now - Duration::seconds(1),
            ))
            .await
            .unwrap();

        let claim = queue.take_next_eligible(now).await.expect("one eligible");
        assert_eq!(claim.bot.username(), "due");

        // The claimed item is in-progress, not eligible again; the future
        // item is still not due.
        assert!(queue.take_next_eligible(now).await.is_none());
        assert!(queue.is_queued("due", 1).await);

        queue.complete(1, "due", ItemState::Followed).await;
        assert!(!queue.is_queued("due", 1).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn staggered_batch_spreads_eligibility() {
        let items = FollowQueue::staggered(
            7,
            vec![bot("a"), bot("b"), bot("c")],
            FollowAction::Follow,
            Duration::seconds(2),
        );
        assert_eq!(items.len(), 3);
        assert!(items[0].scheduled_at < items[1].scheduled_at);
        assert!(items[1].scheduled_at < items[2].scheduled_at);
        assert_eq!(items[2].scheduled_at - items[0].scheduled_at, Duration::seconds(4));
    }

    #[tokio::test]
    async fn tenant_cancellation_leaves_in_progress_items() {
        let queue = FollowQueue::new();
        queue
            .enqueue(QueueItem::new(3, bot("a"), FollowAction::Follow))
            .await
            .unwrap();
        queue
            .enqueue(QueueItem::new(3, bot("b"), FollowAction::Follow))
            .await
            .unwrap();
        queue
            .enqueue(QueueItem::new(4, bot("c"), FollowAction::Follow))
            .await
            .unwrap();

        // A worker is mid-flight on one of tenant 3's items.
        let claim = queue.take_next_eligible(Utc::now()).await.expect("claim");
        assert_eq!(claim.bot.username(), "a");

        let removed = queue.cancel_all_for_tenant(3).await;
        assert_eq!(removed, 1);
        assert!(queue.is_queued("a", 3).await);
        assert!(!queue.is_queued("b", 3).await);
        assert!(queue.is_queued("c", 4).await);
    }

    #[tokio::test]
    async fn in_progress_item_can_be_dropped_without_a_terminal_state() {
        let queue = FollowQueue::new();
        queue
            .enqueue(QueueItem::new(1, bot("a"), FollowAction::Follow))
            .await
            .unwrap();

        let claim = queue.take_next_eligible(Utc::now()).await.expect("claim");
        assert_eq!(claim.bot.username(), "a");

        // The failure path removes the claimed entry directly, never writing
        // Followed/Unfollowed for an action that did not happen.
        assert!(queue.remove("a", 1).await);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn membership_batch_check() {
        let queue = FollowQueue::new();
        queue
            .enqueue(QueueItem::new(2, bot("a"), FollowAction::Follow))
            .await
            .unwrap();

        let names = vec!["a".to_string(), "b".to_string()];
        assert_eq!(queue.queued_of(&names, 2).await, vec!["a".to_string()]);
        assert_eq!(queue.pending_for(2).await, vec!["a".to_string()]);
        assert!(queue.pending_for(9).await.is_empty());

        assert!(queue.remove("a", 2).await);
        assert!(!queue.remove("a", 2).await);
        assert!(queue.is_empty().await);
    }
}
