//! Polling workers draining the follow queue.
//!
//! Each worker repeatedly claims the next eligible item, runs the action
//! through the item's bot outside the queue lock, persists the outcome, and
//! removes the item — on failure too, so nothing silently retries. One item's
//! failure never stops a worker.

use super::queue::{FollowAction, FollowQueue, ItemState};
use crate::config;
use crate::error::Error;
use crate::storage::Storage;
use crate::types::LogCategory;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawn the worker pool with the configured poll interval.
#[must_use]
pub fn spawn_workers(
    queue: Arc<FollowQueue>,
    storage: Arc<dyn Storage>,
    count: usize,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    spawn_workers_with_interval(
        queue,
        storage,
        count,
        shutdown,
        Duration::from_millis(config::QUEUE_POLL_MS),
    )
}

/// Spawn the worker pool with an explicit poll interval.
#[must_use]
pub fn spawn_workers_with_interval(
    queue: Arc<FollowQueue>,
    storage: Arc<dyn Storage>,
    count: usize,
    shutdown: CancellationToken,
    poll: Duration,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            tokio::spawn(worker_loop(
                queue.clone(),
                storage.clone(),
                shutdown.clone(),
                poll,
                worker_id,
            ))
        })
        .collect()
}

async fn worker_loop(
    queue: Arc<FollowQueue>,
    storage: Arc<dyn Storage>,
    shutdown: CancellationToken,
    poll: Duration,
    worker_id: usize,
) {
    debug!(worker_id, "follow worker started");
    loop {
        if shutdown.is_cancelled() {
            debug!(worker_id, "follow worker stopped");
            return;
        }

        let Some(claim) = queue.take_next_eligible(Utc::now()).await else {
            tokio::select! {
                () = shutdown.cancelled() => continue,
                () = sleep(poll) => continue,
            }
        };

        // The action runs outside the queue lock; the claimed entry stays in
        // the queue (in-progress) so membership checks remain truthful.
        let succeeded = match claim.action {
            FollowAction::Follow => claim.bot.follow().await,
            FollowAction::Unfollow => claim.bot.unfollow().await,
        };

        let bot_username = claim.bot.username().to_string();
        let channel = claim.bot.channel().username.clone();

        if succeeded {
            let persisted = match claim.action {
                FollowAction::Follow => storage.record_follow(&bot_username, &channel).await,
                FollowAction::Unfollow => storage.record_unfollow(&bot_username, &channel).await,
            };
            if let Err(e) = persisted {
                warn!(worker_id, bot = %bot_username, error = %e, "failed to persist follow state");
            }

            let verb = match claim.action {
                FollowAction::Follow => "followed",
                FollowAction::Unfollow => "unfollowed",
            };
            if let Err(e) = storage
                .append_log(
                    claim.tenant_id,
                    &format!("bot {bot_username} {verb} {channel}"),
                    LogCategory::Action,
                )
                .await
            {
                warn!(worker_id, error = %e, "failed to append audit log");
            }
            info!(worker_id, tenant_id = claim.tenant_id, bot = %bot_username, verb, "queue item completed");

            let terminal = match claim.action {
                FollowAction::Follow => ItemState::Followed,
                FollowAction::Unfollow => ItemState::Unfollowed,
            };
            queue.complete(claim.tenant_id, &bot_username, terminal).await;
        } else {
            // No automatic re-enqueue: the item is removed either way and
            // callers must re-submit. The success terminal states are never
            // written for a failed item.
            let failure = Error::QueueItemFailed {
                bot: bot_username.clone(),
                attempts: config::FOLLOW_ATTEMPTS,
            };
            warn!(worker_id, tenant_id = claim.tenant_id, error = %failure, "queue item failed");
            queue.remove(&bot_username, claim.tenant_id).await;
        }
    }
}
