//! Shared follow/unfollow work queue and its polling-worker pool.

mod queue;
mod worker;

pub use queue::{Claim, FollowAction, FollowQueue, ItemState, QueueItem};
pub use worker::{spawn_workers, spawn_workers_with_interval};
