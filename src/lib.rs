//! chatswarm - multi-tenant chat bot coordinator for a streaming platform.
//!
//! Each tenant owns a set of proxied bot identities that send chat messages
//! and toggle follow relationships against the platform. A shared background
//! service keeps the anti-bot clearance token fresh for all of them, and a
//! global work queue drains scheduled follow/unfollow actions through a pool
//! of polling workers.

pub mod bot;
pub mod clearance;
pub mod config;
pub mod error;
pub mod follow;
pub mod platform;
pub mod registry;
pub mod storage;
pub mod tenant;
pub mod types;

pub use error::{Error, Result};
