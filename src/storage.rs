//! Persistence collaborator seam.
//!
//! The core does not own an on-disk format; it consumes a narrow load/save
//! surface: tenant configuration by id, the per-bot "followed-by" set, and an
//! append-only audit log. `MemoryStorage` backs tests and the default wiring.

use crate::types::{LogCategory, TenantConfig};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the persisted configuration for a tenant.
    async fn load_tenant(&self, id: u64) -> Result<TenantConfig>;

    /// Record that `bot_username` now follows `channel`.
    async fn record_follow(&self, bot_username: &str, channel: &str) -> Result<()>;

    /// Record that `bot_username` no longer follows `channel`.
    async fn record_unfollow(&self, bot_username: &str, channel: &str) -> Result<()>;

    /// Channels currently recorded as followed by `bot_username`.
    async fn followed_channels(&self, bot_username: &str) -> Result<Vec<String>>;

    /// Append an audit-log entry for a tenant.
    async fn append_log(&self, tenant_id: u64, message: &str, category: LogCategory)
        -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub tenant_id: u64,
    pub message: String,
    pub category: LogCategory,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    tenants: RwLock<HashMap<u64, TenantConfig>>,
    followed: RwLock<HashMap<String, HashSet<String>>>,
    logs: RwLock<Vec<LogEntry>>,
}

impl MemoryStorage {
    pub async fn insert_tenant(&self, config: TenantConfig) {
        self.tenants.write().await.insert(config.id, config);
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.logs.read().await.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_tenant(&self, id: u64) -> Result<TenantConfig> {
        self.tenants
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("tenant {id} is not configured"))
    }

    async fn record_follow(&self, bot_username: &str, channel: &str) -> Result<()> {
        self.followed
            .write()
            .await
            .entry(bot_username.to_string())
            .or_default()
            .insert(channel.to_string());
        Ok(())
    }

    async fn record_unfollow(&self, bot_username: &str, channel: &str) -> Result<()> {
        if let Some(set) = self.followed.write().await.get_mut(bot_username) {
            set.remove(channel);
        }
        Ok(())
    }

    async fn followed_channels(&self, bot_username: &str) -> Result<Vec<String>> {
        Ok(self
            .followed
            .read()
            .await
            .get(bot_username)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn append_log(
        &self,
        tenant_id: u64,
        message: &str,
        category: LogCategory,
    ) -> Result<()> {
        self.logs.write().await.push(LogEntry {
            tenant_id,
            message: message.to_string(),
            category,
        });
        Ok(())
    }
}
