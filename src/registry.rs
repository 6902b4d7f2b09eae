//! Process-wide tenant registry.
//!
//! Maps tenant ids to their bot pools, materializing pools lazily from
//! persisted configuration. Every control operation resolves-or-creates the
//! pool and delegates; `remove` is the sole eviction path and must run before
//! a tenant's persisted configuration is deleted externally.

use crate::bot::ClearanceSource;
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::tenant::TenantPool;
use crate::types::{ChannelInfo, LogCategory, ReplyMetadata, SpamMode, TenantConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct TenantRegistry {
    storage: Arc<dyn Storage>,
    clearance: ClearanceSource,
    base_url: String,
    tenants: RwLock<HashMap<u64, Arc<TenantPool>>>,
}

impl TenantRegistry {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, clearance: ClearanceSource, base_url: String) -> Self {
        Self {
            storage,
            clearance,
            base_url,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the tenant's pool, creating it from persisted configuration on
    /// first access. Returns the freshly loaded configuration alongside.
    async fn resolve(&self, tenant_id: u64) -> Result<(Arc<TenantPool>, TenantConfig)> {
        let config = self
            .storage
            .load_tenant(tenant_id)
            .await
            .map_err(Error::Storage)?;

        if let Some(pool) = self.tenants.read().await.get(&tenant_id) {
            return Ok((pool.clone(), config));
        }

        let mut tenants = self.tenants.write().await;
        let pool = tenants
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(TenantPool::new(tenant_id, config.channel.clone())))
            .clone();
        Ok((pool, config))
    }

    /// Pool handle without materializing anything.
    pub async fn get(&self, tenant_id: u64) -> Option<Arc<TenantPool>> {
        self.tenants.read().await.get(&tenant_id).cloned()
    }

    pub async fn contains(&self, tenant_id: u64) -> bool {
        self.tenants.read().await.contains_key(&tenant_id)
    }

    pub async fn len(&self) -> usize {
        self.tenants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tenants.read().await.is_empty()
    }

    /// Whether the bot is live without touching persisted configuration.
    pub async fn is_connected(&self, tenant_id: u64, bot_username: &str) -> bool {
        match self.get(tenant_id).await {
            Some(pool) => pool.is_connected(bot_username).await,
            None => false,
        }
    }

    /// # Errors
    ///
    /// `UnknownBot` when the configuration has no such credential set;
    /// storage and transport errors pass through.
    pub async fn connect_bot(&self, tenant_id: u64, bot_username: &str) -> Result<()> {
        let (pool, config) = self.resolve(tenant_id).await?;
        pool.connect_bot(bot_username, &config, self.clearance.clone(), &self.base_url)
            .await
    }

    /// # Errors
    ///
    /// Storage errors pass through; disconnecting an unknown bot is a no-op.
    pub async fn disconnect_bot(&self, tenant_id: u64, bot_username: &str) -> Result<()> {
        let (pool, _) = self.resolve(tenant_id).await?;
        pool.disconnect_bot(bot_username).await;
        Ok(())
    }

    /// # Errors
    ///
    /// Storage and transport errors pass through.
    pub async fn connect_all(&self, tenant_id: u64) -> Result<()> {
        let (pool, config) = self.resolve(tenant_id).await?;
        pool.connect_all(&config, self.clearance.clone(), &self.base_url)
            .await
    }

    /// # Errors
    ///
    /// Storage errors pass through.
    pub async fn disconnect_all(&self, tenant_id: u64) -> Result<()> {
        let (pool, _) = self.resolve(tenant_id).await?;
        pool.disconnect_all().await;
        Ok(())
    }

    /// Send a message as one of the tenant's bots, optionally as a templated
    /// reply.
    ///
    /// # Errors
    ///
    /// `BotNotConnected` when the bot is not live; send errors pass through.
    pub async fn send(
        &self,
        tenant_id: u64,
        bot_username: &str,
        message: &str,
        reply: Option<&ReplyMetadata>,
    ) -> Result<()> {
        let (pool, _) = self.resolve(tenant_id).await?;
        pool.send(bot_username, message, reply).await
    }

    /// # Errors
    ///
    /// Storage errors pass through.
    pub async fn spam_started(&self, tenant_id: u64) -> Result<bool> {
        let (pool, _) = self.resolve(tenant_id).await?;
        Ok(pool.spam_started().await)
    }

    /// # Errors
    ///
    /// `SpamAlreadyRunning` while a run is active.
    pub async fn start_spam(
        &self,
        tenant_id: u64,
        threads: usize,
        delay: Duration,
        messages: Vec<String>,
        mode: SpamMode,
    ) -> Result<()> {
        let (pool, _) = self.resolve(tenant_id).await?;
        pool.start_spam(threads, delay, messages, mode).await
    }

    /// # Errors
    ///
    /// Storage errors pass through.
    pub async fn stop_spam(&self, tenant_id: u64) -> Result<()> {
        let (pool, _) = self.resolve(tenant_id).await?;
        pool.stop_spam().await;
        Ok(())
    }

    /// # Errors
    ///
    /// Storage errors pass through.
    pub async fn change_channel(&self, tenant_id: u64, new_channel: ChannelInfo) -> Result<()> {
        let (pool, _) = self.resolve(tenant_id).await?;
        pool.change_channel(new_channel).await;
        Ok(())
    }

    /// Evict a tenant: stop its spam run, disconnect its bots, drop the
    /// entry. After this the id does not resolve without reloading from
    /// persistence.
    pub async fn remove(&self, tenant_id: u64) {
        let Some(pool) = self.get(tenant_id).await else {
            return;
        };

        if pool.spam_started().await {
            pool.stop_spam().await;
            self.audit(tenant_id, "stopped spam run (eviction)").await;
        }

        if !pool.connected_bots().await.is_empty() {
            pool.disconnect_all().await;
            self.audit(tenant_id, "disconnected all bots (eviction)").await;
        }

        self.tenants.write().await.remove(&tenant_id);
        info!(tenant_id, "tenant evicted");
    }

    async fn audit(&self, tenant_id: u64, message: &str) {
        if let Err(e) = self
            .storage
            .append_log(tenant_id, message, LogCategory::Action)
            .await
        {
            warn!(tenant_id, error = %e, "failed to append audit log");
        }
    }
}
