//! Per-tenant bot pool and spam scheduler.
//!
//! Owns the tenant's live bot connections (registration order preserved) and
//! at most one active spam run. Senders are cooperative tasks; `stop_spam`
//! is a barrier that returns only after every sender has exited.

use crate::bot::{Bot, ClearanceSource};
use crate::config;
use crate::error::{Error, Result};
use crate::types::{ChannelInfo, ReplyMetadata, SpamMode, TenantConfig};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct SpamRun {
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
}

/// Decrements the active-sender counter when a sender exits, however it
/// exits.
struct SenderGuard(Arc<AtomicUsize>);

impl Drop for SenderGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TenantPool {
    id: u64,
    channel: RwLock<ChannelInfo>,
    bots: RwLock<Vec<(String, Arc<Bot>)>>,
    spam: Mutex<Option<SpamRun>>,
}

impl TenantPool {
    #[must_use]
    pub fn new(id: u64, channel: ChannelInfo) -> Self {
        Self {
            id,
            channel: RwLock::new(channel),
            bots: RwLock::new(Vec::new()),
            spam: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub async fn channel(&self) -> ChannelInfo {
        self.channel.read().await.clone()
    }

    pub async fn is_connected(&self, bot_username: &str) -> bool {
        self.bots
            .read()
            .await
            .iter()
            .any(|(name, _)| name == bot_username)
    }

    /// Connected bot usernames in registration order.
    pub async fn connected_bots(&self) -> Vec<String> {
        self.bots
            .read()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub async fn bot(&self, bot_username: &str) -> Option<Arc<Bot>> {
        self.bots
            .read()
            .await
            .iter()
            .find(|(name, _)| name == bot_username)
            .map(|(_, bot)| bot.clone())
    }

    /// Register an already-constructed bot. No-op if one with the same
    /// username is connected.
    pub async fn adopt(&self, bot: Arc<Bot>) {
        let mut bots = self.bots.write().await;
        if bots.iter().any(|(name, _)| name == bot.username()) {
            return;
        }
        bots.push((bot.username().to_string(), bot));
    }

    /// Connect one bot from the tenant's persisted credentials. Idempotent.
    ///
    /// # Errors
    ///
    /// `UnknownBot` if the configuration has no such credential set; transport
    /// construction errors pass through.
    pub async fn connect_bot(
        &self,
        bot_username: &str,
        tenant_config: &TenantConfig,
        clearance: ClearanceSource,
        base_url: &str,
    ) -> Result<()> {
        if self.is_connected(bot_username).await {
            return Ok(());
        }
        let credentials = tenant_config
            .credential(bot_username)
            .ok_or_else(|| Error::UnknownBot(bot_username.to_string()))?;
        let bot = Bot::connect(credentials, self.channel().await, clearance, base_url)?;
        self.adopt(Arc::new(bot)).await;
        Ok(())
    }

    /// Connect every credential set not already connected.
    ///
    /// # Errors
    ///
    /// Propagates the first transport construction failure.
    pub async fn connect_all(
        &self,
        tenant_config: &TenantConfig,
        clearance: ClearanceSource,
        base_url: &str,
    ) -> Result<()> {
        for credentials in &tenant_config.credentials {
            self.connect_bot(&credentials.username, tenant_config, clearance.clone(), base_url)
                .await?;
        }
        Ok(())
    }

    /// Drop one bot, closing its transport. No-op if not connected.
    pub async fn disconnect_bot(&self, bot_username: &str) {
        self.bots
            .write()
            .await
            .retain(|(name, _)| name != bot_username);
    }

    /// Drop every bot.
    pub async fn disconnect_all(&self) {
        self.bots.write().await.clear();
    }

    /// Send one message as a specific bot.
    ///
    /// # Errors
    ///
    /// `BotNotConnected` plus whatever the bot's send surfaces.
    pub async fn send(
        &self,
        bot_username: &str,
        message: &str,
        reply: Option<&ReplyMetadata>,
    ) -> Result<()> {
        let bot = self
            .bot(bot_username)
            .await
            .ok_or_else(|| Error::BotNotConnected(bot_username.to_string()))?;
        bot.send(message, reply, &CancellationToken::new()).await
    }

    /// Whether a spam run is currently active.
    pub async fn spam_started(&self) -> bool {
        self.spam
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| run.active.load(Ordering::SeqCst) > 0)
    }

    /// Launch a spam run.
    ///
    /// # Errors
    ///
    /// `SpamAlreadyRunning` while a run is active; no partial state change.
    pub async fn start_spam(
        self: &Arc<Self>,
        threads: usize,
        delay: Duration,
        messages: Vec<String>,
        mode: SpamMode,
    ) -> Result<()> {
        let mut slot = self.spam.lock().await;
        if slot
            .as_ref()
            .is_some_and(|run| run.active.load(Ordering::SeqCst) > 0)
        {
            return Err(Error::SpamAlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let messages = Arc::new(messages);

        match mode {
            SpamMode::Random => {
                for _ in 0..threads {
                    active.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(random_sender(
                        self.clone(),
                        delay,
                        messages.clone(),
                        cancel.clone(),
                        active.clone(),
                    ));
                }
            }
            SpamMode::List => {
                let bots: Vec<Arc<Bot>> = self
                    .bots
                    .read()
                    .await
                    .iter()
                    .take(threads)
                    .map(|(_, bot)| bot.clone())
                    .collect();
                active.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(list_sender(
                    self.id,
                    bots,
                    delay,
                    messages.as_ref().clone(),
                    cancel.clone(),
                    active.clone(),
                ));
            }
        }

        info!(tenant_id = self.id, threads, ?mode, "spam run started");
        *slot = Some(SpamRun { cancel, active });
        Ok(())
    }

    /// Cancel the active spam run and wait until every sender has exited.
    /// No-op while idle; safe to call from any task.
    pub async fn stop_spam(&self) {
        let active = {
            let slot = self.spam.lock().await;
            let Some(run) = slot.as_ref() else { return };
            run.cancel.cancel();
            run.active.clone()
        };

        while active.load(Ordering::SeqCst) > 0 {
            sleep(Duration::from_millis(config::SPAM_STOP_POLL_MS)).await;
        }

        let mut slot = self.spam.lock().await;
        if slot.as_ref().is_some_and(|run| run.cancel.is_cancelled()) {
            *slot = None;
        }
        info!(tenant_id = self.id, "spam run stopped");
    }

    /// Swap the target channel. Forces `stop_spam` and `disconnect_all` first
    /// so no bot is ever mid-operation against a stale channel.
    pub async fn change_channel(&self, new_channel: ChannelInfo) {
        self.stop_spam().await;
        self.disconnect_all().await;
        *self.channel.write().await = new_channel;
    }
}

async fn random_sender(
    pool: Arc<TenantPool>,
    delay: Duration,
    messages: Arc<Vec<String>>,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) {
    let _guard = SenderGuard(active);
    if messages.is_empty() {
        return;
    }

    while !cancel.is_cancelled() {
        let picked = {
            let bots = pool.bots.read().await;
            if bots.is_empty() {
                None
            } else {
                let mut rng = rand::thread_rng();
                let (_, bot) = &bots[rng.gen_range(0..bots.len())];
                Some(bot.clone())
            }
        };

        // An empty bot set pauses the sender rather than ending the run.
        let Some(bot) = picked else {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep(delay) => continue,
            }
        };

        let message = {
            let mut rng = rand::thread_rng();
            messages[rng.gen_range(0..messages.len())].clone()
        };

        match bot.send(&message, None, &cancel).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return,
            // Spam is best-effort; per-send failures are swallowed.
            Err(e) => debug!(tenant_id = pool.id, bot = bot.username(), error = %e, "spam send failed"),
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = sleep(delay) => {}
        }
    }
}

async fn list_sender(
    tenant_id: u64,
    bots: Vec<Arc<Bot>>,
    delay: Duration,
    mut messages: Vec<String>,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) {
    let _guard = SenderGuard(active);
    if bots.is_empty() {
        warn!(tenant_id, "list spam run started with no connected bots");
        return;
    }

    'run: while !cancel.is_cancelled() && !messages.is_empty() {
        for bot in &bots {
            let Some(message) = messages.first().cloned() else {
                break 'run;
            };

            match bot.send(&message, None, &cancel).await {
                Ok(()) => {
                    // Consumed exactly once, and only once actually sent.
                    messages.remove(0);
                }
                Err(Error::Cancelled) => return,
                Err(e) => {
                    debug!(tenant_id, bot = bot.username(), error = %e, "spam send failed");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep(delay) => {}
            }
        }
    }

    debug!(tenant_id, "list spam run exhausted its messages");
}
