//! One proxied bot identity.
//!
//! A bot binds a credential set to its tenant's target channel and an
//! isolated transport. Follow/unfollow are idempotent and collapse transient
//! platform rejections into a boolean outcome; send surfaces its errors.

use crate::clearance::{Clearance, ClearanceState, Solver};
use crate::config;
use crate::error::{Error, Result};
use crate::platform::{HttpPlatform, PlatformClient};
use crate::types::{ChannelInfo, CredentialSet, ReplyMetadata};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where a bot obtains its clearance for state-changing calls.
///
/// The shared variant reads the process-wide value maintained by the
/// background service; the per-call variant runs the solver itself on every
/// attempt. One configurable component instead of parallel bot flavors.
#[derive(Clone)]
pub enum ClearanceSource {
    Shared(Arc<ClearanceState>),
    PerCall {
        solver: Arc<dyn Solver>,
        user_agent: String,
    },
}

impl ClearanceSource {
    async fn clearance(&self) -> Result<Clearance> {
        match self {
            Self::Shared(state) => state.current().ok_or(Error::TransientRejection),
            Self::PerCall { solver, .. } => {
                let solution = solver.acquire().await.map_err(|e| {
                    debug!(error = %e, "per-call clearance solve failed");
                    Error::TransientRejection
                })?;
                Ok(Clearance {
                    token: solution.token,
                    user_agent: solution.user_agent,
                    acquired_at: Instant::now(),
                })
            }
        }
    }

    fn user_agent(&self) -> String {
        match self {
            Self::Shared(state) => state.user_agent(),
            Self::PerCall { user_agent, .. } => user_agent.clone(),
        }
    }
}

pub struct Bot {
    username: String,
    channel: ChannelInfo,
    clearance: ClearanceSource,
    platform: Arc<dyn PlatformClient>,
}

impl Bot {
    /// Connect a bot over its own proxy-pinned HTTP transport.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot be built from the proxy descriptor.
    pub fn connect(
        credentials: &CredentialSet,
        channel: ChannelInfo,
        clearance: ClearanceSource,
        base_url: &str,
    ) -> Result<Self> {
        let platform = Arc::new(HttpPlatform::new(credentials, base_url)?);
        Ok(Self::with_platform(
            credentials.username.clone(),
            channel,
            clearance,
            platform,
        ))
    }

    /// Construct a bot over an arbitrary transport implementation.
    #[must_use]
    pub fn with_platform(
        username: String,
        channel: ChannelInfo,
        clearance: ClearanceSource,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            username,
            channel,
            clearance,
            platform,
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    /// Post a chat message as this identity.
    ///
    /// # Errors
    ///
    /// `SendFailed` when the platform rejects the message, `Cancelled` when
    /// the cooperative cancellation signal fires first.
    pub async fn send(
        &self,
        message: &str,
        reply: Option<&ReplyMetadata>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let user_agent = self.clearance.user_agent();
        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self
                .platform
                .send_message(&self.channel, message, reply, &user_agent) => result,
        }
    }

    /// Follow the tenant's channel. Idempotent; never returns an error.
    pub async fn follow(&self) -> bool {
        self.set_followed(true).await
    }

    /// Unfollow the tenant's channel. Idempotent; never returns an error.
    pub async fn unfollow(&self) -> bool {
        self.set_followed(false).await
    }

    async fn set_followed(&self, desired: bool) -> bool {
        match self.is_followed().await {
            Ok(state) if state == desired => return true,
            Ok(_) => {}
            Err(Error::AuthExpired) => {
                warn!(bot = %self.username, "follow state check rejected credentials");
                return false;
            }
            Err(e) => debug!(bot = %self.username, error = %e, "initial follow state unknown"),
        }

        for attempt in 1..=config::FOLLOW_ATTEMPTS {
            let outcome = async {
                let clearance = self.clearance.clearance().await?;
                if desired {
                    self.platform.follow(&self.channel, &clearance).await
                } else {
                    self.platform.unfollow(&self.channel, &clearance).await
                }
            }
            .await;

            match outcome {
                Ok(()) => {
                    if matches!(self.is_followed().await, Ok(state) if state == desired) {
                        return true;
                    }
                }
                Err(Error::TransientRejection) => {
                    debug!(bot = %self.username, attempt, "challenge page during follow toggle");
                }
                Err(e) => {
                    warn!(bot = %self.username, error = %e, "follow toggle failed");
                    return false;
                }
            }

            sleep(Duration::from_millis(config::FOLLOW_RETRY_DELAY_MS)).await;
        }

        false
    }

    /// Query the current relationship state, retrying past interstitial
    /// responses.
    ///
    /// # Errors
    ///
    /// `TransientRejection` when every attempt hit a challenge page,
    /// `AuthExpired` when the credentials were rejected.
    pub async fn is_followed(&self) -> Result<bool> {
        for _ in 0..config::FOLLOW_ATTEMPTS {
            let clearance = self.clearance.clearance().await?;
            match self.platform.is_following(&self.channel, &clearance).await {
                Ok(state) => return Ok(state),
                Err(Error::TransientRejection) => {
                    sleep(Duration::from_millis(config::FOLLOW_RETRY_DELAY_MS)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::TransientRejection)
    }
}
