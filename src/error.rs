//! Core error taxonomy.
//!
//! Bot-level transient errors are retried locally and collapse into boolean
//! outcomes for follow/unfollow; everything else is surfaced to the control
//! surface as a typed error with a human-readable message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The platform served a challenge/interstitial page instead of a real
    /// response. Retried with backoff inside the bot.
    #[error("platform returned a challenge page instead of a response")]
    TransientRejection,

    /// The credential set is no longer valid. Surfaced, never retried.
    #[error("session credentials are no longer valid")]
    AuthExpired,

    /// The platform rejected a message post. Surfaced, not retried by the bot.
    #[error("message send failed: {0}")]
    SendFailed(String),

    /// The operation observed a cooperative cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// A follow/unfollow item exhausted its attempts. The item is still
    /// removed from the queue; callers must re-submit.
    #[error("follow queue item for bot {bot} failed after {attempts} attempts")]
    QueueItemFailed { bot: String, attempts: usize },

    /// `start_spam` while a run is active. Rejected synchronously with no
    /// partial state change.
    #[error("a spam run is already active for this tenant")]
    SpamAlreadyRunning,

    #[error("bot {0} is not connected")]
    BotNotConnected(String),

    #[error("no credential set named {0} in the tenant configuration")]
    UnknownBot(String),

    #[error("bot {0} is already queued")]
    AlreadyQueued(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
