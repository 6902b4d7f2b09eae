//! Configuration and settings management
//!
//! Loads settings from environment variables and config files and defines
//! the fixed concurrency/retry knobs the runtime components use.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application settings loaded from environment variables and config files.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Base URL of the target platform.
    #[serde(default = "default_platform_base_url")]
    pub platform_base_url: String,

    /// Base URL of the external challenge-solving API.
    pub solver_url: Option<String>,

    /// API key for the solving API, if it requires one.
    pub solver_api_key: Option<String>,

    /// Number of follow-queue polling workers.
    #[serde(default = "default_follow_workers")]
    pub follow_workers: usize,

    /// User agent presented before the first clearance has been acquired.
    #[serde(default = "default_user_agent")]
    pub bootstrap_user_agent: String,
}

fn default_platform_base_url() -> String {
    "https://kick.com".to_string()
}

const fn default_follow_workers() -> usize {
    2
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of APP)
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Also add settings from environment variables directly (without prefix)
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }
}

// Clearance refresh loop
/// Interval between staleness checks of the shared clearance.
pub const CLEARANCE_TICK_SECS: u64 = 3;
/// Age after which the shared clearance is considered expired.
pub const CLEARANCE_TTL_SECS: u64 = 25 * 60;
/// Poll interval while waiting for a solving-API task to complete.
pub const SOLVER_POLL_MS: u64 = 1000;
/// Give up on a solving-API task after this many polls.
pub const SOLVER_POLL_LIMIT: usize = 300;

// Bot retry policy
/// Transport-level attempts for a single message send.
pub const SEND_TRANSPORT_ATTEMPTS: usize = 8;
/// Delay between transport-level send attempts.
pub const SEND_RETRY_DELAY_MS: u64 = 500;
/// Attempts for a follow/unfollow state change (and for the state re-check).
pub const FOLLOW_ATTEMPTS: usize = 3;
/// Backoff after a challenge page is served mid follow/unfollow.
pub const FOLLOW_RETRY_DELAY_MS: u64 = 1000;

// Queue and spam scheduling
/// Sleep between follow-queue polls when no item is eligible.
pub const QUEUE_POLL_MS: u64 = 1000;
/// Poll interval while `stop_spam` waits for senders to exit.
pub const SPAM_STOP_POLL_MS: u64 = 200;
