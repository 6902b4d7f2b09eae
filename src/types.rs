//! Domain data model shared across the crate.

use serde::{Deserialize, Serialize};

/// Egress route kind for a bot's proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks5,
}

/// Proxy descriptor owned by a credential set. Translated into a
/// transport-level proxy configuration when the bot is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL in the form `scheme://host:port`.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// One bot identity: four opaque session secrets, a display name and the
/// proxy route its traffic is pinned to. Immutable once a bot is built from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSet {
    pub username: String,
    /// Platform session cookie value.
    pub session_token: String,
    /// Name of the per-account auth cookie.
    pub auth_cookie_name: String,
    /// Value of the per-account auth cookie.
    pub auth_cookie_value: String,
    /// XSRF token, stored url-encoded the way the platform hands it out.
    pub xsrf_token: String,
    pub proxy: ProxyConfig,
}

/// Target channel a tenant's bots operate against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub username: String,
    pub chatroom_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamMode {
    /// Independent senders, each picking a random bot and a random message.
    Random,
    /// One runner walking bots in registration order, consuming the message
    /// list strictly in order.
    List,
}

/// Saved spam campaign parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamTemplate {
    pub title: String,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    pub messages: Vec<String>,
    pub mode: SpamMode,
}

const fn default_threads() -> usize {
    1
}

const fn default_delay_secs() -> u64 {
    1
}

/// Persisted per-tenant configuration, loaded lazily by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: u64,
    pub credentials: Vec<CredentialSet>,
    pub channel: ChannelInfo,
    #[serde(default)]
    pub spam_templates: Vec<SpamTemplate>,
}

impl TenantConfig {
    /// Look up a credential set by bot username.
    #[must_use]
    pub fn credential(&self, username: &str) -> Option<&CredentialSet> {
        self.credentials.iter().find(|c| c.username == username)
    }
}

/// Metadata attached to a templated reply send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyMetadata {
    pub original_message: OriginalMessage,
    pub original_sender: OriginalSender,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalMessage {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalSender {
    pub id: u64,
    pub username: String,
}

/// Category of an audit-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Action,
    Auth,
    System,
}
