//! Wire transport seam.
//!
//! `PlatformClient` is the boundary between bot logic and the platform's HTTP
//! surface; `HttpPlatform` is the production implementation, one instance per
//! bot with its own proxy-pinned client so identities never share a transport
//! or a cookie jar.

use crate::clearance::Clearance;
use crate::config;
use crate::error::{Error, Result};
use crate::types::{ChannelInfo, CredentialSet, ProxyConfig, ProxyKind, ReplyMetadata};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, REFERER, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

/// Marker text of the platform's challenge interstitial page.
const INTERSTITIAL_MARKER: &str = "Just a moment";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Platform operations a bot performs. Mock implementations back the tests.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Post a chat message to the channel's chatroom.
    async fn send_message(
        &self,
        channel: &ChannelInfo,
        message: &str,
        reply: Option<&ReplyMetadata>,
        user_agent: &str,
    ) -> Result<()>;

    /// Issue the follow state-change request.
    async fn follow(&self, channel: &ChannelInfo, clearance: &Clearance) -> Result<()>;

    /// Issue the unfollow state-change request.
    async fn unfollow(&self, channel: &ChannelInfo, clearance: &Clearance) -> Result<()>;

    /// Query the current relationship state. Ground truth after every
    /// follow/unfollow attempt.
    async fn is_following(&self, channel: &ChannelInfo, clearance: &Clearance) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    status: SendStatus,
}

#[derive(Debug, Deserialize)]
struct SendStatus {
    error: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelationshipResponse {
    is_following: bool,
}

/// HTTP implementation speaking the platform's v2 API.
pub struct HttpPlatform {
    client: reqwest::Client,
    base_url: String,
    session_cookie: String,
    xsrf_token: String,
}

impl HttpPlatform {
    /// Build the isolated, proxy-pinned transport for one credential set.
    ///
    /// # Errors
    ///
    /// Fails if the proxy descriptor or client configuration is rejected.
    pub fn new(credentials: &CredentialSet, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .proxy(build_proxy(&credentials.proxy)?)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_cookie: format!(
                "kick_session={}; {}={}",
                credentials.session_token,
                credentials.auth_cookie_name,
                credentials.auth_cookie_value
            ),
            xsrf_token: percent_decode(&credentials.xsrf_token),
        })
    }

    fn headers(&self, user_agent: &str, clearance_token: Option<&str>) -> Result<HeaderMap> {
        let cookie = clearance_token.map_or_else(
            || self.session_cookie.clone(),
            |token| format!("{}; cf_clearance={token}", self.session_cookie),
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-xsrf-token", header_value(&self.xsrf_token)?);
        headers.insert(COOKIE, header_value(&cookie)?);
        headers.insert(REFERER, header_value(&self.base_url)?);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(USER_AGENT, header_value(user_agent)?);
        Ok(headers)
    }

    async fn try_send(
        &self,
        chatroom_id: u64,
        message: &str,
        reply: Option<&ReplyMetadata>,
        user_agent: &str,
    ) -> Result<()> {
        let body = reply.map_or_else(
            || json!({ "content": message, "type": "message" }),
            |meta| {
                json!({
                    "content": message,
                    "type": "reply",
                    "metadata": {
                        "original_message": {
                            "id": meta.original_message.id,
                            "content": meta.original_message.content,
                        },
                        "original_sender": {
                            "id": meta.original_sender.id,
                            "username": meta.original_sender.username,
                        },
                    },
                })
            },
        );

        let response = self
            .client
            .post(format!(
                "{}/api/v2/messages/send/{chatroom_id}",
                self.base_url
            ))
            .headers(self.headers(user_agent, None)?)
            .json(&body)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(Error::AuthExpired);
        }

        let parsed: SendResponse = response.json().await?;
        if parsed.status.error {
            return Err(Error::SendFailed(
                parsed
                    .status
                    .message
                    .unwrap_or_else(|| "unspecified platform error".to_string()),
            ));
        }
        Ok(())
    }

    async fn toggle_follow(
        &self,
        channel: &ChannelInfo,
        clearance: &Clearance,
        following: bool,
    ) -> Result<()> {
        let url = format!("{}/api/v2/channels/{}/follow", self.base_url, channel.username);
        let request = if following {
            self.client.post(url)
        } else {
            self.client.delete(url)
        };
        let response = request
            .headers(self.headers(&clearance.user_agent, Some(&clearance.token))?)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(Error::AuthExpired);
        }

        let text = response.text().await?;
        if text.contains(INTERSTITIAL_MARKER) {
            return Err(Error::TransientRejection);
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for HttpPlatform {
    async fn send_message(
        &self,
        channel: &ChannelInfo,
        message: &str,
        reply: Option<&ReplyMetadata>,
        user_agent: &str,
    ) -> Result<()> {
        let chatroom_id = channel
            .chatroom_id
            .ok_or_else(|| Error::SendFailed("channel has no chatroom id".to_string()))?;

        // The transport absorbs network-level flakiness itself; platform
        // rejections (error status, expired auth) pass straight through.
        let strategy = FixedInterval::from_millis(config::SEND_RETRY_DELAY_MS)
            .take(config::SEND_TRANSPORT_ATTEMPTS - 1);
        RetryIf::start(
            strategy,
            || self.try_send(chatroom_id, message, reply, user_agent),
            |e: &Error| matches!(e, Error::Transport(_)),
        )
        .await
    }

    async fn follow(&self, channel: &ChannelInfo, clearance: &Clearance) -> Result<()> {
        self.toggle_follow(channel, clearance, true).await
    }

    async fn unfollow(&self, channel: &ChannelInfo, clearance: &Clearance) -> Result<()> {
        self.toggle_follow(channel, clearance, false).await
    }

    async fn is_following(&self, channel: &ChannelInfo, clearance: &Clearance) -> Result<bool> {
        let response = self
            .client
            .get(format!(
                "{}/api/v2/channels/{}/me",
                self.base_url, channel.username
            ))
            .headers(self.headers(&clearance.user_agent, Some(&clearance.token))?)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(Error::AuthExpired);
        }

        let text = response.text().await?;
        if text.contains(INTERSTITIAL_MARKER) {
            return Err(Error::TransientRejection);
        }
        let parsed: RelationshipResponse =
            serde_json::from_str(&text).map_err(|_| Error::TransientRejection)?;
        Ok(parsed.is_following)
    }
}

// Header material comes from the credential set; bytes a header cannot carry
// mean the stored secrets are unusable.
fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::AuthExpired)
}

fn build_proxy(proxy: &ProxyConfig) -> Result<reqwest::Proxy> {
    // Socks proxies carry credentials in the URL; http proxies use basic auth.
    match (&proxy.username, &proxy.password, proxy.kind) {
        (Some(user), Some(pass), ProxyKind::Socks5) => Ok(reqwest::Proxy::all(format!(
            "socks5://{user}:{pass}@{}:{}",
            proxy.host, proxy.port
        ))?),
        (Some(user), Some(pass), ProxyKind::Http) => {
            Ok(reqwest::Proxy::all(proxy.url())?.basic_auth(user, pass))
        }
        _ => Ok(reqwest::Proxy::all(proxy.url())?),
    }
}

/// Decode a percent-encoded string (the XSRF token is stored the way the
/// platform sets its cookie, urlencoded).
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // The escape is decoded at the byte level; a `%` followed by
            // anything but two hex digits passes through literally.
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
