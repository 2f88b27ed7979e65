//! Share links for delivered files.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ShortenerConfig;

/// Response fields that carry the short link, in lookup order.
const SHORT_LINK_KEYS: [&str; 5] = ["short", "shortenedUrl", "short_url", "result", "url"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

/// Public link to a message of the bot's chat with a user.
#[must_use]
pub fn share_link(bot_username: &str, message_id: i32) -> String {
    format!("https://t.me/{}/{message_id}", bot_username.trim_start_matches('@'))
}

/// Client for a `?api=<key>&url=<link>` style link shortener.
#[derive(Debug, Clone)]
pub struct Shortener {
    client: reqwest::Client,
    config: ShortenerConfig,
}

impl Shortener {
    pub fn new(config: ShortenerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    /// Shortens `long_url`, returning it unchanged on any failure.
    pub async fn shorten(&self, long_url: &str) -> String {
        match self.request(long_url).await {
            Ok(Some(short)) => short,
            Ok(None) => {
                debug!("Shortener response had no link, using {}", long_url);
                long_url.to_owned()
            }
            Err(e) => {
                warn!("Link shortener failed: {}", e);
                long_url.to_owned()
            }
        }
    }

    async fn request(&self, long_url: &str) -> Result<Option<String>, reqwest::Error> {
        let body: Value = self
            .client
            .get(&self.config.url)
            .query(&[("api", self.config.api_key.as_str()), ("url", long_url)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(extract_short_link(&body))
    }
}

/// Picks the short link out of a shortener response.
#[must_use]
pub fn extract_short_link(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => SHORT_LINK_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            }),
        Value::String(s) if s.starts_with("http") => Some(s.clone()),
        _ => None,
    }
}
