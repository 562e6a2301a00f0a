//! Bot API client - `getUpdates` long-poll feed and `sendMessage`

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::ChatId;
use crate::transport::{OutboundMessage, Transport, Update};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// HTTP transport for a single bot token
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<Value>,
}

impl TelegramClient {
    pub fn new(config: &Config) -> Result<Self> {
        let token = config.require_token()?;
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }
}

/// Reply keyboard offered on `/start`
pub fn command_keyboard() -> Value {
    json!({
        "keyboard": [
            [{"text": "/add"}, {"text": "/list"}],
            [{"text": "/remove 1"}, {"text": "/clear"}],
            [{"text": "/status_list"}, {"text": "/help"}]
        ],
        "resize_keyboard": true,
        "one_time_keyboard": false
    })
}

#[async_trait::async_trait]
impl Transport for TelegramClient {
    async fn pull_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(self.url("getUpdates"))
            .query(&[("offset", offset)])
            .send()
            .await?;

        let status = response.status();
        let body: UpdatesResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("getUpdates {}: {}", status, e)))?;

        if !body.ok {
            warn!(
                status = %status,
                "getUpdates not ok: {}",
                body.description.as_deref().unwrap_or("no description")
            );
            return Ok(Vec::new());
        }

        debug!(offset, count = body.result.len(), "Pulled updates");
        Ok(body.result)
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: message.chat_id,
            text: &message.text,
            reply_markup: message.keyboard.then(command_keyboard),
        };

        let response = self
            .client
            .post(self.url("sendMessage"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("sendMessage {}: {}", status, body)));
        }
        Ok(())
    }
}
