//! Telegram delivery of composed messages.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::config::{NetworkConfig, TelegramConfig};
use crate::traits::Notifier;

/// Sends messages through the Telegram Bot API.
///
/// Delivery failures for individual chats are logged and skipped so one
/// unreachable chat never blocks the rest; they are transient by the
/// error taxonomy and the next event will try again.
#[derive(Clone, Debug)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(telegram: &TelegramConfig, network: &NetworkConfig) -> Result<Self> {
        if telegram.token.is_empty() {
            anyhow::bail!("telegram.token must be set");
        }
        if telegram.chat_ids.is_empty() {
            anyhow::bail!("telegram.chat_ids must not be empty");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network.request_timeout_secs))
            .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base: telegram.api_base.trim_end_matches('/').to_string(),
            token: telegram.token.clone(),
            chat_ids: telegram.chat_ids.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str, silent: bool) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);

        for chat_id in &self.chat_ids {
            let payload = serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "disable_notification": silent,
            });

            match self.client.post(&url).json(&payload).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(
                        "telegram rejected message for chat {}: {}",
                        chat_id,
                        response.status()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("failed to send message to chat {}: {}", chat_id, e);
                }
            }
        }

        Ok(())
    }
}
