//! Minimal Bot API client for outgoing messages.

use serde_json::json;

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    send_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            send_url: format!("https://api.telegram.org/bot{}/sendMessage", bot_token),
        }
    }

    /// Sends HTML-formatted `text` to `chat_id`.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), reqwest::Error> {
        self.http
            .post(&self.send_url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML"
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Escapes text for messages sent with `parse_mode: HTML`.
pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
