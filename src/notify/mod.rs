//! Best-effort notification sink.
//!
//! Notifications report admission decisions and creation outcomes to an
//! operator channel. Delivery is fire-and-forget: messages are dispatched on a
//! spawned task and failures are logged and swallowed, so the sink can never
//! delay or alter a response.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, warn};

/// Delivery abstraction; the default local sink just logs.
pub trait NotificationSink: Send + Sync {
    fn send<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Local dev sink that logs the message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!(message, "notification sink stub");
            Ok(())
        })
    }
}

/// Telegram Bot API sink.
pub struct TelegramSink {
    client: reqwest::Client,
    bot_token: SecretString,
    chat_id: String,
}

impl TelegramSink {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(bot_token: SecretString, chat_id: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            bot_token,
            chat_id,
        })
    }

    async fn deliver(&self, message: &str) -> anyhow::Result<()> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_token.expose_secret()
        );
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": message,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("telegram API error {status}: {body}");
        }
        Ok(())
    }
}

impl NotificationSink for TelegramSink {
    fn send<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(self.deliver(message))
    }
}

/// Dispatch a message off the critical path; failures are logged, never
/// surfaced.
pub fn dispatch(sink: &Arc<dyn NotificationSink>, message: String) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(err) = sink.send(&message).await {
            warn!(error = %err, "notification delivery failed");
        }
    });
}

fn human_time(at_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(i64::try_from(at_ms).unwrap_or(0))
        .map_or_else(|| at_ms.to_string(), |dt| dt.to_rfc3339())
}

#[must_use]
pub fn blocked_message(identity: &str, reason: &str, lifts_at_ms: Option<u64>) -> String {
    let mut message = format!(
        "<b>Request blocked</b>\nclient: <code>{identity}</code>\nreason: {reason}"
    );
    if let Some(at_ms) = lifts_at_ms {
        message.push_str(&format!("\nlifts at: {}", human_time(at_ms)));
    }
    message
}

#[must_use]
pub fn invalid_input_message(identity: &str, detail: &str) -> String {
    format!("<b>Invalid request</b>\nclient: <code>{identity}</code>\ndetail: {detail}")
}

#[must_use]
pub fn created_message(
    identity: &str,
    username: &str,
    role: &str,
    expires_at_ms: u64,
    cooldown_until_ms: u64,
) -> String {
    format!(
        "<b>Account created</b>\nclient: <code>{identity}</code>\nusername: <code>{username}</code>\nrole: {role}\nexpires: {}\ncooldown until: {}",
        human_time(expires_at_ms),
        human_time(cooldown_until_ms)
    )
}

#[must_use]
pub fn creation_failed_message(identity: &str, username: &str, error: &str) -> String {
    format!(
        "<b>Account creation failed</b>\nclient: <code>{identity}</code>\nusername: <code>{username}</code>\nerror: {error}"
    )
}
