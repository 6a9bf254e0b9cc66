//! Chat notifications (Telegram bot API).

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;

use crate::resolve::{BuildConfig, DerivedLayout};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad recipient or message format")]
    Rejected,

    #[error("bot token rejected")]
    Unauthorized,

    #[error("notification API returned {0}")]
    Status(u16),
}

/// Sends a message to the configured chat.
pub trait Notifier: Send + Sync {
    fn send(&self, text: &str) -> Result<(), NotifyError>;
}

pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl Notifier for TelegramNotifier {
    fn send(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let response = self
            .client
            .post(url)
            .form(&[
                ("chat_id", self.chat_id.as_str()),
                ("text", text),
                ("parse_mode", "Markdown"),
                ("disable_web_page_preview", "true"),
            ])
            .send()?;

        match response.status().as_u16() {
            200 => {
                debug!(chat = %self.chat_id, "notification sent");
                Ok(())
            }
            400 => Err(NotifyError::Rejected),
            401 => Err(NotifyError::Unauthorized),
            other => Err(NotifyError::Status(other)),
        }
    }
}

/// Message announcing an uploaded build.
pub fn success_message(config: &BuildConfig, layout: &DerivedLayout, sha256: &str, link: &str) -> String {
    let mut text = format!(
        "*Stormguard* build uploaded\n\
         Device: `{}` ({})\n\
         Version: `{}`\n\
         Compiler: `{}`\n\
         File: `{}`\n\
         SHA-256: `{}`\n",
        config.device, config.variant, layout.version_name, config.compiler, layout.archive_name, sha256
    );
    if config.flags.overclock {
        text.push_str("Overclock: `on`\n");
    }
    if config.flags.cpuquiet {
        text.push_str("CPUQuiet: `on`\n");
    }
    text.push_str(&format!("[Download]({link})"));
    text
}

/// Message reporting a failed run, as a preformatted block.
pub fn failure_message(command_line: &str, error: &str) -> String {
    format!(
        "```\nAn error was detected while running the following command:\n\n\
         {command_line}\n\nThe error was:\n\n{error}\n```"
    )
}
