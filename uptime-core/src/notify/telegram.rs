use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::NotificationMessage;
use super::channel::{Notifier, NotifyError, expect_success};

pub struct TelegramNotifier {
    api_base: String,
    bot_token: String,
    chat_id: String,
    client: Client,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramNotifier {
    pub fn new(client: Client, api_base: &str, bot_token: String, chat_id: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
            client,
        }
    }
}

/// Escapes text for Telegram MarkdownV2.
fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                | '{' | '}' | '.' | '!' | '\\'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let subject = escape_markdown_v2(&message.subject());
        let body = escape_markdown_v2(&message.summary());
        let text = format!("*{subject}*\n\n{body}");

        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: "MarkdownV2",
        };
        expect_success(self.name(), self.client.post(url).json(&payload)).await
    }
}
