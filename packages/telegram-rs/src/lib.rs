// https://core.telegram.org/bots/api#sendmessage

pub mod models;
use reqwest::Client;

use crate::models::{
    BotUser, ConnectionTest, GetMeResponse, SendMessageRequest, SendMessageResponse, SentMessage,
};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct TelegramOptions {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct TelegramService {
    options: TelegramOptions,
    client: Client,
    api_base: String,
}

impl TelegramService {
    pub fn new(options: TelegramOptions) -> Self {
        Self {
            options,
            client: Client::new(),
            api_base: API_BASE.to_string(),
        }
    }

    /// Point the client at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn chat_id(&self) -> &str {
        &self.options.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{base}/bot{token}/{method}",
            base = self.api_base,
            token = self.options.bot_token,
            method = method
        )
    }

    /// Send a Markdown-formatted message to the configured chat.
    pub async fn send_markdown(&self, text: &str) -> Result<SentMessage, &'static str> {
        self.send(text, Some("Markdown")).await
    }

    /// Send a plain-text message to the configured chat.
    pub async fn send_text(&self, text: &str) -> Result<SentMessage, &'static str> {
        self.send(text, None).await
    }

    async fn send(&self, text: &str, parse_mode: Option<&str>) -> Result<SentMessage, &'static str> {
        let body = SendMessageRequest {
            chat_id: &self.options.chat_id,
            text,
            parse_mode,
            disable_web_page_preview: true,
        };

        let res = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await;

        match res {
            Ok(response) => {
                let status = response.status();
                let data = response.json::<SendMessageResponse>().await;
                match data {
                    Ok(result) if result.ok => result.result.ok_or("Telegram returned no message"),
                    Ok(result) => {
                        eprintln!(
                            "Telegram error ({}): {}",
                            status,
                            result.description.unwrap_or_default()
                        );
                        Err("Telegram returned an error")
                    }
                    Err(e) => {
                        eprintln!("Failed to parse Telegram response: {}", e);
                        Err("Error parsing Telegram response")
                    }
                }
            }
            Err(e) => {
                eprintln!("Request to Telegram failed: {}", e);
                Err("Error sending Telegram message")
            }
        }
    }

    /// The bot behind the token.
    pub async fn get_me(&self) -> Result<BotUser, &'static str> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| {
                eprintln!("Request to Telegram failed: {}", e);
                "Error reaching Telegram"
            })?;

        match response.json::<GetMeResponse>().await {
            Ok(data) if data.ok => data.result.ok_or("Telegram returned no bot"),
            Ok(data) => {
                eprintln!("Telegram getMe error: {}", data.description.unwrap_or_default());
                Err("Telegram rejected the bot token")
            }
            Err(e) => {
                eprintln!("Failed to parse Telegram response: {}", e);
                Err("Error parsing Telegram response")
            }
        }
    }

    /// Check the token with `getMe`, then send a test message to the chat.
    /// Never fails: the outcome is reported in the returned value.
    pub async fn test_connection(&self) -> ConnectionTest {
        let bot = match self.get_me().await {
            Ok(bot) => bot,
            Err(e) => {
                return ConnectionTest {
                    success: false,
                    message: format!("Connection failed: {}", e),
                }
            }
        };

        let greeting = "✅ Telegram bot connection successful!\n\nYour bot is ready to send alerts.";
        match self.send_text(greeting).await {
            Ok(_) => ConnectionTest {
                success: true,
                message: format!(
                    "Connection successful! Bot @{} can post to chat {}",
                    bot.username.as_deref().unwrap_or(&bot.first_name),
                    self.options.chat_id
                ),
            },
            Err(e) => ConnectionTest {
                success: false,
                message: format!("Connection failed: {}", e),
            },
        }
    }
}
