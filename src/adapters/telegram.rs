//! Telegram Bot API：操作者通知與 /search_start、/search_stop 指令

use crate::core::orchestrator::{Orchestrator, RunOutcome, StartOutcome};
use crate::domain::model::Event;
use crate::domain::ports::Notifier;
use crate::utils::delay::{sleep_or_cancel, CancelToken};
use crate::utils::error::{AcquireError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const LONG_POLL_SECONDS: u64 = 30;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl User {
    fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub struct TelegramClient {
    client: Client,
    endpoint: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, bot_token: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, response: reqwest::Response) -> Result<T> {
        let reply: ApiReply<T> = response.json().await?;
        if !reply.ok {
            return Err(AcquireError::NotificationError {
                message: format!(
                    "{} rejected: {}",
                    method,
                    reply.description.unwrap_or_else(|| "no description".to_string())
                ),
            });
        }
        reply.result.ok_or_else(|| AcquireError::NotificationError {
            message: format!("{} returned no result", method),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    /// HTML 訊息，可附一個帶連結的 inline 按鈕
    pub async fn send_message(&self, chat_id: i64, html: &str, button: Option<(&str, &str)>) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": html,
            "parse_mode": "HTML",
        });
        if let Some((label, link)) = button {
            body["reply_markup"] = json!({
                "inline_keyboard": [[{ "text": label, "url": link }]]
            });
        }

        let response = self.client.post(self.url("sendMessage")).json(&body).send().await?;
        self.call::<Value>("sendMessage", response).await?;
        Ok(())
    }

    pub async fn send_document(&self, chat_id: i64, bytes: Vec<u8>, filename: &str, caption: &str) -> Result<()> {
        let document = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", document);

        let response = self
            .client
            .post(self.url("sendDocument"))
            .multipart(form)
            .send()
            .await?;
        self.call::<Value>("sendDocument", response).await?;
        Ok(())
    }

    pub async fn get_updates(&self, offset: Option<i64>, timeout_seconds: u64) -> Result<Vec<Update>> {
        let mut body = json!({
            "timeout": timeout_seconds,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }

        let response = self
            .client
            .post(self.url("getUpdates"))
            .timeout(Duration::from_secs(timeout_seconds + 10))
            .json(&body)
            .send()
            .await?;
        self.call("getUpdates", response).await
    }
}

/// 把事件轉成固定聊天室的訊息；送不出去只記 log
pub struct TelegramNotifier {
    client: Arc<TelegramClient>,
    chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(client: Arc<TelegramClient>, chat_id: i64) -> Self {
        Self { client, chat_id }
    }

    async fn deliver(&self, event: Event) -> Result<()> {
        match event {
            Event::AwaitingApproval { link } => {
                self.client
                    .send_message(
                        self.chat_id,
                        "<b>Важливо:</b> підтвердіть вхід протягом 5-10 хвилин, натиснувши кнопку нижче.",
                        Some(("Авторизуватись", &link)),
                    )
                    .await
            }
            Event::AuthSucceeded => {
                self.client
                    .send_message(
                        self.chat_id,
                        "<b>Оновлення:</b> вхід до електронної черги виконано.",
                        None,
                    )
                    .await
            }
            Event::ReservationStarted { slot } => {
                self.client
                    .send_message(
                        self.chat_id,
                        &format!(
                            "<b>Оновлення:</b> знайдено талон на <b>{} {}</b>. Бронюю...",
                            slot.date, slot.time
                        ),
                        None,
                    )
                    .await
            }
            Event::ReservationApproved { slot } => {
                self.client
                    .send_message(
                        self.chat_id,
                        &format!(
                            "<b>Оновлення:</b> талон на <b>{} {}</b> заброньовано. Щасти на іспиті!",
                            slot.date, slot.time
                        ),
                        None,
                    )
                    .await
            }
            Event::ArtifactAvailable { bytes, filename } => {
                self.client
                    .send_document(self.chat_id, bytes, &filename, "Талон у вигляді файлу")
                    .await
            }
            Event::Error { message } => {
                self.client
                    .send_message(
                        self.chat_id,
                        &format!("<b>Помилка:</b> {}", escape_html(&message)),
                        None,
                    )
                    .await
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn emit(&self, event: Event) {
        let kind = event.kind();
        match self.deliver(event).await {
            Ok(()) => tracing::debug!("Delivered '{}' notification", kind),
            Err(e) => tracing::error!("❌ Failed to deliver '{}' notification: {}", kind, e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SearchStart,
    SearchStop,
}

/// `/search_start@my_bot extra` 也算 `/search_start`
pub fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = first.split('@').next().unwrap_or(first);
    match name {
        "/search_start" => Some(Command::SearchStart),
        "/search_stop" => Some(Command::SearchStop),
        _ => None,
    }
}

/// 長輪詢 getUpdates，依白名單處理搜尋指令
pub struct CommandListener {
    client: Arc<TelegramClient>,
    orchestrator: Arc<Orchestrator>,
    allow_list: Vec<i64>,
    poll_timeout_seconds: u64,
}

impl CommandListener {
    pub fn new(client: Arc<TelegramClient>, orchestrator: Arc<Orchestrator>, allow_list: Vec<i64>) -> Self {
        Self {
            client,
            orchestrator,
            allow_list,
            poll_timeout_seconds: LONG_POLL_SECONDS,
        }
    }

    pub fn with_poll_timeout(mut self, seconds: u64) -> Self {
        self.poll_timeout_seconds = seconds;
        self
    }

    pub async fn run(&self, shutdown: &CancelToken) -> Result<()> {
        tracing::info!("🤖 Listening for operator commands...");
        let mut offset = None;

        loop {
            let updates = tokio::select! {
                _ = shutdown.cancelled() => break,
                updates = self.client.get_updates(offset, self.poll_timeout_seconds) => updates,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.handle(&message).await;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to fetch operator commands: {}. Retrying...", e);
                    if sleep_or_cancel(RECONNECT_DELAY, shutdown).await.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Command listener stopped");
        Ok(())
    }

    pub async fn handle(&self, message: &Message) {
        let Some(command) = message.text.as_deref().and_then(parse_command) else {
            return;
        };
        let chat_id = message.chat.id;
        let sender = message
            .from
            .as_ref()
            .map(User::full_name)
            .unwrap_or_else(|| "unknown".to_string());
        tracing::info!("Received {:?} from '{}' with chat id '{}'", command, sender, chat_id);

        if !self.allow_list.contains(&chat_id) {
            tracing::warn!("'{}' is trying to interact with the bot without permissions", sender);
            self.reply(chat_id, "⛔ У вас немає прав на цю команду. Зверніться до адміністратора бота.")
                .await;
            return;
        }

        match command {
            Command::SearchStart => match self.orchestrator.start() {
                StartOutcome::Started(handle) => {
                    self.reply(chat_id, "🔛 Запускаю пошук талонів в електронній черзі...")
                        .await;
                    tokio::spawn(async move {
                        let id = handle.id();
                        match handle.wait().await {
                            RunOutcome::Reserved(slot) => tracing::info!("Search #{} reserved {}", id, slot),
                            RunOutcome::Cancelled => tracing::info!("Search #{} cancelled", id),
                            RunOutcome::Failed(reason) => tracing::error!("Search #{} failed: {}", id, reason),
                        }
                    });
                }
                StartOutcome::AlreadyRunning => {
                    self.reply(chat_id, "Пошук вже запущено.").await;
                }
            },
            Command::SearchStop => {
                self.orchestrator.stop();
                self.reply(chat_id, "Пошук зупинено.").await;
            }
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.client.send_message(chat_id, text, None).await {
            tracing::error!("Cannot reply to chat {}: {}", chat_id, e);
        }
    }
}
