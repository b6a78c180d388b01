use chrono::NaiveDate;
use httpmock::prelude::*;
use serde_json::json;
use slot_acquirer::adapters::captcha::RecaptchaSolver;
use slot_acquirer::adapters::telegram::{CommandListener, Message, TelegramClient, TelegramNotifier};
use slot_acquirer::adapters::webdriver::WebDriverActuator;
use slot_acquirer::domain::model::{Event, Slot};
use slot_acquirer::domain::ports::{Notifier, SystemClock};
use slot_acquirer::utils::error::AcquireError;
use slot_acquirer::{AppConfig, Orchestrator};
use std::sync::Arc;

const TOKEN: &str = "123:abc";

fn client(server: &MockServer) -> Arc<TelegramClient> {
    Arc::new(TelegramClient::new(&server.base_url(), TOKEN))
}

fn slot() -> Slot {
    Slot::new(500, NaiveDate::from_ymd_opt(2025, 1, 11).unwrap(), "09:00")
}

/// 指令處理只需要一個閒置中的 orchestrator
fn idle_orchestrator(server: &MockServer) -> Arc<Orchestrator> {
    let config = AppConfig::from_toml_str(
        r#"
[site]
email = "driver@example.com"

[auth]
strategy = "delegated-identity"
bank_name = "УНІВЕРСАЛ БАНК"

[captcha]
api_key = "captcha-key"

[telegram]
bot_token = "123:abc"
chat_id = 42
allow_list = [42]
"#,
    )
    .unwrap();
    let driver = Arc::new(WebDriverActuator::attach(&server.base_url(), "abc"));
    let solver = Arc::new(RecaptchaSolver::new(driver.clone(), config.recaptcha_settings()));
    let notifier = Arc::new(TelegramNotifier::new(client(server), 42));
    let acquisition = config
        .build_acquisition(driver, solver, notifier, Arc::new(SystemClock))
        .unwrap();
    Arc::new(Orchestrator::new(acquisition))
}

fn message(chat_id: i64, text: &str) -> Message {
    serde_json::from_value(json!({
        "chat": {"id": chat_id},
        "from": {"first_name": "Olena"},
        "text": text
    }))
    .unwrap()
}

#[tokio::test]
async fn test_approval_link_is_sent_as_inline_button() {
    let server = MockServer::start_async().await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/bot123:abc/sendMessage")
                .body_contains("\"parse_mode\":\"HTML\"")
                .body_contains("inline_keyboard")
                .body_contains("https://id.bank.example/approve/42");
            then.status(200).json_body(json!({"ok": true, "result": {"message_id": 1}}));
        })
        .await;

    TelegramNotifier::new(client(&server), 42)
        .emit(Event::AwaitingApproval {
            link: "https://id.bank.example/approve/42".to_string(),
        })
        .await;

    send.assert_async().await;
}

#[tokio::test]
async fn test_reservation_updates_mention_slot() {
    let server = MockServer::start_async().await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/bot123:abc/sendMessage")
                .body_contains("2025-01-11 09:00");
            then.status(200).json_body(json!({"ok": true, "result": {}}));
        })
        .await;

    let notifier = TelegramNotifier::new(client(&server), 42);
    notifier.emit(Event::ReservationStarted { slot: slot() }).await;
    notifier.emit(Event::ReservationApproved { slot: slot() }).await;

    send.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_artifact_is_uploaded_as_document() {
    let server = MockServer::start_async().await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/bot123:abc/sendDocument")
                .body_contains("Talon_2025_01_11.pdf")
                .body_contains("%PDF-1.7");
            then.status(200).json_body(json!({"ok": true, "result": {}}));
        })
        .await;

    TelegramNotifier::new(client(&server), 42)
        .emit(Event::ArtifactAvailable {
            bytes: b"%PDF-1.7".to_vec(),
            filename: "Talon_2025_01_11.pdf".to_string(),
        })
        .await;

    upload.assert_async().await;
}

#[tokio::test]
async fn test_rejected_delivery_is_reported_by_client_and_swallowed_by_notifier() {
    let server = MockServer::start_async().await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST).path("/bot123:abc/sendMessage");
            then.status(400)
                .json_body(json!({"ok": false, "description": "Bad Request: chat not found"}));
        })
        .await;

    let result = client(&server).send_message(42, "hello", None).await;
    assert!(matches!(
        result,
        Err(AcquireError::NotificationError { ref message }) if message.contains("chat not found")
    ));

    TelegramNotifier::new(client(&server), 42)
        .emit(Event::Error {
            message: "boom <script>".to_string(),
        })
        .await;
    send.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_get_updates_parses_messages() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/bot123:abc/getUpdates")
                .body_contains("\"offset\":11");
            then.status(200).json_body(json!({"ok": true, "result": [{
                "update_id": 11,
                "message": {
                    "message_id": 5,
                    "chat": {"id": 42, "type": "private"},
                    "from": {"id": 42, "is_bot": false, "first_name": "Olena"},
                    "text": "/search_start"
                }
            }]}));
        })
        .await;

    let updates = client(&server).get_updates(Some(11), 0).await.unwrap();

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].update_id, 11);
    let message = updates[0].message.as_ref().unwrap();
    assert_eq!(message.chat.id, 42);
    assert_eq!(message.text.as_deref(), Some("/search_start"));
}

#[tokio::test]
async fn test_unlisted_chat_is_refused() {
    let server = MockServer::start_async().await;
    let refusal = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/bot123:abc/sendMessage")
                .body_contains("\"chat_id\":7");
            then.status(200).json_body(json!({"ok": true, "result": {}}));
        })
        .await;

    let orchestrator = idle_orchestrator(&server);
    let listener = CommandListener::new(client(&server), orchestrator.clone(), vec![42]);
    listener.handle(&message(7, "/search_start")).await;

    refusal.assert_async().await;
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_stop_without_running_search_still_replies() {
    let server = MockServer::start_async().await;
    let reply = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/bot123:abc/sendMessage")
                .body_contains("\"chat_id\":42");
            then.status(200).json_body(json!({"ok": true, "result": {}}));
        })
        .await;

    let orchestrator = idle_orchestrator(&server);
    let listener = CommandListener::new(client(&server), orchestrator.clone(), vec![42]);
    listener.handle(&message(42, "/search_stop")).await;
    listener.handle(&message(42, "hello there")).await;

    reply.assert_hits_async(1).await;
    assert!(!orchestrator.is_running());
}
