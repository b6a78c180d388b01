use httpmock::prelude::*;
use serde_json::json;
use slot_acquirer::adapters::captcha::{RecaptchaSettings, RecaptchaSolver};
use slot_acquirer::adapters::webdriver::WebDriverActuator;
use slot_acquirer::domain::ports::ChallengeSolver;
use slot_acquirer::utils::error::ChallengeError;
use std::sync::Arc;
use std::time::Duration;

fn solver(server: &MockServer, solve_retries: u32) -> RecaptchaSolver {
    let driver = Arc::new(
        WebDriverActuator::attach(&server.base_url(), "abc").with_poll_interval(Duration::from_millis(10)),
    );
    RecaptchaSolver::new(
        driver,
        RecaptchaSettings {
            api_key: "captcha-key".to_string(),
            site_key: "site-key".to_string(),
            service_url: server.base_url(),
            solve_retries,
            poll_interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(50),
        },
    )
}

async fn mock_current_page(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/session/abc/url");
            then.status(200).json_body(json!({"value": "https://eq.hsc.gov.ua/"}));
        })
        .await;
}

#[tokio::test]
async fn test_solve_submits_task_and_injects_token() {
    let server = MockServer::start_async().await;
    mock_current_page(&server).await;
    let submit = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/in.php")
                .body_contains("method=userrecaptcha")
                .body_contains("googlekey=site-key");
            then.status(200).json_body(json!({"status": 1, "request": "task-1"}));
        })
        .await;
    let result = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/res.php")
                .query_param("action", "get")
                .query_param("id", "task-1");
            then.status(200).json_body(json!({"status": 1, "request": "TOKEN-XYZ"}));
        })
        .await;
    let inject = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/session/abc/execute/sync")
                .body_contains("TOKEN-XYZ");
            then.status(200).json_body(json!({"value": true}));
        })
        .await;

    solver(&server, 3).solve().await.unwrap();

    submit.assert_async().await;
    result.assert_async().await;
    inject.assert_async().await;
}

#[tokio::test]
async fn test_rejected_tasks_refresh_and_give_up() {
    let server = MockServer::start_async().await;
    mock_current_page(&server).await;
    let submit = server
        .mock_async(|when, then| {
            when.method(POST).path("/in.php");
            then.status(200)
                .json_body(json!({"status": 0, "request": "ERROR_ZERO_BALANCE"}));
        })
        .await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path("/session/abc/refresh");
            then.status(200).json_body(json!({"value": null}));
        })
        .await;

    let outcome = solver(&server, 2).solve().await;

    assert!(matches!(outcome, Err(ChallengeError::Unsolved { attempts: 2 })));
    submit.assert_hits_async(2).await;
    refresh.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_failed_task_is_not_polled_forever() {
    let server = MockServer::start_async().await;
    mock_current_page(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/in.php");
            then.status(200).json_body(json!({"status": 1, "request": "task-9"}));
        })
        .await;
    let result = server
        .mock_async(|when, then| {
            when.method(GET).path("/res.php");
            then.status(200)
                .json_body(json!({"status": 0, "request": "ERROR_CAPTCHA_UNSOLVABLE"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/session/abc/refresh");
            then.status(200).json_body(json!({"value": null}));
        })
        .await;

    let outcome = solver(&server, 1).solve().await;

    assert!(matches!(outcome, Err(ChallengeError::Unsolved { attempts: 1 })));
    result.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_absent_frame_means_no_challenge() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/session/abc/element")
                .body_contains("reCAPTCHA");
            then.status(404).json_body(json!({"value": {
                "error": "no such element",
                "message": "Unable to locate element"
            }}));
        })
        .await;

    assert!(!solver(&server, 1).is_challenge_present().await.unwrap());
}

#[tokio::test]
async fn test_visible_frame_is_a_challenge() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/session/abc/element");
            then.status(200)
                .json_body(json!({"value": {"element-6066-11e4-a52e-4f8d64e8f3da": "frame-1"}}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/session/abc/element/frame-1/displayed");
            then.status(200).json_body(json!({"value": true}));
        })
        .await;

    assert!(solver(&server, 1).is_challenge_present().await.unwrap());
}

#[tokio::test]
async fn test_broken_session_is_detection_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/session/abc/element");
            then.status(404).json_body(json!({"value": {
                "error": "invalid session id",
                "message": "session deleted"
            }}));
        })
        .await;

    let outcome = solver(&server, 1).is_challenge_present().await;

    assert!(matches!(outcome, Err(ChallengeError::Detection(_))));
}
