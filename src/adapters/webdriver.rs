//! 以 W3C WebDriver 協定 (chromedriver) 操作真實瀏覽器

use crate::domain::ports::{
    ActuatorResult, Condition, ElementHandle, Locator, RemoteActuator, RemoteQuery, RemoteResponse,
};
use crate::utils::error::ActuatorError;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

/// W3C 規定的元素參照欄位名稱
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f8d64e8f3da";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

/// 在頁面內帶 CSRF token 同步送出表單，回傳內容與 X-Redirect
const REMOTE_QUERY_SCRIPT: &str = r#"
const [url, body] = arguments;
const token = document.getElementsByName('csrf-token')[0];
if (!token) { return null; }
const xhr = new XMLHttpRequest();
xhr.open('POST', url, false);
xhr.setRequestHeader('Content-Type', 'application/x-www-form-urlencoded; charset=UTF-8');
xhr.setRequestHeader('X-Csrf-Token', token.getAttribute('content'));
xhr.setRequestHeader('Accept', '*/*');
xhr.setRequestHeader('Cache-Control', 'no-cache');
xhr.setRequestHeader('X-Requested-With', 'XMLHttpRequest');
xhr.send(body);
return { content: xhr.responseText, redirect: xhr.getResponseHeader('X-Redirect') };
"#;

const FETCH_BYTES_SCRIPT: &str = r#"
const [url, done] = arguments;
fetch(url, { credentials: 'include' })
  .then(r => r.ok ? r.arrayBuffer() : Promise.reject('HTTP ' + r.status))
  .then(buf => done({ bytes: Array.from(new Uint8Array(buf)) }))
  .catch(e => done({ failure: String(e) }));
"#;

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireFailure {
    error: String,
    #[serde(default)]
    message: String,
}

impl WireFailure {
    fn from_value(value: &Value) -> Option<Self> {
        value.get("error")?;
        serde_json::from_value(value.clone()).ok()
    }

    fn into_error(self) -> ActuatorError {
        match self.error.as_str() {
            "no such element" | "stale element reference" => ActuatorError::ElementNotFound {
                target: self.message,
            },
            "timeout" | "script timeout" => ActuatorError::Timeout {
                target: self.message,
                after: Duration::ZERO,
            },
            "javascript error" => ActuatorError::Script {
                message: self.message,
            },
            _ => ActuatorError::Protocol {
                code: self.error,
                message: self.message,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct FetchedBytes {
    #[serde(default)]
    bytes: Option<Vec<u8>>,
    #[serde(default)]
    failure: Option<String>,
}

fn strategy(locator: &Locator) -> (&'static str, String) {
    match locator {
        Locator::Css(selector) => ("css selector", selector.clone()),
        Locator::XPath(path) => ("xpath", path.clone()),
        Locator::Id(id) => ("css selector", format!("[id=\"{}\"]", id)),
        Locator::Class(class) => ("css selector", format!(".{}", class)),
    }
}

pub struct WebDriverActuator {
    client: Client,
    session_url: String,
    session_id: String,
    poll_interval: Duration,
}

impl WebDriverActuator {
    /// 建立新的瀏覽器 session
    pub async fn connect(driver_url: &str, headless: bool) -> ActuatorResult<Self> {
        let client = Client::new();
        let mut args = vec![
            format!("--user-agent={}", USER_AGENT),
            "--start-maximized".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
        ];
        if headless {
            args.push("--headless=new".to_string());
            args.push("--window-size=1920,1080".to_string());
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-automation"],
                    }
                }
            }
        });

        let base = driver_url.trim_end_matches('/');
        tracing::debug!("Creating WebDriver session at {}", base);
        let response = client
            .post(format!("{}/session", base))
            .json(&capabilities)
            .send()
            .await?;
        let payload: WireResponse = response.json().await?;
        if let Some(failure) = WireFailure::from_value(&payload.value) {
            return Err(failure.into_error());
        }
        let session: NewSession = serde_json::from_value(payload.value)?;
        tracing::info!("🌐 Browser session {} created", session.session_id);

        Ok(Self::with_client(client, base, session.session_id))
    }

    /// 接上既有的 session
    pub fn attach(driver_url: &str, session_id: impl Into<String>) -> Self {
        Self::with_client(Client::new(), driver_url.trim_end_matches('/'), session_id.into())
    }

    fn with_client(client: Client, base: &str, session_id: String) -> Self {
        Self {
            client,
            session_url: format!("{}/session/{}", base, session_id),
            session_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn quit(&self) -> ActuatorResult<()> {
        self.command(Method::DELETE, "", None).await?;
        tracing::info!("Browser session {} closed", self.session_id);
        Ok(())
    }

    pub async fn execute_script(&self, script: &str, args: Vec<Value>) -> ActuatorResult<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn execute_async_script(&self, script: &str, args: Vec<Value>) -> ActuatorResult<Value> {
        self.command(
            Method::POST,
            "/execute/async",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> ActuatorResult<Value> {
        let url = format!("{}{}", self.session_url, path);
        let request = self.client.request(method.clone(), &url);
        let request = match body {
            Some(body) => request.json(&body),
            None if method == Method::POST => request.json(&json!({})),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let payload: WireResponse = response.json().await?;

        if let Some(failure) = WireFailure::from_value(&payload.value) {
            return Err(failure.into_error());
        }
        if !status.is_success() {
            return Err(ActuatorError::Protocol {
                code: status.to_string(),
                message: payload.value.to_string(),
            });
        }
        Ok(payload.value)
    }

    async fn find(&self, locator: &Locator) -> ActuatorResult<Option<ElementHandle>> {
        let (using, value) = strategy(locator);
        match self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": using, "value": value })),
            )
            .await
        {
            Ok(found) => {
                let id = found
                    .get(ELEMENT_KEY)
                    .and_then(Value::as_str)
                    .ok_or_else(|| ActuatorError::Protocol {
                        code: "invalid element".to_string(),
                        message: found.to_string(),
                    })?;
                Ok(Some(ElementHandle(id.to_string())))
            }
            Err(ActuatorError::ElementNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn flag(&self, element: &ElementHandle, property: &str) -> ActuatorResult<bool> {
        let value = self
            .command(Method::GET, &format!("/element/{}/{}", element.0, property), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn holds(&self, condition: &Condition, element: &ElementHandle) -> ActuatorResult<bool> {
        match condition {
            Condition::Present(_) => Ok(true),
            Condition::Visible(_) => self.flag(element, "displayed").await,
            Condition::Clickable(_) => {
                Ok(self.flag(element, "displayed").await? && self.flag(element, "enabled").await?)
            }
        }
    }
}

#[async_trait]
impl RemoteActuator for WebDriverActuator {
    async fn navigate(&self, url: &str) -> ActuatorResult<()> {
        tracing::debug!("Navigating to {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn current_url(&self) -> ActuatorResult<String> {
        let value = self.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn execute_remote_query(&self, query: &RemoteQuery) -> ActuatorResult<RemoteResponse> {
        let value = self
            .execute_script(
                REMOTE_QUERY_SCRIPT,
                vec![json!(query.url), json!(query.encoded_body())],
            )
            .await?;
        if value.is_null() {
            // 頁面沒有 CSRF token，通常是驗證碼頁或尚未登入
            return Err(ActuatorError::ElementNotFound {
                target: "meta[name=csrf-token]".to_string(),
            });
        }

        Ok(RemoteResponse {
            content: value
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            redirect: value
                .get("redirect")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn wait_until(&self, condition: &Condition, timeout: Option<Duration>) -> ActuatorResult<ElementHandle> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut seen = false;

        loop {
            match self.find(condition.locator()).await {
                Ok(Some(element)) => {
                    seen = true;
                    match self.holds(condition, &element).await {
                        Ok(true) => return Ok(element),
                        Ok(false) => {}
                        Err(e) if e.is_missing_target() => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(None) => {}
                Err(e) => return Err(e),
            }

            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    let target = condition.to_string();
                    return Err(if seen {
                        ActuatorError::Timeout { target, after: timeout }
                    } else {
                        ActuatorError::ElementNotFound { target }
                    });
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_url(&self, url: &str, timeout: Duration) -> ActuatorResult<()> {
        let deadline = Instant::now() + timeout;
        let expected = url.trim_end_matches('/');
        loop {
            let current = self.current_url().await?;
            if current.trim_end_matches('/') == expected {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ActuatorError::Timeout {
                    target: format!("url {} (currently {})", url, current),
                    after: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn click(&self, element: &ElementHandle) -> ActuatorResult<()> {
        self.command(Method::POST, &format!("/element/{}/click", element.0), None)
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> ActuatorResult<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> ActuatorResult<Option<String>> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{}", element.0, name),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn fetch_bytes(&self, url: &str) -> ActuatorResult<Vec<u8>> {
        let value = self.execute_async_script(FETCH_BYTES_SCRIPT, vec![json!(url)]).await?;
        let fetched: FetchedBytes = serde_json::from_value(value)?;
        match (fetched.bytes, fetched.failure) {
            (Some(bytes), _) => Ok(bytes),
            (None, failure) => Err(ActuatorError::Script {
                message: format!(
                    "download of {} failed: {}",
                    url,
                    failure.unwrap_or_else(|| "empty response".to_string())
                ),
            }),
        }
    }

    async fn refresh_session(&self) -> ActuatorResult<()> {
        self.command(Method::POST, "/refresh", None).await?;
        Ok(())
    }

    async fn clear_cookies(&self) -> ActuatorResult<()> {
        self.command(Method::DELETE, "/cookie", None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_strategies() {
        assert_eq!(
            strategy(&Locator::Id("qrcode".to_string())),
            ("css selector", "[id=\"qrcode\"]".to_string())
        );
        assert_eq!(
            strategy(&Locator::Class("btn-hsc-green".to_string())),
            ("css selector", ".btn-hsc-green".to_string())
        );
        assert_eq!(
            strategy(&Locator::XPath("//iframe".to_string())).0,
            "xpath"
        );
    }

    #[test]
    fn test_wire_failures_are_classified() {
        let missing = WireFailure::from_value(&json!({"error": "no such element", "message": "x"}));
        assert!(matches!(
            missing.map(WireFailure::into_error),
            Some(ActuatorError::ElementNotFound { .. })
        ));

        let script = WireFailure::from_value(&json!({"error": "javascript error", "message": "boom"}));
        assert!(matches!(
            script.map(WireFailure::into_error),
            Some(ActuatorError::Script { .. })
        ));

        let other = WireFailure::from_value(&json!({"error": "invalid session id", "message": ""}));
        assert!(matches!(
            other.map(WireFailure::into_error),
            Some(ActuatorError::Protocol { .. })
        ));

        assert!(WireFailure::from_value(&json!("https://eq.hsc.gov.ua/")).is_none());
        assert!(WireFailure::from_value(&Value::Null).is_none());
    }
}
