//! reCAPTCHA 偵測與 2captcha 相容服務的付費解題

use crate::adapters::webdriver::WebDriverActuator;
use crate::core::site;
use crate::domain::ports::{ChallengeSolver, Condition, RemoteActuator};
use crate::utils::error::{ActuatorError, ChallengeError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const NOT_READY: &str = "CAPCHA_NOT_READY";

const SITE_KEY_SCRIPT: &str = r#"
const holder = document.querySelector('[data-sitekey]');
return holder ? holder.getAttribute('data-sitekey') : null;
"#;

/// 填入 token 後送出驗證表單
const INJECT_TOKEN_SCRIPT: &str = r#"
const [token] = arguments;
document.querySelectorAll('[name="g-recaptcha-response"]').forEach(field => {
  field.style.display = 'block';
  field.value = token;
  field.innerHTML = token;
});
const submit = document.querySelector("button[type='submit']");
if (!submit) { return false; }
submit.click();
return true;
"#;

#[derive(Debug, Clone)]
pub struct RecaptchaSettings {
    pub api_key: String,
    /// 空字串時從頁面的 `data-sitekey` 讀取
    pub site_key: String,
    pub service_url: String,
    pub solve_retries: u32,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub probe_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ServiceReply {
    status: Value,
    request: String,
}

impl ServiceReply {
    fn is_ok(&self) -> bool {
        match &self.status {
            Value::Number(n) => n.as_i64() == Some(1),
            Value::String(s) => s == "1",
            _ => false,
        }
    }
}

pub struct RecaptchaSolver {
    driver: Arc<WebDriverActuator>,
    client: Client,
    settings: RecaptchaSettings,
}

impl RecaptchaSolver {
    pub fn new(driver: Arc<WebDriverActuator>, settings: RecaptchaSettings) -> Self {
        Self {
            driver,
            client: Client::new(),
            settings,
        }
    }

    fn service(&self, endpoint: &str) -> String {
        format!("{}/{}", self.settings.service_url.trim_end_matches('/'), endpoint)
    }

    async fn site_key(&self) -> Result<String, ChallengeError> {
        if !self.settings.site_key.is_empty() {
            return Ok(self.settings.site_key.clone());
        }
        let value = self.driver.execute_script(SITE_KEY_SCRIPT, Vec::new()).await?;
        value
            .as_str()
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ChallengeError::Actuator(ActuatorError::ElementNotFound {
                    target: "[data-sitekey]".to_string(),
                })
            })
    }

    async fn submit_task(&self, site_key: &str, page_url: &str) -> Result<String, ChallengeError> {
        let form = [
            ("key", self.settings.api_key.as_str()),
            ("method", "userrecaptcha"),
            ("googlekey", site_key),
            ("pageurl", page_url),
            ("json", "1"),
        ];
        let reply: ServiceReply = self
            .client
            .post(self.service("in.php"))
            .form(&form)
            .send()
            .await?
            .json()
            .await?;

        if !reply.is_ok() {
            return Err(ChallengeError::Service {
                message: format!("task rejected: {}", reply.request),
            });
        }
        tracing::debug!("Captcha task {} submitted", reply.request);
        Ok(reply.request)
    }

    async fn await_token(&self, task_id: &str) -> Result<String, ChallengeError> {
        let deadline = Instant::now() + self.settings.max_wait;
        loop {
            tokio::time::sleep(self.settings.poll_interval).await;

            let reply: ServiceReply = self
                .client
                .get(self.service("res.php"))
                .query(&[
                    ("key", self.settings.api_key.as_str()),
                    ("action", "get"),
                    ("id", task_id),
                    ("json", "1"),
                ])
                .send()
                .await?
                .json()
                .await?;

            if reply.is_ok() {
                return Ok(reply.request);
            }
            if reply.request != NOT_READY {
                return Err(ChallengeError::Service {
                    message: format!("task {} failed: {}", task_id, reply.request),
                });
            }
            if Instant::now() >= deadline {
                return Err(ChallengeError::Service {
                    message: format!(
                        "task {} not solved within {:?}",
                        task_id, self.settings.max_wait
                    ),
                });
            }
        }
    }

    async fn attempt(&self) -> Result<(), ChallengeError> {
        let page_url = self.driver.current_url().await?;
        let site_key = self.site_key().await?;
        let task_id = self.submit_task(&site_key, &page_url).await?;
        let token = self.await_token(&task_id).await?;

        let submitted = self
            .driver
            .execute_script(INJECT_TOKEN_SCRIPT, vec![json!(token)])
            .await?;
        if submitted.as_bool() != Some(true) {
            return Err(ChallengeError::Actuator(ActuatorError::ElementNotFound {
                target: "button[type='submit']".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl ChallengeSolver for RecaptchaSolver {
    async fn is_challenge_present(&self) -> Result<bool, ChallengeError> {
        let probe = Condition::Visible(site::recaptcha_frame());
        match self
            .driver
            .wait_until(&probe, Some(self.settings.probe_timeout))
            .await
        {
            Ok(_) => {
                tracing::info!("🧩 reCAPTCHA iframe found! Resolving captcha...");
                Ok(true)
            }
            Err(e) if e.is_missing_target() => {
                tracing::debug!("No captcha found. Processing action as usual...");
                Ok(false)
            }
            Err(e) => Err(ChallengeError::Detection(e)),
        }
    }

    async fn solve(&self) -> Result<(), ChallengeError> {
        let retries = self.settings.solve_retries.max(1);
        for attempt in 1..=retries {
            match self.attempt().await {
                Ok(()) => {
                    tracing::info!("✅ Captcha resolved successfully!");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "[Attempt #{}] Failed to resolve captcha: {}. Trying again...",
                        attempt,
                        e
                    );
                    if let Err(e) = self.driver.refresh_session().await {
                        tracing::warn!("Failed to refresh page before the next captcha attempt: {}", e);
                    }
                }
            }
        }

        tracing::error!("Captcha was not solved after {} attempts", retries);
        Err(ChallengeError::Unsolved { attempts: retries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_reply_status_forms() {
        let numeric: ServiceReply = serde_json::from_str(r#"{"status":1,"request":"123"}"#).unwrap();
        let text: ServiceReply = serde_json::from_str(r#"{"status":"1","request":"123"}"#).unwrap();
        let pending: ServiceReply =
            serde_json::from_str(r#"{"status":0,"request":"CAPCHA_NOT_READY"}"#).unwrap();

        assert!(numeric.is_ok());
        assert!(text.is_ok());
        assert!(!pending.is_ok());
        assert_eq!(pending.request, NOT_READY);
    }
}
