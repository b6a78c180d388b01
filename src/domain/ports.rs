use crate::domain::model::Event;
use crate::utils::error::{ActuatorError, ChallengeError};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::fmt;
use std::time::Duration;

pub type ActuatorResult<T> = std::result::Result<T, ActuatorError>;

/// 頁面元素定位
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
    Id(String),
    Class(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(value) => write!(f, "css={}", value),
            Locator::XPath(value) => write!(f, "xpath={}", value),
            Locator::Id(value) => write!(f, "id={}", value),
            Locator::Class(value) => write!(f, "class={}", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Present(Locator),
    Visible(Locator),
    Clickable(Locator),
}

impl Condition {
    pub fn locator(&self) -> &Locator {
        match self {
            Condition::Present(locator) | Condition::Visible(locator) | Condition::Clickable(locator) => locator,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Present(locator) => write!(f, "present({})", locator),
            Condition::Visible(locator) => write!(f, "visible({})", locator),
            Condition::Clickable(locator) => write!(f, "clickable({})", locator),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

/// 在已登入頁面上下文中發出的表單請求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteQuery {
    pub url: String,
    pub form: Vec<(String, String)>,
}

impl RemoteQuery {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            form: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl ToString) -> Self {
        self.form.push((name.to_string(), value.to_string()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn encoded_body(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.form.iter())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteResponse {
    pub content: String,
    pub redirect: Option<String>,
}

impl RemoteResponse {
    pub fn body(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            redirect: None,
        }
    }
}

/// 目標網站的唯一操作端，同一時間只會有一個互動在進行
#[async_trait]
pub trait RemoteActuator: Send + Sync {
    async fn navigate(&self, url: &str) -> ActuatorResult<()>;
    async fn current_url(&self) -> ActuatorResult<String>;
    async fn execute_remote_query(&self, query: &RemoteQuery) -> ActuatorResult<RemoteResponse>;
    /// `timeout` 為 `None` 時無限等待
    async fn wait_until(&self, condition: &Condition, timeout: Option<Duration>) -> ActuatorResult<ElementHandle>;
    async fn wait_for_url(&self, url: &str, timeout: Duration) -> ActuatorResult<()>;
    async fn click(&self, element: &ElementHandle) -> ActuatorResult<()>;
    async fn send_keys(&self, element: &ElementHandle, text: &str) -> ActuatorResult<()>;
    async fn attribute(&self, element: &ElementHandle, name: &str) -> ActuatorResult<Option<String>>;
    async fn fetch_bytes(&self, url: &str) -> ActuatorResult<Vec<u8>>;
    async fn refresh_session(&self) -> ActuatorResult<()>;
    async fn clear_cookies(&self) -> ActuatorResult<()>;
}

#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn is_challenge_present(&self) -> Result<bool, ChallengeError>;
    async fn solve(&self) -> Result<(), ChallengeError>;
}

/// Fire-and-forget，失敗只記 log
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, event: Event);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&Local).date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
