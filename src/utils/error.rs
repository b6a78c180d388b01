use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::domain::model::Slot;

/// 遠端操作端 (WebDriver) 的錯誤
#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("Element not found: {target}")]
    ElementNotFound { target: String },

    #[error("Timed out after {after:?} waiting for {target}")]
    Timeout { target: String, after: Duration },

    #[error("Script execution failed: {message}")]
    Script { message: String },

    #[error("WebDriver protocol error ({code}): {message}")]
    Protocol { code: String, message: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ActuatorError {
    /// 找不到元素或等待逾時，可能是驗證碼擋住了頁面
    pub fn is_missing_target(&self) -> bool {
        matches!(
            self,
            ActuatorError::ElementNotFound { .. } | ActuatorError::Timeout { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("Challenge detection failed: {0}")]
    Detection(#[source] ActuatorError),

    #[error("Challenge solving service error: {message}")]
    Service { message: String },

    #[error("Challenge still unsolved after {attempts} attempts")]
    Unsolved { attempts: u32 },

    #[error("Challenge page interaction failed: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Challenge solving service unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("'{action}' still failing after {attempts} challenge-guarded attempts: {last}")]
    Exhausted {
        action: String,
        attempts: u32,
        #[source]
        last: ActuatorError,
    },

    #[error("'{action}' failed: {source}")]
    Action {
        action: String,
        #[source]
        source: ActuatorError,
    },
}

impl GuardError {
    pub fn is_missing_target(&self) -> bool {
        match self {
            GuardError::Exhausted { .. } => true,
            GuardError::Action { source, .. } => source.is_missing_target(),
        }
    }
}

/// 協作式取消 (stop 指令)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("run cancelled")]
pub struct Cancelled;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: GuardError,
    },

    #[error("Authentication step failed: {0}")]
    Step(#[from] GuardError),

    #[error("Identity broker did not expose an approval link")]
    MissingApprovalLink,

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Slot query for {date} failed: {source}")]
    Query {
        date: chrono::NaiveDate,
        #[source]
        source: GuardError,
    },

    #[error("Slot query for {date} returned a malformed payload: {source}")]
    Payload {
        date: chrono::NaiveDate,
        #[source]
        source: serde_json::Error,
    },

    #[error("Authentication session went stale before {date} was queried")]
    SessionStale { date: chrono::NaiveDate },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Error, Debug)]
pub enum ReservationError {
    #[error("Slot {slot} is already taken")]
    AlreadyTaken { slot: Slot },

    #[error("Reserve response for slot {slot} is malformed: {message}")]
    MalformedResponse { slot: Slot, message: String },

    #[error("Reserve request failed: {0}")]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("Reservation expired at {expires_at}")]
    Expired { expires_at: DateTime<Utc> },

    #[error("Reservation approval failed: {0}")]
    Other(#[from] GuardError),
}

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration '{field}'")]
    MissingConfigError { field: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error("Notification channel error: {message}")]
    NotificationError { message: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<Cancelled> for AcquireError {
    fn from(_: Cancelled) -> Self {
        AcquireError::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Authentication,
    Challenge,
    Remote,
    Reservation,
    Notification,
    Cancelled,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AcquireError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AcquireError::Cancelled
                | AcquireError::Auth(AuthError::Cancelled(_))
                | AcquireError::Poll(PollError::Cancelled(_))
                | AcquireError::Reservation(ReservationError::Cancelled(_))
        )
    }

    pub fn category(&self) -> ErrorCategory {
        if self.is_cancelled() {
            return ErrorCategory::Cancelled;
        }
        match self {
            AcquireError::ConfigError { .. }
            | AcquireError::ConfigValidationError { .. }
            | AcquireError::InvalidConfigValueError { .. }
            | AcquireError::MissingConfigError { .. } => ErrorCategory::Configuration,
            AcquireError::Auth(_) => ErrorCategory::Authentication,
            AcquireError::Guard(_) => ErrorCategory::Challenge,
            AcquireError::Poll(_) | AcquireError::Actuator(_) | AcquireError::HttpError(_) => {
                ErrorCategory::Remote
            }
            AcquireError::Reservation(_) | AcquireError::Approval(_) => ErrorCategory::Reservation,
            AcquireError::NotificationError { .. } => ErrorCategory::Notification,
            _ => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Cancelled => ErrorSeverity::Low,
            ErrorCategory::Notification | ErrorCategory::Reservation => ErrorSeverity::Medium,
            ErrorCategory::Authentication | ErrorCategory::Challenge | ErrorCategory::Remote => {
                ErrorSeverity::High
            }
            ErrorCategory::Configuration | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the configuration file and required environment variables",
            ErrorCategory::Authentication => {
                "Approve the sign-in request in time or verify the key file and its password, then start a new search"
            }
            ErrorCategory::Challenge => {
                "Check the captcha solving service balance and API key, then start a new search"
            }
            ErrorCategory::Remote => "Make sure the WebDriver server is running and the site is reachable",
            ErrorCategory::Reservation => "Start a new search; the slot may have been taken by someone else",
            ErrorCategory::Notification => "Verify the bot token and chat id",
            ErrorCategory::Cancelled => "Start a new search when ready",
            ErrorCategory::System => "Inspect the logs for details",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Authentication => format!("Could not sign in to the queue site: {}", self),
            ErrorCategory::Challenge => format!("Bot verification could not be passed: {}", self),
            ErrorCategory::Remote => format!("The queue site or browser stopped responding: {}", self),
            ErrorCategory::Reservation => format!("Reservation failed: {}", self),
            ErrorCategory::Notification => format!("Could not deliver a notification: {}", self),
            ErrorCategory::Cancelled => "Search stopped".to_string(),
            ErrorCategory::System => format!("Unexpected error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, AcquireError>;
