use crate::adapters::captcha::RecaptchaSettings;
use crate::core::guard::ChallengeGuard;
use crate::core::orchestrator::{Acquisition, RunSettings};
use crate::core::poller::{PollerSettings, SlotPoller};
use crate::core::reservation::{ReservationCoordinator, ReservationSettings};
use crate::core::session::{AuthStrategy, DelegatedIdentity, KeyFile, SessionManager, SessionSettings};
use crate::core::site::Site;
use crate::domain::ports::{ChallengeSolver, Clock, Notifier, RemoteActuator};
use crate::utils::delay::DelayBounds;
use crate::utils::error::{AcquireError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// 各項設定的上限，避免時間運算溢位
const MAX_REAUTH_THRESHOLD_SECONDS: u64 = 7 * 24 * 60 * 60;
const MAX_GRACE_WINDOW_SECONDS: u64 = 60 * 60;
const MAX_STEP_TIMEOUT_SECONDS: u64 = 60 * 60;
const MAX_ROUND_DELAY_SECONDS: u64 = 24 * 60 * 60;
const MAX_DATE_DELAY_SECONDS: u64 = 10 * 60;
const MAX_WINDOW_DAYS: u32 = 366;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub reservation: ReservationConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    pub captcha: CaptchaConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_office_id")]
    pub office_id: u32,
    #[serde(default = "default_question_id")]
    pub question_id: u32,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStrategyKind {
    DelegatedIdentity,
    KeyFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub strategy: AuthStrategyKind,
    #[serde(default = "default_reauth_threshold")]
    pub reauth_threshold_seconds: u64,
    #[serde(default = "default_auth_retries")]
    pub retries: u32,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,
    pub bank_name: Option<String>,
    pub key_path: Option<String>,
    pub key_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_round_delay")]
    pub round_delay_seconds: DelayBounds,
    #[serde(default = "default_date_delay")]
    pub date_delay_seconds: DelayBounds,
    #[serde(default = "default_window_offset")]
    pub window_start_offset_days: u32,
    #[serde(default = "default_window_length")]
    pub window_length_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    #[serde(default = "default_grace_window")]
    pub grace_window_seconds: u64,
    #[serde(default = "default_approve_retries")]
    pub approve_retries: u32,
    #[serde(default = "default_approve_retry_delay")]
    pub approve_retry_delay_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    pub api_key: String,
    #[serde(default)]
    pub site_key: String,
    #[serde(default = "default_captcha_service")]
    pub service_url: String,
    #[serde(default = "default_solve_retries")]
    pub solve_retries: u32,
    #[serde(default = "default_captcha_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_captcha_max_wait")]
    pub max_wait_seconds: u64,
    #[serde(default = "default_captcha_probe_timeout")]
    pub probe_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverConfig {
    #[serde(default = "default_webdriver_url")]
    pub url: String,
    #[serde(default)]
    pub headless: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: i64,
    #[serde(default)]
    pub allow_list: Vec<i64>,
    #[serde(default = "default_telegram_api")]
    pub api_url: String,
}

fn default_base_url() -> String {
    "https://eq.hsc.gov.ua".to_string()
}

fn default_office_id() -> u32 {
    61
}

fn default_question_id() -> u32 {
    55
}

fn default_reauth_threshold() -> u64 {
    3 * 60 * 60
}

fn default_auth_retries() -> u32 {
    5
}

fn default_step_timeout() -> u64 {
    30
}

fn default_round_delay() -> DelayBounds {
    DelayBounds::new(Duration::from_secs(60), Duration::from_secs(120))
}

fn default_date_delay() -> DelayBounds {
    DelayBounds::new(Duration::from_secs(3), Duration::from_secs(5))
}

fn default_window_offset() -> u32 {
    3
}

fn default_window_length() -> u32 {
    18
}

fn default_grace_window() -> u64 {
    75
}

fn default_approve_retries() -> u32 {
    20
}

fn default_approve_retry_delay() -> u64 {
    15
}

fn default_max_depth() -> u32 {
    ChallengeGuard::DEFAULT_MAX_DEPTH
}

fn default_captcha_service() -> String {
    "https://2captcha.com".to_string()
}

fn default_solve_retries() -> u32 {
    5
}

fn default_captcha_poll_interval() -> u64 {
    5
}

fn default_captcha_max_wait() -> u64 {
    180
}

fn default_captcha_probe_timeout() -> u64 {
    1
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            round_delay_seconds: default_round_delay(),
            date_delay_seconds: default_date_delay(),
            window_start_offset_days: default_window_offset(),
            window_length_days: default_window_length(),
        }
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            grace_window_seconds: default_grace_window(),
            approve_retries: default_approve_retries(),
            approve_retry_delay_seconds: default_approve_retry_delay(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            headless: false,
        }
    }
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(AcquireError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| AcquireError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${BOT_TOKEN})，沒設定的保持原樣交給驗證報錯
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| AcquireError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("site.base_url", &self.site.base_url)?;
        validation::validate_positive_number("site.office_id", self.site.office_id, 1)?;
        validation::validate_non_empty_string("site.email", &self.site.email)?;
        validation::validate_substituted("site.email", &self.site.email)?;

        validation::validate_positive_number("auth.retries", self.auth.retries, 1)?;
        validation::validate_range("auth.step_timeout_seconds", self.auth.step_timeout_seconds, 1, MAX_STEP_TIMEOUT_SECONDS)?;
        validation::validate_seconds(
            "auth.reauth_threshold_seconds",
            self.auth.reauth_threshold_seconds,
            60,
            MAX_REAUTH_THRESHOLD_SECONDS,
        )?;
        match self.auth.strategy {
            AuthStrategyKind::DelegatedIdentity => {
                let bank = validation::validate_required_field("auth.bank_name", &self.auth.bank_name)?;
                validation::validate_non_empty_string("auth.bank_name", bank)?;
            }
            AuthStrategyKind::KeyFile => {
                let path = validation::validate_required_field("auth.key_path", &self.auth.key_path)?;
                validation::validate_key_file("auth.key_path", path)?;
                validation::validate_substituted("auth.key_path", path)?;
                let password =
                    validation::validate_required_field("auth.key_password", &self.auth.key_password)?;
                validation::validate_non_empty_string("auth.key_password", password)?;
                validation::validate_substituted("auth.key_password", password)?;
            }
        }

        validation::validate_delay_bounds(
            "polling.round_delay_seconds",
            &self.polling.round_delay_seconds,
            Duration::from_secs(MAX_ROUND_DELAY_SECONDS),
        )?;
        validation::validate_delay_bounds(
            "polling.date_delay_seconds",
            &self.polling.date_delay_seconds,
            Duration::from_secs(MAX_DATE_DELAY_SECONDS),
        )?;
        validation::validate_range(
            "polling.window_start_offset_days",
            self.polling.window_start_offset_days,
            0,
            MAX_WINDOW_DAYS,
        )?;
        validation::validate_range(
            "polling.window_length_days",
            self.polling.window_length_days,
            1,
            MAX_WINDOW_DAYS,
        )?;

        validation::validate_seconds(
            "reservation.grace_window_seconds",
            self.reservation.grace_window_seconds,
            1,
            MAX_GRACE_WINDOW_SECONDS,
        )?;
        validation::validate_positive_number("reservation.approve_retries", self.reservation.approve_retries, 1)?;
        validation::validate_range(
            "reservation.approve_retry_delay_seconds",
            self.reservation.approve_retry_delay_seconds,
            0,
            MAX_STEP_TIMEOUT_SECONDS,
        )?;
        validation::validate_positive_number("guard.max_depth", self.guard.max_depth, 1)?;

        validation::validate_non_empty_string("captcha.api_key", &self.captcha.api_key)?;
        validation::validate_substituted("captcha.api_key", &self.captcha.api_key)?;
        validation::validate_url("captcha.service_url", &self.captcha.service_url)?;
        validation::validate_positive_number("captcha.solve_retries", self.captcha.solve_retries, 1)?;
        validation::validate_range("captcha.max_wait_seconds", self.captcha.max_wait_seconds, 1, MAX_STEP_TIMEOUT_SECONDS)?;
        validation::validate_range(
            "captcha.poll_interval_seconds",
            self.captcha.poll_interval_seconds,
            1,
            MAX_STEP_TIMEOUT_SECONDS,
        )?;
        validation::validate_range(
            "captcha.probe_timeout_seconds",
            self.captcha.probe_timeout_seconds,
            0,
            MAX_STEP_TIMEOUT_SECONDS,
        )?;

        validation::validate_url("webdriver.url", &self.webdriver.url)?;

        validation::validate_non_empty_string("telegram.bot_token", &self.telegram.bot_token)?;
        validation::validate_substituted("telegram.bot_token", &self.telegram.bot_token)?;
        validation::validate_url("telegram.api_url", &self.telegram.api_url)?;

        Ok(())
    }

    pub fn site(&self) -> Result<Site> {
        Site::parse(&self.site.base_url).map_err(|e| AcquireError::InvalidConfigValueError {
            field: "site.base_url".to_string(),
            value: self.site.base_url.clone(),
            reason: e.to_string(),
        })
    }

    /// 依設定選擇登入策略；金鑰路徑會轉成絕對路徑再交給瀏覽器上傳
    pub fn auth_strategy(&self) -> Result<Box<dyn AuthStrategy>> {
        match self.auth.strategy {
            AuthStrategyKind::DelegatedIdentity => {
                let bank = validation::validate_required_field("auth.bank_name", &self.auth.bank_name)?;
                Ok(Box::new(DelegatedIdentity::new(bank.clone())))
            }
            AuthStrategyKind::KeyFile => {
                let path = validation::validate_required_field("auth.key_path", &self.auth.key_path)?;
                let password =
                    validation::validate_required_field("auth.key_password", &self.auth.key_password)?;
                let absolute: PathBuf = std::path::absolute(path).map_err(AcquireError::IoError)?;
                Ok(Box::new(KeyFile::new(absolute, password.clone())))
            }
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            retries: self.auth.retries,
            step_timeout: Duration::from_secs(self.auth.step_timeout_seconds),
            reauth_threshold_seconds: self.auth.reauth_threshold_seconds,
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            question_id: self.site.question_id,
            date_delay: self.polling.date_delay_seconds,
        }
    }

    pub fn reservation_settings(&self) -> Result<ReservationSettings> {
        let grace_window = validation::validate_seconds(
            "reservation.grace_window_seconds",
            self.reservation.grace_window_seconds,
            1,
            MAX_GRACE_WINDOW_SECONDS,
        )?;
        Ok(ReservationSettings {
            question_id: self.site.question_id,
            email: self.site.email.clone(),
            grace_window,
            // 保留前的抖動沿用逐日查詢的延遲區間
            pre_reserve_delay: self.polling.date_delay_seconds,
            step_timeout: Duration::from_secs(self.auth.step_timeout_seconds),
        })
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            office_id: self.site.office_id,
            window_start_offset_days: self.polling.window_start_offset_days,
            window_length_days: self.polling.window_length_days,
            round_delay: self.polling.round_delay_seconds,
            approve_retries: self.reservation.approve_retries,
            approve_retry_delay: Duration::from_secs(self.reservation.approve_retry_delay_seconds),
        }
    }

    pub fn recaptcha_settings(&self) -> RecaptchaSettings {
        RecaptchaSettings {
            api_key: self.captcha.api_key.clone(),
            site_key: self.captcha.site_key.clone(),
            service_url: self.captcha.service_url.clone(),
            solve_retries: self.captcha.solve_retries,
            poll_interval: Duration::from_secs(self.captcha.poll_interval_seconds),
            max_wait: Duration::from_secs(self.captcha.max_wait_seconds),
            probe_timeout: Duration::from_secs(self.captcha.probe_timeout_seconds),
        }
    }

    /// 把各元件接到同一個操作端、驗證碼守衛與通知管道上
    pub fn build_acquisition(
        &self,
        actuator: Arc<dyn RemoteActuator>,
        solver: Arc<dyn ChallengeSolver>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Acquisition> {
        let site = self.site()?;
        let guard = Arc::new(ChallengeGuard::new(solver, self.guard.max_depth));

        let session = SessionManager::new(
            actuator.clone(),
            guard.clone(),
            notifier.clone(),
            clock.clone(),
            site.clone(),
            self.auth_strategy()?,
            self.session_settings(),
        );
        let poller = SlotPoller::new(actuator.clone(), guard.clone(), site.clone(), self.poller_settings());
        let reservations = ReservationCoordinator::new(
            actuator.clone(),
            guard,
            notifier.clone(),
            clock.clone(),
            site,
            self.reservation_settings()?,
        );

        tracing::debug!(
            "Acquisition assembled: office {}, strategy {}",
            self.site.office_id,
            session.strategy_name()
        );
        Ok(Acquisition::new(
            actuator,
            notifier,
            clock,
            session,
            poller,
            reservations,
            self.run_settings(),
        ))
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
