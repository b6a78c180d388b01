use crate::core::guard::ChallengeGuard;
use crate::core::site::{self, Site};
use crate::domain::model::{AuthSession, Event};
use crate::domain::ports::{Clock, Condition, ElementHandle, Locator, Notifier, RemoteActuator};
use crate::utils::delay::CancelToken;
use crate::utils::error::{AuthError, GuardError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// `now - started_at > threshold`，剛好等於門檻時不算過期；
/// 超出 `chrono::Duration` 範圍的門檻永遠不會到
pub fn session_expired(started_at: DateTime<Utc>, threshold_seconds: u64, now: DateTime<Utc>) -> bool {
    match i64::try_from(threshold_seconds).ok().and_then(chrono::Duration::try_seconds) {
        Some(threshold) => now.signed_duration_since(started_at) > threshold,
        None => false,
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub retries: u32,
    pub step_timeout: Duration,
    pub reauth_threshold_seconds: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retries: 5,
            step_timeout: Duration::from_secs(30),
            reauth_threshold_seconds: 3 * 60 * 60,
        }
    }
}

/// 登入流程中各步驟共用的操作
pub struct AuthContext<'a> {
    pub actuator: &'a dyn RemoteActuator,
    pub guard: &'a ChallengeGuard,
    pub notifier: &'a dyn Notifier,
    pub step_timeout: Duration,
    pub cancel: &'a CancelToken,
}

impl AuthContext<'_> {
    async fn element(&self, condition: Condition) -> Result<ElementHandle, GuardError> {
        let actuator = self.actuator;
        let timeout = self.step_timeout;
        let condition = &condition;
        self.guard
            .guard(&format!("locate {}", condition.locator()), move || async move {
                actuator.wait_until(condition, Some(timeout)).await
            })
            .await
    }

    pub async fn click(&self, locator: Locator) -> Result<(), GuardError> {
        let actuator = self.actuator;
        let timeout = self.step_timeout;
        let condition = Condition::Clickable(locator);
        let condition = &condition;
        self.guard
            .guard(&format!("click {}", condition.locator()), move || async move {
                let element = actuator.wait_until(condition, Some(timeout)).await?;
                actuator.click(&element).await
            })
            .await
    }

    pub async fn fill(&self, locator: Locator, text: &str) -> Result<(), GuardError> {
        let actuator = self.actuator;
        let element = self.element(Condition::Present(locator)).await?;
        let element = &element;
        self.guard
            .guard("type into form field", move || async move {
                actuator.send_keys(element, text).await
            })
            .await
    }

    pub async fn read_attribute(&self, locator: Locator, name: &str) -> Result<Option<String>, GuardError> {
        let actuator = self.actuator;
        let element = self.element(Condition::Visible(locator)).await?;
        let element = &element;
        self.guard
            .guard(&format!("read attribute {}", name), move || async move {
                actuator.attribute(element, name).await
            })
            .await
    }

    /// 唯一沒有上限的等待：直到外部核准讓 `locator` 可點擊，或 run 被取消
    pub async fn await_external_approval(&self, locator: Locator) -> Result<ElementHandle, AuthError> {
        let condition = Condition::Clickable(locator);
        let mut waited = Duration::ZERO;
        loop {
            self.cancel.check()?;
            match self.actuator.wait_until(&condition, Some(self.step_timeout)).await {
                Ok(element) => return Ok(element),
                Err(e) if e.is_missing_target() => {
                    waited += self.step_timeout;
                    tracing::debug!("Still waiting for external approval ({:?} so far)", waited);
                }
                Err(e) => {
                    return Err(AuthError::Step(GuardError::Action {
                        action: "await external approval".to_string(),
                        source: e,
                    }))
                }
            }
        }
    }
}

/// 登入策略，啟動時依設定選一個
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 從登入入口頁到「接受條款」按鈕出現為止的步驟
    async fn sign_in(&self, ctx: &AuthContext<'_>) -> Result<(), AuthError>;
}

/// 透過第三方身分代理 (BankID) 登入，需要人工在手機上核准
pub struct DelegatedIdentity {
    bank_name: String,
}

impl DelegatedIdentity {
    pub fn new(bank_name: impl Into<String>) -> Self {
        Self {
            bank_name: bank_name.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for DelegatedIdentity {
    fn name(&self) -> &'static str {
        "delegated-identity"
    }

    async fn sign_in(&self, ctx: &AuthContext<'_>) -> Result<(), AuthError> {
        ctx.click(site::bank_id_link()).await?;
        ctx.click(site::bank_selector()).await?;
        ctx.click(site::bank_option(&self.bank_name)).await?;
        ctx.click(site::bank_choose_button()).await?;

        let link = ctx
            .read_attribute(site::approval_qr_code(), "title")
            .await?
            .filter(|link| !link.trim().is_empty())
            .ok_or(AuthError::MissingApprovalLink)?;

        ctx.notifier.emit(Event::AwaitingApproval { link }).await;
        tracing::info!("📨 Sent approval link to the operator. Waiting for approval...");

        ctx.await_external_approval(site::accept_terms_button()).await?;
        Ok(())
    }
}

/// 以本機金鑰檔與密碼直接登入
pub struct KeyFile {
    key_path: PathBuf,
    password: String,
}

impl KeyFile {
    pub fn new(key_path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for KeyFile {
    fn name(&self) -> &'static str {
        "key-file"
    }

    async fn sign_in(&self, ctx: &AuthContext<'_>) -> Result<(), AuthError> {
        ctx.click(site::key_file_link()).await?;
        // 先點提示文字，網站才會把後續上傳當成正常操作
        ctx.click(site::key_file_prompt()).await?;
        ctx.fill(site::key_file_input(), &self.key_path.to_string_lossy()).await?;
        ctx.fill(site::key_password_input(), &self.password).await?;
        ctx.click(site::key_sign_button()).await?;
        Ok(())
    }
}

pub struct SessionManager {
    actuator: Arc<dyn RemoteActuator>,
    guard: Arc<ChallengeGuard>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    site: Site,
    strategy: Box<dyn AuthStrategy>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(
        actuator: Arc<dyn RemoteActuator>,
        guard: Arc<ChallengeGuard>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        site: Site,
        strategy: Box<dyn AuthStrategy>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            actuator,
            guard,
            notifier,
            clock,
            site,
            strategy,
            settings,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// 登入；找不到元素或逾時會整段重來，超過上限回傳 `Exhausted`
    pub async fn authenticate(&self, session: &mut AuthSession, cancel: &CancelToken) -> Result<(), AuthError> {
        tracing::info!(
            "Authentication to {} started ({})...",
            self.site.home(),
            self.strategy.name()
        );

        let retries = self.settings.retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            cancel.check()?;

            match self.attempt(cancel).await {
                Ok(()) => break,
                Err(AuthError::Step(e)) if e.is_missing_target() => {
                    if attempt >= retries {
                        tracing::error!("Cannot authenticate: retries limit exceeded");
                        return Err(AuthError::Exhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }
                    tracing::warn!("[Attempt #{}] Failed to authenticate: {}. Trying again...", attempt, e);
                }
                Err(e) => return Err(e),
            }
        }

        session.start(self.clock.now());
        tracing::info!("✅ Authorized to {} successfully!", self.site.home());
        self.notifier.emit(Event::AuthSucceeded).await;
        Ok(())
    }

    async fn attempt(&self, cancel: &CancelToken) -> Result<(), AuthError> {
        let ctx = AuthContext {
            actuator: &*self.actuator,
            guard: &self.guard,
            notifier: &*self.notifier,
            step_timeout: self.settings.step_timeout,
            cancel,
        };

        let actuator = ctx.actuator;
        let home = self.site.home();
        let home = home.as_str();
        self.guard
            .guard("open home page", move || async move { actuator.navigate(home).await })
            .await?;

        ctx.click(site::terms_checkbox()).await?;
        ctx.click(site::continue_button()).await?;
        self.strategy.sign_in(&ctx).await?;
        ctx.click(site::accept_terms_button()).await?;

        if self.guard.has_challenge().await {
            if let Err(e) = self.guard.clear_challenge().await {
                tracing::warn!("Challenge after sign-in was not cleared: {}", e);
            }
        }
        Ok(())
    }

    /// session 不存在或已超過重新登入門檻
    pub fn is_stale(&self, session: &AuthSession) -> bool {
        match session.started_at() {
            Some(started_at) => session_expired(
                started_at,
                self.settings.reauth_threshold_seconds,
                self.clock.now(),
            ),
            None => true,
        }
    }

    /// 重新登入前丟掉 cookie 等 session 狀態
    pub async fn invalidate(&self, session: &mut AuthSession) {
        session.invalidate();
        if let Err(e) = self.actuator.clear_cookies().await {
            tracing::warn!("Failed to clear cookies: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{epoch, not_found, FakeActuator, FakeSolver, ManualClock, RecordingNotifier};
    use crate::utils::error::ActuatorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        actuator: Arc<FakeActuator>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
        manager: SessionManager,
    }

    fn harness(actuator: FakeActuator, strategy: Box<dyn AuthStrategy>) -> Harness {
        let actuator = Arc::new(actuator);
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::at(epoch()));
        let guard = Arc::new(ChallengeGuard::new(Arc::new(FakeSolver::absent()), 5));
        let manager = SessionManager::new(
            actuator.clone(),
            guard,
            notifier.clone(),
            clock.clone(),
            Site::parse("https://eq.hsc.gov.ua").unwrap(),
            strategy,
            SessionSettings::default(),
        );
        Harness {
            actuator,
            notifier,
            clock,
            manager,
        }
    }

    #[test]
    fn test_session_expired_boundary() {
        let t0 = epoch();
        assert!(!session_expired(t0, 10800, t0 + chrono::Duration::seconds(10799)));
        assert!(!session_expired(t0, 10800, t0 + chrono::Duration::seconds(10800)));
        assert!(session_expired(t0, 10800, t0 + chrono::Duration::seconds(10801)));
        assert!(!session_expired(t0, 10_000_000_000_000_000, t0 + chrono::Duration::days(365)));
    }

    #[tokio::test]
    async fn test_key_file_authentication_starts_session() {
        let h = harness(FakeActuator::new(), Box::new(KeyFile::new("/keys/Key-6.dat", "s3cret")));
        let mut session = AuthSession::default();

        h.manager.authenticate(&mut session, &CancelToken::new()).await.unwrap();

        assert_eq!(session.started_at(), Some(epoch()));
        assert_eq!(h.notifier.kinds(), vec!["auth_succeeded"]);
        let calls = h.actuator.calls();
        assert!(calls.contains(&"keys:id=PKeyFileInput:/keys/Key-6.dat".to_string()));
        assert!(calls.contains(&"keys:id=PKeyPassword:s3cret".to_string()));
        assert_eq!(
            calls.last().map(String::as_str),
            Some("click:id=btnAcceptUserDataAgreement")
        );
    }

    #[tokio::test]
    async fn test_delegated_identity_waits_for_approval() {
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = pending.clone();
        let actuator = FakeActuator::new().on_wait(move |condition| {
            if condition.locator() == &site::accept_terms_button() && counter.fetch_add(1, Ordering::SeqCst) < 3 {
                return Err(ActuatorError::Timeout {
                    target: condition.to_string(),
                    after: Duration::from_secs(30),
                });
            }
            Ok(ElementHandle(condition.locator().to_string()))
        });
        let h = harness(actuator, Box::new(DelegatedIdentity::new("УНІВЕРСАЛ БАНК")));
        let mut session = AuthSession::default();

        h.manager.authenticate(&mut session, &CancelToken::new()).await.unwrap();

        assert_eq!(
            h.notifier.events(),
            vec![
                Event::AwaitingApproval {
                    link: "https://id.bank.example/approve/42".to_string()
                },
                Event::AuthSucceeded,
            ]
        );
        assert!(pending.load(Ordering::SeqCst) >= 4);
        assert!(session.is_live());
    }

    #[tokio::test]
    async fn test_approval_wait_honours_cancellation() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let actuator = FakeActuator::new().on_wait(move |condition| {
            if condition.locator() == &site::accept_terms_button() {
                trigger.cancel();
                return Err(not_found("#btnAcceptUserDataAgreement"));
            }
            Ok(ElementHandle(condition.locator().to_string()))
        });
        let h = harness(actuator, Box::new(DelegatedIdentity::new("УНІВЕРСАЛ БАНК")));
        let mut session = AuthSession::default();

        let result = h.manager.authenticate(&mut session, &cancel).await;

        assert!(matches!(result, Err(AuthError::Cancelled(_))));
        assert!(!session.is_live());
        assert_eq!(h.notifier.kinds(), vec!["awaiting_approval"]);
    }

    #[tokio::test]
    async fn test_retries_whole_sequence_on_missing_element() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let actuator = FakeActuator::new().on_wait(move |condition| {
            if condition.locator() == &site::terms_checkbox() && counter.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(not_found("input[type=checkbox]"));
            }
            Ok(ElementHandle(condition.locator().to_string()))
        });
        let h = harness(actuator, Box::new(KeyFile::new("/keys/Key-6.dat", "s3cret")));
        let mut session = AuthSession::default();

        h.manager.authenticate(&mut session, &CancelToken::new()).await.unwrap();

        assert_eq!(h.actuator.count("navigate:"), 3);
        assert!(session.is_live());
    }

    #[tokio::test]
    async fn test_exhausts_after_retry_budget() {
        let actuator = FakeActuator::new().on_wait(|condition| Err(not_found(&condition.to_string())));
        let h = harness(actuator, Box::new(KeyFile::new("/keys/Key-6.dat", "s3cret")));
        let mut session = AuthSession::default();

        let result = h.manager.authenticate(&mut session, &CancelToken::new()).await;

        assert!(matches!(result, Err(AuthError::Exhausted { attempts: 5, .. })));
        assert_eq!(h.actuator.count("navigate:"), 5);
        assert!(h.notifier.events().is_empty());
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn test_unclassified_failure_is_not_retried() {
        let actuator = FakeActuator::new().on_wait(|_| {
            Err(ActuatorError::Protocol {
                code: "invalid session id".to_string(),
                message: "session deleted".to_string(),
            })
        });
        let h = harness(actuator, Box::new(KeyFile::new("/keys/Key-6.dat", "s3cret")));
        let mut session = AuthSession::default();

        let result = h.manager.authenticate(&mut session, &CancelToken::new()).await;

        assert!(matches!(result, Err(AuthError::Step(_))));
        assert_eq!(h.actuator.count("navigate:"), 1);
    }

    #[tokio::test]
    async fn test_staleness_follows_threshold_and_invalidate_clears_cookies() {
        let h = harness(FakeActuator::new(), Box::new(KeyFile::new("/keys/Key-6.dat", "s3cret")));
        let mut session = AuthSession::default();
        assert!(h.manager.is_stale(&session));

        h.manager.authenticate(&mut session, &CancelToken::new()).await.unwrap();
        assert!(!h.manager.is_stale(&session));

        h.clock.advance(chrono::Duration::seconds(10800));
        assert!(!h.manager.is_stale(&session));
        h.clock.advance(chrono::Duration::seconds(1));
        assert!(h.manager.is_stale(&session));

        h.manager.invalidate(&mut session).await;
        assert!(!session.is_live());
        assert_eq!(h.actuator.count("clear_cookies"), 1);
    }
}
