use crate::core::poller::SlotPoller;
use crate::core::reservation::ReservationCoordinator;
use crate::core::session::SessionManager;
use crate::domain::model::{AuthSession, DateWindow, Event, Reservation, Slot};
use crate::domain::ports::{Clock, Notifier, RemoteActuator};
use crate::utils::delay::{sleep_or_cancel, CancelToken, DelayBounds};
use crate::utils::error::{AcquireError, ApprovalError, PollError, ReservationError, Result};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub office_id: u32,
    pub window_start_offset_days: u32,
    pub window_length_days: u32,
    pub round_delay: DelayBounds,
    pub approve_retries: u32,
    pub approve_retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Reserved(Slot),
    Cancelled,
    Failed(String),
}

enum Attempt {
    Won(Slot),
    Lost,
    SessionStale,
}

/// 一次完整的搶號流程：登入 → 輪詢 → 保留 → 確認
pub struct Acquisition {
    actuator: Arc<dyn RemoteActuator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    session: SessionManager,
    poller: SlotPoller,
    reservations: ReservationCoordinator,
    settings: RunSettings,
}

impl Acquisition {
    pub fn new(
        actuator: Arc<dyn RemoteActuator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        session: SessionManager,
        poller: SlotPoller,
        reservations: ReservationCoordinator,
        settings: RunSettings,
    ) -> Self {
        Self {
            actuator,
            notifier,
            clock,
            session,
            poller,
            reservations,
            settings,
        }
    }

    /// 執行到搶到、出錯或被取消為止；任何結束方式都會做 teardown
    pub async fn run(&self, cancel: &CancelToken) -> RunOutcome {
        let outcome = match self.acquire(cancel).await {
            Ok(slot) => {
                tracing::info!("🎉 Congratulations! Slot {} is secured!", slot);
                RunOutcome::Reserved(slot)
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!("🛑 Search stopped");
                RunOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(
                    "❌ Search failed: {} (Category: {:?}, Severity: {:?})",
                    e,
                    e.category(),
                    e.severity()
                );
                tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
                self.notifier
                    .emit(Event::Error {
                        message: e.user_friendly_message(),
                    })
                    .await;
                RunOutcome::Failed(e.to_string())
            }
        };

        self.teardown().await;
        outcome
    }

    async fn teardown(&self) {
        tracing::debug!("Releasing browser session state");
        if let Err(e) = self.actuator.clear_cookies().await {
            tracing::warn!("Failed to clear cookies during teardown: {}", e);
        }
    }

    fn window(&self) -> DateWindow {
        DateWindow::starting(
            self.clock.today(),
            self.settings.window_start_offset_days,
            self.settings.window_length_days,
        )
    }

    async fn acquire(&self, cancel: &CancelToken) -> Result<Slot> {
        let mut session = AuthSession::default();

        loop {
            cancel.check()?;
            self.session.authenticate(&mut session, cancel).await?;

            loop {
                if self.session.is_stale(&session) {
                    tracing::info!("Authentication session is too old. Re-authenticating...");
                    self.session.invalidate(&mut session).await;
                    break;
                }

                cancel.check()?;
                let window = self.window();
                let polled = self
                    .poller
                    .poll_once(self.settings.office_id, &window, || self.session.is_stale(&session), cancel)
                    .await;
                let slots = match polled {
                    Ok(slots) => slots,
                    Err(PollError::SessionStale { .. }) => {
                        tracing::info!("Authentication session expired mid-scan. Re-authenticating...");
                        self.session.invalidate(&mut session).await;
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };

                if !slots.is_empty() {
                    match self.try_candidates(slots, &session, cancel).await? {
                        Attempt::Won(slot) => return Ok(slot),
                        Attempt::Lost => {}
                        Attempt::SessionStale => {
                            self.session.invalidate(&mut session).await;
                            break;
                        }
                    }
                }

                let delay = self.settings.round_delay.sample();
                tracing::info!(
                    "Nothing secured during this round. Sleep for {:.1} seconds until next try...",
                    delay.as_secs_f64()
                );
                sleep_or_cancel(delay, cancel).await?;
            }
        }
    }

    /// 隨機順序嘗試候選時段，已被搶走就換下一個
    async fn try_candidates(
        &self,
        mut candidates: Vec<Slot>,
        session: &AuthSession,
        cancel: &CancelToken,
    ) -> Result<Attempt> {
        let mut seen = HashSet::new();
        candidates.retain(|slot| seen.insert(slot.identity()));
        candidates.shuffle(&mut rand::thread_rng());

        for slot in candidates {
            if self.session.is_stale(session) {
                return Ok(Attempt::SessionStale);
            }
            match self.reservations.reserve(&slot, cancel).await {
                Ok(reservation) => return self.secure(reservation, session, cancel).await,
                Err(ReservationError::AlreadyTaken { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!("Every candidate was already taken");
        Ok(Attempt::Lost)
    }

    /// 有限次數確認；保留過期就重新保留，絕不在期限後確認
    async fn secure(
        &self,
        mut reservation: Reservation,
        session: &AuthSession,
        cancel: &CancelToken,
    ) -> Result<Attempt> {
        let retries = self.settings.approve_retries.max(1);

        for attempt in 1..=retries {
            if cancel.is_cancelled() {
                self.abandon(&reservation, "the search was stopped").await;
                return Err(AcquireError::Cancelled);
            }
            if self.session.is_stale(session) {
                self.abandon(&reservation, "the sign-in session expired").await;
                return Ok(Attempt::SessionStale);
            }

            if reservation.is_expired_at(self.clock.now()) {
                self.abandon(&reservation, "it lapsed before approval").await;
                match self.reservations.reserve(&reservation.slot, cancel).await {
                    Ok(fresh) => reservation = fresh,
                    Err(ReservationError::AlreadyTaken { .. }) => return Ok(Attempt::Lost),
                    Err(e) => return Err(e.into()),
                }
            }

            match self.reservations.approve(&reservation).await {
                Ok(()) => return Ok(Attempt::Won(reservation.slot)),
                Err(ApprovalError::Expired { .. }) => {
                    tracing::warn!("[Attempt #{}] Reservation {} expired. Reserving again...", attempt, reservation.slot);
                }
                Err(ApprovalError::Other(e)) => {
                    tracing::warn!(
                        "[Attempt #{}] Cannot approve reservation {}: {}. Trying again...",
                        attempt,
                        reservation.slot,
                        e
                    );
                    if attempt < retries {
                        if let Err(cancelled) = sleep_or_cancel(self.settings.approve_retry_delay, cancel).await {
                            self.abandon(&reservation, "the search was stopped").await;
                            return Err(cancelled.into());
                        }
                    }
                }
            }
        }

        self.abandon(&reservation, "approval retries were exhausted").await;
        Ok(Attempt::Lost)
    }

    /// 結束該保留的生命週期 (start → failed)
    async fn abandon(&self, reservation: &Reservation, reason: &str) {
        tracing::warn!("Reservation {} abandoned: {}", reservation.slot, reason);
        self.notifier
            .emit(Event::Error {
                message: format!("Reservation for {} was abandoned because {}", reservation.slot, reason),
            })
            .await;
    }
}

struct ActiveRun {
    id: u64,
    cancel: CancelToken,
}

pub enum StartOutcome {
    Started(RunHandle),
    AlreadyRunning,
}

pub struct RunHandle {
    id: u64,
    cancel: CancelToken,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> RunOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(format!("search task aborted: {}", e)),
        }
    }
}

/// 持有唯一的背景搜尋任務，同一時間最多一個
pub struct Orchestrator {
    acquisition: Arc<Acquisition>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    next_id: AtomicU64,
}

fn lock(active: &Mutex<Option<ActiveRun>>) -> MutexGuard<'_, Option<ActiveRun>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Orchestrator {
    pub fn new(acquisition: Acquisition) -> Self {
        Self {
            acquisition: Arc::new(acquisition),
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn start(&self) -> StartOutcome {
        let mut active = lock(&self.active);
        if active.is_some() {
            tracing::info!("Search is already running");
            return StartOutcome::AlreadyRunning;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelToken::new();
        *active = Some(ActiveRun {
            id,
            cancel: cancel.clone(),
        });

        let acquisition = self.acquisition.clone();
        let slot = self.active.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            tracing::info!("🔛 Search #{} started", id);
            let outcome = acquisition.run(&token).await;
            let mut active = lock(&slot);
            if active.as_ref().map(|run| run.id) == Some(id) {
                *active = None;
            }
            outcome
        });

        StartOutcome::Started(RunHandle { id, cancel, join })
    }

    /// 要求目前的搜尋在下一個檢查點停下
    pub fn stop(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(run) => {
                tracing::info!("Stopping search #{}...", run.id);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }
}
