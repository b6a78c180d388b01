use crate::core::guard::ChallengeGuard;
use crate::core::site::{self, Site};
use crate::domain::model::{Event, Reservation, Slot};
use crate::domain::ports::{Clock, Condition, Notifier, RemoteActuator, RemoteQuery};
use crate::utils::delay::{sleep_or_cancel, CancelToken, DelayBounds};
use crate::utils::error::{ActuatorError, ApprovalError, ReservationError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReservationSettings {
    pub question_id: u32,
    pub email: String,
    /// 由網站決定的硬性期限
    pub grace_window: chrono::Duration,
    pub pre_reserve_delay: DelayBounds,
    pub step_timeout: Duration,
}

pub struct ReservationCoordinator {
    actuator: Arc<dyn RemoteActuator>,
    guard: Arc<ChallengeGuard>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    site: Site,
    settings: ReservationSettings,
}

impl ReservationCoordinator {
    pub fn new(
        actuator: Arc<dyn RemoteActuator>,
        guard: Arc<ChallengeGuard>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        site: Site,
        settings: ReservationSettings,
    ) -> Self {
        Self {
            actuator,
            guard,
            notifier,
            clock,
            site,
            settings,
        }
    }

    pub async fn reserve(&self, slot: &Slot, cancel: &CancelToken) -> Result<Reservation, ReservationError> {
        let delay = self.settings.pre_reserve_delay.sample();
        tracing::info!(
            "Reserving slot {}... Sleep {:.1} seconds first...",
            slot,
            delay.as_secs_f64()
        );
        sleep_or_cancel(delay, cancel).await?;

        let query = RemoteQuery::post(self.site.resolve(site::RESERVE_PATH))
            .field("id_chtime", slot.id)
            .field("question_id", self.settings.question_id)
            .field("email", &self.settings.email);

        let actuator = &*self.actuator;
        let query = &query;
        let response = self
            .guard
            .guard(&format!("reserve slot {}", slot), move || async move {
                actuator.execute_remote_query(query).await
            })
            .await?;

        if response.content.trim() == site::ALREADY_TAKEN_SENTINEL {
            tracing::warn!("Cannot reserve slot {}. Seems it's already taken.", slot);
            return Err(ReservationError::AlreadyTaken { slot: slot.clone() });
        }

        let handle = response
            .redirect
            .as_deref()
            .map(str::trim)
            .filter(|redirect| !redirect.is_empty())
            .ok_or_else(|| ReservationError::MalformedResponse {
                slot: slot.clone(),
                message: format!("no confirmation location in response '{}'", response.content),
            })?;

        let reservation = Reservation::new(
            slot.clone(),
            self.site.resolve(handle),
            self.clock.now(),
            self.settings.grace_window,
        );
        tracing::info!(
            "🔒 Reserved slot {}! Must be approved before {}",
            slot,
            reservation.expires_at
        );
        self.notifier
            .emit(Event::ReservationStarted { slot: slot.clone() })
            .await;
        Ok(reservation)
    }

    fn ensure_live(&self, reservation: &Reservation) -> Result<(), ApprovalError> {
        if reservation.is_expired_at(self.clock.now()) {
            tracing::warn!(
                "Reservation {} expired at {}",
                reservation.slot,
                reservation.expires_at
            );
            return Err(ApprovalError::Expired {
                expires_at: reservation.expires_at,
            });
        }
        Ok(())
    }

    /// 過期的保留一律回傳 `Expired`，不會點確認
    pub async fn approve(&self, reservation: &Reservation) -> Result<(), ApprovalError> {
        self.ensure_live(reservation)?;
        tracing::info!("Approving reservation {}...", reservation.slot);

        let actuator = &*self.actuator;
        let timeout = self.settings.step_timeout;
        let handle = reservation.handle.as_str();
        self.guard
            .guard("open reservation", move || async move {
                actuator.navigate(handle).await?;
                actuator.wait_for_url(handle, timeout).await
            })
            .await?;

        let condition = Condition::Clickable(site::confirm_reservation_button());
        let condition = &condition;
        let button = self
            .guard
            .guard("locate confirm button", move || async move {
                actuator.wait_until(condition, Some(timeout)).await
            })
            .await?;

        self.ensure_live(reservation)?;
        let button = &button;
        self.guard
            .guard("confirm reservation", move || async move { actuator.click(button).await })
            .await?;

        tracing::info!("✅ Reservation {} approved!", reservation.slot);
        self.notifier
            .emit(Event::ReservationApproved {
                slot: reservation.slot.clone(),
            })
            .await;

        if let Err(e) = self.forward_artifact(&reservation.slot).await {
            tracing::error!("Error during confirmation download: {}", e);
        }
        Ok(())
    }

    /// 下載確認 PDF 後直接轉給通知管道，本機不留存
    async fn forward_artifact(&self, slot: &Slot) -> Result<(), ActuatorError> {
        let link = self
            .actuator
            .wait_until(
                &Condition::Present(site::artifact_link(slot.date)),
                Some(self.settings.step_timeout),
            )
            .await?;
        let Some(href) = self.actuator.attribute(&link, "href").await? else {
            tracing::warn!("Confirmation link for {} has no target", slot);
            return Ok(());
        };

        let bytes = self.actuator.fetch_bytes(&self.site.resolve(&href)).await?;
        tracing::debug!("Downloaded confirmation ({} bytes)", bytes.len());
        self.notifier
            .emit(Event::ArtifactAvailable {
                bytes,
                filename: site::artifact_filename(slot.date),
            })
            .await;
        Ok(())
    }
}
