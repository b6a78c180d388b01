use crate::core::guard::ChallengeGuard;
use crate::core::site::{self, Site};
use crate::domain::model::{DateWindow, Slot};
use crate::domain::ports::{RemoteActuator, RemoteQuery};
use crate::utils::delay::{sleep_or_cancel, CancelToken, DelayBounds};
use crate::utils::error::PollError;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct FreeTimes {
    #[serde(default)]
    rows: Vec<FreeTimeRow>,
}

#[derive(Debug, Deserialize)]
struct FreeTimeRow {
    id: serde_json::Value,
    chtime: String,
}

impl FreeTimeRow {
    // 網站有時把 id 當字串回傳
    fn slot_id(&self) -> Option<u64> {
        match &self.id {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub question_id: u32,
    pub date_delay: DelayBounds,
}

pub struct SlotPoller {
    actuator: Arc<dyn RemoteActuator>,
    guard: Arc<ChallengeGuard>,
    site: Site,
    settings: PollerSettings,
}

impl SlotPoller {
    pub fn new(
        actuator: Arc<dyn RemoteActuator>,
        guard: Arc<ChallengeGuard>,
        site: Site,
        settings: PollerSettings,
    ) -> Self {
        Self {
            actuator,
            guard,
            site,
            settings,
        }
    }

    /// 由早到晚逐日查詢，第一個有空位的日期就直接回傳該日全部時段。
    /// 每個日期查詢前都會檢查取消與 `is_stale`，session 過期就回傳 `SessionStale`
    pub async fn poll_once<F>(
        &self,
        office_id: u32,
        window: &DateWindow,
        is_stale: F,
        cancel: &CancelToken,
    ) -> Result<Vec<Slot>, PollError>
    where
        F: Fn() -> bool + Sync,
    {
        if window.is_empty() {
            tracing::warn!("Date window is empty, nothing to poll");
            return Ok(Vec::new());
        }
        tracing::info!("Trying to get free slots with date range {}", window);

        let total = window.len();
        for (index, date) in window.iter().enumerate() {
            cancel.check()?;
            if is_stale() {
                tracing::info!("Session went stale, {} is left for the next round", date);
                return Err(PollError::SessionStale { date });
            }

            match self.query_date(office_id, date).await {
                Ok(slots) if !slots.is_empty() => {
                    tracing::info!("🎯 Found {} free slot(s) on {}! Processing...", slots.len(), date);
                    return Ok(slots);
                }
                Ok(_) => tracing::info!("No free slots on {}", date),
                Err(e) => tracing::error!("Failed to fetch free slots: {}. Continuing...", e),
            }

            if index + 1 < total {
                let delay = self.settings.date_delay.sample();
                tracing::debug!("Sleep for {:.1} seconds before the next date...", delay.as_secs_f64());
                sleep_or_cancel(delay, cancel).await?;
            }
        }

        Ok(Vec::new())
    }

    async fn query_date(&self, office_id: u32, date: NaiveDate) -> Result<Vec<Slot>, PollError> {
        let query = RemoteQuery::post(self.site.resolve(site::FREE_TIMES_PATH))
            .field("office_id", office_id)
            .field("date_of_admission", date.format("%Y-%m-%d"))
            .field("question_id", self.settings.question_id)
            .field("es_date", "")
            .field("es_time", "");

        let actuator = &*self.actuator;
        let query = &query;
        let response = self
            .guard
            .guard(&format!("query free slots for {}", date), move || async move {
                actuator.execute_remote_query(query).await
            })
            .await
            .map_err(|source| PollError::Query { date, source })?;

        let payload: FreeTimes =
            serde_json::from_str(&response.content).map_err(|source| PollError::Payload { date, source })?;

        let slots = payload
            .rows
            .iter()
            .filter_map(|row| match row.slot_id() {
                Some(id) => Some(Slot::new(id, date, row.chtime.clone())),
                None => {
                    tracing::warn!("Skipping slot row with unusable id {} on {}", row.id, date);
                    None
                }
            })
            .collect();
        Ok(slots)
    }
}
