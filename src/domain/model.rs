use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 一個可預約的時段，`(id, date)` 為識別
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub id: u64,
    pub date: NaiveDate,
    pub time: String,
}

impl Slot {
    pub fn new(id: u64, date: NaiveDate, time: impl Into<String>) -> Self {
        Self {
            id,
            date,
            time: time.into(),
        }
    }

    pub fn identity(&self) -> (u64, NaiveDate) {
        (self.id, self.date)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (#{})", self.date.format("%Y-%m-%d"), self.time, self.id)
    }
}

/// 暫時保留的時段，寬限期一過就失效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub slot: Slot,
    pub handle: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(slot: Slot, handle: String, created_at: DateTime<Utc>, grace_window: Duration) -> Self {
        Self {
            slot,
            handle,
            created_at,
            expires_at: created_at + grace_window,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// 登入 session：時間錨點加上存活旗標
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSession {
    started_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
    }

    pub fn invalidate(&mut self) {
        self.started_at = None;
    }

    pub fn is_live(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

/// 送給操作者的單向通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    AwaitingApproval { link: String },
    AuthSucceeded,
    ReservationStarted { slot: Slot },
    ReservationApproved { slot: Slot },
    ArtifactAvailable { bytes: Vec<u8>, filename: String },
    Error { message: String },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::AwaitingApproval { .. } => "awaiting_approval",
            Event::AuthSucceeded => "auth_succeeded",
            Event::ReservationStarted { .. } => "reservation_started",
            Event::ReservationApproved { .. } => "reservation_approved",
            Event::ArtifactAvailable { .. } => "artifact_available",
            Event::Error { .. } => "error",
        }
    }
}

/// 連續日期區間，由早到晚掃描
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    dates: Vec<NaiveDate>,
}

impl DateWindow {
    /// 從 `today + offset_days` 起連續 `length_days` 天
    pub fn starting(today: NaiveDate, offset_days: u32, length_days: u32) -> Self {
        let dates = (0..length_days)
            .filter_map(|i| today.checked_add_days(chrono::Days::new(u64::from(offset_days) + u64::from(i))))
            .collect();
        Self { dates }
    }

    pub fn from_dates(mut dates: Vec<NaiveDate>) -> Self {
        dates.sort();
        dates.dedup();
        Self { dates }
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates.iter().copied()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => write!(f, "[{}..{}]", first, last),
            _ => write!(f, "[]"),
        }
    }
}
