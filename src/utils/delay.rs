use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::utils::error::Cancelled;

/// 隨機延遲區間 (秒)，TOML 中寫成 `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct DelayBounds {
    min: Duration,
    max: Duration,
}

impl DelayBounds {
    pub fn new(min: Duration, max: Duration) -> Self {
        if max < min {
            Self { min: max, max: min }
        } else {
            Self { min, max }
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    pub fn zero() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// 在區間內均勻取一個延遲
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl TryFrom<[f64; 2]> for DelayBounds {
    type Error = String;

    fn try_from([min, max]: [f64; 2]) -> Result<Self, Self::Error> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 || max < 0.0 {
            return Err(format!(
                "delay bounds must be finite and non-negative, got [{}, {}]",
                min, max
            ));
        }
        if min > max {
            return Err(format!("delay lower bound {} exceeds upper bound {}", min, max));
        }
        let min = Duration::try_from_secs_f64(min).map_err(|e| format!("delay lower bound {}: {}", min, e))?;
        let max = Duration::try_from_secs_f64(max).map_err(|e| format!("delay upper bound {}: {}", max, e))?;
        Ok(Self { min, max })
    }
}

impl From<DelayBounds> for [f64; 2] {
    fn from(bounds: DelayBounds) -> Self {
        [bounds.min.as_secs_f64(), bounds.max.as_secs_f64()]
    }
}

/// 一次 run 的取消訊號，clone 之後共享同一個狀態
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// 檢查點：已取消就回傳 `Cancelled`
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // sender 存活於 token 本身，wait_for 不會因關閉而提早返回
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// 可被取消的 sleep
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancelToken) -> Result<(), Cancelled> {
    cancel.check()?;
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(Cancelled),
    }
}
