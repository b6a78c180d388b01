use crate::domain::ports::ChallengeSolver;
use crate::utils::error::{ActuatorError, ChallengeError, GuardError};
use std::future::Future;
use std::sync::Arc;

/// 在每次遠端互動前後處理驗證碼 (reCAPTCHA) 干擾
pub struct ChallengeGuard {
    solver: Arc<dyn ChallengeSolver>,
    max_depth: u32,
}

impl ChallengeGuard {
    pub const DEFAULT_MAX_DEPTH: u32 = 5;

    pub fn new(solver: Arc<dyn ChallengeSolver>, max_depth: u32) -> Self {
        Self {
            solver,
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// 偵測本身出錯時視為沒有驗證碼，讓被包住的動作自然失敗
    pub async fn has_challenge(&self) -> bool {
        match self.solver.is_challenge_present().await {
            Ok(present) => {
                if present {
                    tracing::info!("🧩 Challenge detected");
                }
                present
            }
            Err(e) => {
                tracing::warn!("Challenge detection failed, assuming none: {}", e);
                false
            }
        }
    }

    pub async fn clear_challenge(&self) -> Result<(), ChallengeError> {
        tracing::info!("Solving challenge...");
        self.solver.solve().await?;
        tracing::info!("✅ Challenge solved");
        Ok(())
    }

    async fn clear_logged(&self, action: &str) {
        if let Err(e) = self.clear_challenge().await {
            tracing::warn!("Could not clear challenge before '{}': {}", action, e);
        }
    }

    /// 執行 `op`；只有「找不到目標」類錯誤且確實出現驗證碼時才重試，最多 `max_depth` 次
    pub async fn guard<T, F, Fut>(&self, action: &str, mut op: F) -> Result<T, GuardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActuatorError>>,
    {
        if self.has_challenge().await {
            self.clear_logged(action).await;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_missing_target() {
                return Err(GuardError::Action {
                    action: action.to_string(),
                    source: error,
                });
            }

            match &error {
                ActuatorError::Timeout { target, after } => {
                    tracing::debug!(
                        "[Attempt #{}] '{}': timed out after {:?} waiting for {}",
                        attempt,
                        action,
                        after,
                        target
                    );
                }
                _ => tracing::debug!("[Attempt #{}] '{}': {}", attempt, action, error),
            }

            if !self.has_challenge().await {
                return Err(GuardError::Action {
                    action: action.to_string(),
                    source: error,
                });
            }

            if attempt >= self.max_depth {
                tracing::error!(
                    "'{}' still blocked by a challenge after {} attempts",
                    action,
                    attempt
                );
                return Err(GuardError::Exhausted {
                    action: action.to_string(),
                    attempts: attempt,
                    last: error,
                });
            }

            tracing::warn!(
                "[Attempt #{}] '{}' was interrupted by a challenge. Trying again...",
                attempt,
                action
            );
            self.clear_logged(action).await;
        }
    }
}
