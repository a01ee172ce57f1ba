//! Per-caller rate-limiter service.
//!
//! Wraps the pure [`RateLimitCounters`] policy with persistence: counters are
//! read from the [`KeyValueStore`] on every check (so day rollover is detected
//! lazily) and written back immediately after each successful run.

use std::sync::Arc;

use pipeline::{
    CallerId, KeyValueStore, RateLimitCounters, RateLimitDecision, RateLimitPolicy, StoreError,
    Timestamp,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Enforces cooldown and daily caps for one caller.
///
/// Read-modify-write cycles on the caller's counters are serialised by an
/// internal lock; share one instance (behind an `Arc`) between all executors
/// acting for the same caller.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    caller: CallerId,
    policy: RateLimitPolicy,
    lock: Mutex<()>,
}

impl RateLimiter {
    /// Creates a limiter persisting through `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, caller: CallerId, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            caller,
            policy,
            lock: Mutex::new(()),
        }
    }

    /// The limits being enforced.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    fn key(&self) -> String {
        format!("rate_limit/{}", self.caller)
    }

    /// Loads the counters as of `now`, resetting the daily count in memory if
    /// the stored day is not today. Nothing is written.
    async fn read(&self, now: Timestamp) -> Result<RateLimitCounters, StoreError> {
        let today = now.day_key(self.policy.utc_offset);
        let mut counters = match self.store.get(&self.key()).await? {
            None => RateLimitCounters::fresh(today),
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(caller = %self.caller, error = %e, "unreadable rate-limit counters; starting fresh");
                RateLimitCounters::fresh(today)
            }),
        };
        if counters.roll_over(today) {
            debug!(caller = %self.caller, %today, "daily counter rolled over");
        }
        Ok(counters)
    }

    /// Decides whether a run may start at `now`. Never mutates stored state.
    pub async fn check_allowed(&self, now: Timestamp) -> Result<RateLimitDecision, StoreError> {
        let _guard = self.lock.lock().await;
        let counters = self.read(now).await?;
        let decision = counters.evaluate(now, &self.policy);
        debug!(
            caller = %self.caller,
            daily_count = counters.daily_count,
            ?decision,
            "rate limit checked"
        );
        Ok(decision)
    }

    /// Records one successful run at `now` and persists the counters before
    /// returning.
    pub async fn record_success(&self, now: Timestamp) -> Result<RateLimitCounters, StoreError> {
        let _guard = self.lock.lock().await;
        let mut counters = self.read(now).await?;
        counters.record_success(now, &self.policy);

        let json = serde_json::to_string(&counters).map_err(|e| StoreError::Serialization {
            key: self.key(),
            message: e.to_string(),
        })?;
        self.store.put(&self.key(), &json).await?;

        info!(
            caller = %self.caller,
            daily_count = counters.daily_count,
            "recorded successful generation"
        );
        Ok(counters)
    }

    /// Current counters as of `now`, for status reporting.
    pub async fn snapshot(&self, now: Timestamp) -> Result<RateLimitCounters, StoreError> {
        let _guard = self.lock.lock().await;
        self.read(now).await
    }
}
