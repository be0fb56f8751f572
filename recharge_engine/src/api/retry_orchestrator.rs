//! Bounded-retry orchestration for failed recharge dispatches.
//!
//! Every recharge dispatch that fails with a retryable provider code gets a single in-process
//! timer. When the timer fires, the record is claimed back from `RetryPending`, the persisted
//! request payload is re-issued, and the outcome is settled again. After [`MAX_ATTEMPTS`]
//! consecutive failures the recharge is parked as `Failed` and left for manual follow-up.
//!
//! Timers live only in memory. A periodic [`RetryOrchestrator::reconcile`] sweep picks up
//! records whose scheduled time has passed with no timer attached (typically after a process
//! restart) and re-arms them with a short delay.

use std::{collections::HashMap, fmt::Display, sync::Arc};

use chrono::{Duration, Utc};
use log::*;
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    api::order_flow_api::finalize_successful_recharge,
    db_types::{Order, Recharge, RechargeStatus},
    traits::{FulfillmentDatabase, FulfillmentError, MetricsDatabase, RechargeProvider, RechargeRequest},
};

/// Hard ceiling on dispatch attempts per recharge, the initial dispatch included.
pub const MAX_ATTEMPTS: i64 = 3;

/// Synthetic code for transport-level failures, which carry no provider code of their own.
pub(crate) const TRANSPORT_ERROR_CODE: i64 = -1;

/// Delay applied when the reconcile sweep re-arms a record whose timer was lost.
const RECOVERY_DELAY_SECS: i64 = 10;

//--------------------------------------     Error classification   -----------------------------------------------

/// Retry posture for a provider error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The provider throttled us. Back off briefly and try again soon.
    RateLimit,
    /// A transient provider or transport fault. Back off on a slower schedule.
    RetryableInternal,
    /// Retrying cannot succeed. Park the recharge immediately.
    Fatal,
}

/// The closed set of provider error codes the orchestrator knows how to classify.
///
/// Codes outside this set are treated as fatal: an unknown failure mode is not something to
/// hammer the provider with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RechargeErrorCode {
    RateLimited,
    ProviderBusy,
    ProviderTimeout,
    TransportFailure,
    InsufficientProviderBalance,
    InvalidTargetAccount,
    Other(i64),
}

impl RechargeErrorCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            3001 => Self::RateLimited,
            2001 => Self::ProviderBusy,
            2002 => Self::ProviderTimeout,
            1001 => Self::InsufficientProviderBalance,
            1002 => Self::InvalidTargetAccount,
            TRANSPORT_ERROR_CODE => Self::TransportFailure,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::RateLimited => 3001,
            Self::ProviderBusy => 2001,
            Self::ProviderTimeout => 2002,
            Self::InsufficientProviderBalance => 1001,
            Self::InvalidTargetAccount => 1002,
            Self::TransportFailure => TRANSPORT_ERROR_CODE,
            Self::Other(code) => *code,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited => ErrorClass::RateLimit,
            Self::ProviderBusy | Self::ProviderTimeout | Self::TransportFailure => ErrorClass::RetryableInternal,
            Self::InsufficientProviderBalance | Self::InvalidTargetAccount | Self::Other(_) => ErrorClass::Fatal,
        }
    }
}

impl Display for RechargeErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::ProviderBusy => write!(f, "provider busy"),
            Self::ProviderTimeout => write!(f, "provider timeout"),
            Self::TransportFailure => write!(f, "transport failure"),
            Self::InsufficientProviderBalance => write!(f, "insufficient provider balance"),
            Self::InvalidTargetAccount => write!(f, "invalid target account"),
            Self::Other(code) => write!(f, "unclassified provider error ({code})"),
        }
    }
}

/// The wait before re-dispatching after the `attempt`-th consecutive failure.
///
/// Rate-limit failures back off linearly, 30s per attempt, capped at 120s. Other retryable
/// failures follow a slower fixed schedule of 3, 13 and 28 minutes, then 30 minutes for any
/// attempt beyond the table. Fatal classes are never scheduled, so they get a zero delay.
pub fn retry_delay(class: ErrorClass, attempt: i64) -> Duration {
    const INTERNAL_SCHEDULE_MIN: [i64; 3] = [3, 13, 28];
    let attempt = attempt.max(1);
    match class {
        ErrorClass::RateLimit => Duration::seconds((30 * attempt).min(120)),
        ErrorClass::RetryableInternal => {
            let minutes = INTERNAL_SCHEDULE_MIN.get((attempt - 1) as usize).copied().unwrap_or(30);
            Duration::minutes(minutes)
        },
        ErrorClass::Fatal => Duration::zero(),
    }
}

//--------------------------------------     RetryStats             -----------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RetryCodeCount {
    pub code: i64,
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryStats {
    /// Number of recharges currently waiting on a retry timer.
    pub queue_depth: i64,
    pub by_error_code: Vec<RetryCodeCount>,
    pub max_attempts: i64,
}

//--------------------------------------     RetryOrchestrator      -----------------------------------------------

pub struct RetryOrchestrator<B, P> {
    db: B,
    provider: Arc<P>,
    /// One live timer per recharge id. Re-arming a record replaces (and aborts) its old timer.
    timers: Mutex<HashMap<i64, JoinHandle<()>>>,
    sweep_interval: Duration,
}

impl<B, P> RetryOrchestrator<B, P>
where
    B: FulfillmentDatabase + MetricsDatabase + Clone + Send + Sync + 'static,
    P: RechargeProvider + Send + Sync + 'static,
{
    pub fn new(db: B, provider: Arc<P>, sweep_interval: Duration) -> Self {
        Self { db, provider, timers: Mutex::new(HashMap::new()), sweep_interval }
    }

    /// Issues a recharge request against the provider and settles the outcome.
    ///
    /// A successful outcome completes the order and applies the sales delta. A failed outcome is
    /// classified and either scheduled for retry or parked as `Failed`. Both the initial dispatch
    /// (from the order flow) and timer-driven re-dispatches go through here, so the attempt
    /// counter and the persisted payload stay consistent between the two paths.
    pub async fn dispatch(
        self: &Arc<Self>,
        order: &Order,
        recharge: &Recharge,
        request: &RechargeRequest,
    ) -> Result<RechargeStatus, FulfillmentError> {
        let payload = serde_json::to_string(request)
            .map_err(|e| FulfillmentError::Serialization(format!("recharge request for order #{}: {e}", order.id)))?;
        self.db.record_recharge_dispatch(recharge.id, &payload).await?;
        let attempt = recharge.attempts + 1;
        debug!(
            "📶️ Dispatching recharge #{} for order {} (attempt {attempt} of {MAX_ATTEMPTS})",
            recharge.id, order.order_number
        );
        match self.provider.send_recharge(request).await {
            Ok(outcome) if outcome.is_success() => {
                info!("📶️ Recharge #{} for order {} delivered by provider", recharge.id, order.order_number);
                finalize_successful_recharge(&self.db, order.id).await?;
                Ok(RechargeStatus::Approved)
            },
            Ok(outcome) => self.settle_failure(recharge.id, attempt, outcome.code, &outcome.message).await,
            Err(e) => self.settle_failure(recharge.id, attempt, TRANSPORT_ERROR_CODE, &e.to_string()).await,
        }
    }

    /// Classifies a failed dispatch and decides the record's fate.
    async fn settle_failure(
        self: &Arc<Self>,
        recharge_id: i64,
        attempts: i64,
        code: i64,
        message: &str,
    ) -> Result<RechargeStatus, FulfillmentError> {
        let error = RechargeErrorCode::from_code(code);
        if error.class() == ErrorClass::Fatal {
            warn!("📶️ Recharge #{recharge_id} failed fatally ({error}): {message}");
            let recharge = self.db.fail_recharge(recharge_id, code, message).await?;
            return Ok(recharge.status);
        }
        if attempts >= MAX_ATTEMPTS {
            warn!("📶️ Recharge #{recharge_id} exhausted its {MAX_ATTEMPTS} attempts ({error}): {message}");
            let recharge = self.db.fail_recharge(recharge_id, code, message).await?;
            return Ok(recharge.status);
        }
        let delay = retry_delay(error.class(), attempts);
        let due_at = Utc::now() + delay;
        let recharge = self.db.schedule_recharge_retry(recharge_id, attempts, due_at, code, message).await?;
        info!(
            "📶️ Recharge #{recharge_id} failed ({error}), attempt {attempts} of {MAX_ATTEMPTS}. Retrying at {due_at}"
        );
        self.arm_timer(recharge.id, delay).await;
        Ok(recharge.status)
    }

    /// Arms (or replaces) the single in-process timer for a recharge.
    async fn arm_timer(self: &Arc<Self>, recharge_id: i64, delay: Duration) {
        let wait = delay.to_std().unwrap_or_default();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            this.run_due_retry(recharge_id).await;
        });
        if let Some(old) = self.timers.lock().await.insert(recharge_id, handle) {
            old.abort();
        }
    }

    /// Executes the retry for a recharge whose timer has fired.
    ///
    /// The record must still be in `RetryPending` to be claimed. If it is not (the order was
    /// refunded in the meantime, or another path already resolved it), the retry is dropped
    /// silently.
    pub fn run_due_retry(
        self: &Arc<Self>,
        recharge_id: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        let this = Arc::clone(self);
        Box::pin(async move {
            this.timers.lock().await.remove(&recharge_id);
            match this.claim_and_reissue(recharge_id).await {
                Ok(Some(status)) => debug!("📶️ Retry for recharge #{recharge_id} settled as {status}"),
                Ok(None) => debug!("📶️ Recharge #{recharge_id} was no longer awaiting retry. Nothing to do."),
                Err(e) => error!("📶️ Retry for recharge #{recharge_id} could not be executed. {e}"),
            }
        })
    }

    async fn claim_and_reissue(self: &Arc<Self>, recharge_id: i64) -> Result<Option<RechargeStatus>, FulfillmentError> {
        let Some(recharge) = self.db.claim_recharge_for_retry(recharge_id).await? else {
            return Ok(None);
        };
        let Some(payload) = recharge.request_payload.clone() else {
            warn!("📶️ Recharge #{recharge_id} has no persisted request payload. Parking it.");
            let recharge =
                self.db.fail_recharge(recharge_id, TRANSPORT_ERROR_CODE, "no persisted request payload").await?;
            return Ok(Some(recharge.status));
        };
        let request: RechargeRequest = serde_json::from_str(&payload)
            .map_err(|e| FulfillmentError::Serialization(format!("stored payload for recharge #{recharge_id}: {e}")))?;
        let order = self
            .db
            .fetch_order_by_id(recharge.order_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderIdNotFound(recharge.order_id))?;
        let status = self.dispatch(&order, &recharge, &request).await?;
        Ok(Some(status))
    }

    /// Re-arms retries whose scheduled time passed at least one sweep interval ago with no live
    /// timer, which happens when the process restarts and loses its in-memory timers.
    pub async fn reconcile(self: &Arc<Self>) -> Result<usize, FulfillmentError> {
        let cutoff = Utc::now() - self.sweep_interval;
        let overdue = self.db.fetch_overdue_retries(cutoff).await?;
        let mut rearmed = 0;
        for recharge in overdue {
            if self.timers.lock().await.contains_key(&recharge.id) {
                continue;
            }
            info!("📶️ Recharge #{} is overdue with no timer. Re-arming.", recharge.id);
            self.arm_timer(recharge.id, Duration::seconds(RECOVERY_DELAY_SECS)).await;
            rearmed += 1;
        }
        if rearmed > 0 {
            info!("📶️ Reconcile sweep re-armed {rearmed} lost retry timer(s)");
        }
        Ok(rearmed)
    }

    /// Current retry queue depth and its breakdown by last error code.
    pub async fn stats(&self) -> Result<RetryStats, FulfillmentError> {
        let queue_depth = self.db.count_pending_retries().await?;
        let by_error_code = self
            .db
            .pending_retries_by_code()
            .await?
            .into_iter()
            .map(|(code, count)| RetryCodeCount { code, label: RechargeErrorCode::from_code(code).to_string(), count })
            .collect();
        Ok(RetryStats { queue_depth, by_error_code, max_attempts: MAX_ATTEMPTS })
    }

    /// Aborts every live timer. Pending records are recovered by the next reconcile sweep.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        if count > 0 {
            info!("📶️ Retry orchestrator shut down. {count} timer(s) aborted.");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_map_to_their_classes() {
        assert_eq!(RechargeErrorCode::from_code(3001), RechargeErrorCode::RateLimited);
        assert_eq!(RechargeErrorCode::from_code(3001).class(), ErrorClass::RateLimit);
        assert_eq!(RechargeErrorCode::from_code(2001).class(), ErrorClass::RetryableInternal);
        assert_eq!(RechargeErrorCode::from_code(2002).class(), ErrorClass::RetryableInternal);
        assert_eq!(RechargeErrorCode::from_code(-1).class(), ErrorClass::RetryableInternal);
        assert_eq!(RechargeErrorCode::from_code(1001).class(), ErrorClass::Fatal);
        assert_eq!(RechargeErrorCode::from_code(1002).class(), ErrorClass::Fatal);
        assert_eq!(RechargeErrorCode::from_code(9999), RechargeErrorCode::Other(9999));
        assert_eq!(RechargeErrorCode::from_code(9999).class(), ErrorClass::Fatal);
    }

    #[test]
    fn rate_limit_backoff_is_linear_and_capped() {
        assert_eq!(retry_delay(ErrorClass::RateLimit, 1), Duration::seconds(30));
        assert_eq!(retry_delay(ErrorClass::RateLimit, 2), Duration::seconds(60));
        assert_eq!(retry_delay(ErrorClass::RateLimit, 3), Duration::seconds(90));
        assert_eq!(retry_delay(ErrorClass::RateLimit, 4), Duration::seconds(120));
        assert_eq!(retry_delay(ErrorClass::RateLimit, 50), Duration::seconds(120));
    }

    #[test]
    fn internal_backoff_follows_the_schedule() {
        assert_eq!(retry_delay(ErrorClass::RetryableInternal, 1), Duration::minutes(3));
        assert_eq!(retry_delay(ErrorClass::RetryableInternal, 2), Duration::minutes(13));
        assert_eq!(retry_delay(ErrorClass::RetryableInternal, 3), Duration::minutes(28));
        assert_eq!(retry_delay(ErrorClass::RetryableInternal, 4), Duration::minutes(30));
        assert_eq!(retry_delay(ErrorClass::RetryableInternal, 10), Duration::minutes(30));
    }

    #[test]
    fn zero_attempt_is_clamped() {
        assert_eq!(retry_delay(ErrorClass::RateLimit, 0), Duration::seconds(30));
    }

    #[test]
    fn codes_round_trip() {
        for code in [3001, 2001, 2002, 1001, 1002, -1, 42] {
            assert_eq!(RechargeErrorCode::from_code(code).code(), code);
        }
    }
}
