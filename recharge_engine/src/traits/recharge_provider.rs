use serde::{Deserialize, Serialize};
use thiserror::Error;

use rg_common::Money;

/// The request sent to the external recharge API. Serialized to JSON and persisted on the recharge row so that
/// retries re-issue the identical call, idempotent request id included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeRequest {
    pub target_account_id: String,
    pub request_id: String,
    pub credit_amount: i64,
    pub total_cost: Money,
    pub currency: String,
}

/// The provider's verdict on one recharge call. Code 0 means the credits were delivered; any other code is mapped
/// through the retry orchestrator's classification table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeOutcome {
    pub code: i64,
    pub message: String,
}

impl RechargeOutcome {
    pub fn success() -> Self {
        Self { code: 0, message: "ok".to_string() }
    }

    pub fn failure<S: Into<String>>(code: i64, message: S) -> Self {
        Self { code, message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Errors that prevent a verdict from being obtained at all (the request never reached the provider, or the response
/// was unusable). These are classified as retryable-internal failures by the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum RechargeCallError {
    #[error("Could not reach the recharge provider: {0}")]
    Transport(String),
    #[error("The recharge provider returned an unusable response: {0}")]
    BadResponse(String),
}

/// Adapter seam for the external recharge API. Implementations sign and send a single request and report the result;
/// they perform no retries of their own.
#[allow(async_fn_in_trait)]
pub trait RechargeProvider {
    fn send_recharge(&self, request: &RechargeRequest) -> impl std::future::Future<Output = Result<RechargeOutcome, RechargeCallError>> + Send;
}
