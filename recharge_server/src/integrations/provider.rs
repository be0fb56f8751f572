//! Live adapter between the engine's provider seam and the HTTP client.

use log::*;
use recharge_client::{ProviderApi, ProviderApiError, RechargeBody};
use recharge_engine::traits::{RechargeCallError, RechargeOutcome, RechargeProvider, RechargeRequest};

/// Sends recharges over the real provider API. Holds no state beyond the configured client, so
/// it is cheap to share behind an `Arc` between the webhook path and the retry timers.
#[derive(Clone)]
pub struct LiveRechargeProvider {
    api: ProviderApi,
}

impl LiveRechargeProvider {
    pub fn new(api: ProviderApi) -> Self {
        Self { api }
    }
}

impl RechargeProvider for LiveRechargeProvider {
    async fn send_recharge(&self, request: &RechargeRequest) -> Result<RechargeOutcome, RechargeCallError> {
        let body = RechargeBody {
            account_id: request.target_account_id.clone(),
            request_id: request.request_id.clone(),
            credit_amount: request.credit_amount,
            total_cost: request.total_cost.value(),
            currency: request.currency.clone(),
        };
        match self.api.send_recharge(&body).await {
            Ok(verdict) => Ok(RechargeOutcome { code: verdict.code, message: verdict.message }),
            Err(e @ ProviderApiError::QueryError { .. }) | Err(e @ ProviderApiError::JsonError(_)) => {
                warn!("📶️ Provider returned an unusable response for {}: {e}", request.request_id);
                Err(RechargeCallError::BadResponse(e.to_string()))
            },
            Err(e) => {
                warn!("📶️ Could not reach the provider for {}: {e}", request.request_id);
                Err(RechargeCallError::Transport(e.to_string()))
            },
        }
    }
}
