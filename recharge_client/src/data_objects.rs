use serde::{Deserialize, Serialize};

/// The body of a recharge submission, as the provider's `/v1/recharges` endpoint takes it.
/// Amounts are integers: credits as a count, cost in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeBody {
    pub account_id: String,
    /// Caller-chosen idempotency key. Submitting the same `request_id` twice yields one recharge.
    pub request_id: String,
    pub credit_amount: i64,
    pub total_cost: i64,
    pub currency: String,
}

/// The provider's verdict. `code` 0 means delivered; anything else is an error code from the
/// provider's published table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeResponse {
    pub code: i64,
    pub message: String,
}
