use mockall::mock;
use recharge_engine::traits::{RechargeCallError, RechargeOutcome, RechargeProvider, RechargeRequest};

mock! {
    pub Provider {}
    impl RechargeProvider for Provider {
        async fn send_recharge(&self, request: &RechargeRequest) -> Result<RechargeOutcome, RechargeCallError>;
    }
}
