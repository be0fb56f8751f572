pub mod metrics_api;
pub mod order_flow_api;
pub mod retry_orchestrator;
