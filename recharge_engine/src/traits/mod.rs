//! The trait seams of the engine.
//!
//! Backends implement [`FulfillmentDatabase`] (order/payment/recharge state and the atomic transition groups) and
//! [`MetricsDatabase`] (ledger reads, aggregate upserts and execution records). External credit providers implement
//! [`RechargeProvider`]. The server and the tests only ever talk to these traits, never to a concrete backend.
mod fulfillment_database;
mod metrics_database;
mod recharge_provider;

pub use fulfillment_database::{FulfillmentDatabase, FulfillmentError};
pub use metrics_database::{MetricsDatabase, MetricsError};
pub use recharge_provider::{RechargeCallError, RechargeOutcome, RechargeProvider, RechargeRequest};

/// Umbrella bound for backends that can serve the whole gateway. Handlers are generic over this so that mocks can be
/// swapped in for endpoint tests.
pub trait GatewayDatabase: FulfillmentDatabase + MetricsDatabase + Clone + Send + Sync {}

impl<T> GatewayDatabase for T where T: FulfillmentDatabase + MetricsDatabase + Clone + Send + Sync {}

/// Umbrella bound for providers shareable across worker threads, in the shape the server's route handlers need.
pub trait GatewayProvider: RechargeProvider + Send + Sync {}

impl<T> GatewayProvider for T where T: RechargeProvider + Send + Sync {}
