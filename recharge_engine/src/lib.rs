//! Recharge Gateway Engine
//!
//! The engine is the core of the recharge gateway: it fulfills purchase orders for virtual credits in response to
//! payment provider events, drives the unreliable external recharge API to eventual success or permanent failure,
//! and keeps derived sales aggregates consistent with the order ledger.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@sqlite`]). SQLite is the supported backend. You should never need to
//!    access the database directly. Instead, use the public APIs. The exception is the data types used in the
//!    database, which are defined in the [`mod@db_types`] module and are public.
//! 2. The trait seams ([`mod@traits`]). Backends implement [`FulfillmentDatabase`] and [`MetricsDatabase`];
//!    external recharge providers implement [`traits::RechargeProvider`].
//! 3. The engine public APIs ([`mod@api`]): [`OrderFlowApi`] (the payment-webhook-driven state machine),
//!    [`RetryOrchestrator`] (bounded retries with crash recovery) and [`MetricsApi`] (the aggregate consistency
//!    engine).
mod api;
pub mod db_types;
pub mod helpers;
mod sqlite;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use api::{
    metrics_api::{CronHealth, CronRunSummary, MetricsApi, GAP_LOOKBACK_DAYS, MAX_DATE_RETRIES},
    order_flow_api::{EventOutcome, OrderFlowApi},
    retry_orchestrator::{
        retry_delay,
        ErrorClass,
        RechargeErrorCode,
        RetryCodeCount,
        RetryOrchestrator,
        RetryStats,
        MAX_ATTEMPTS,
    },
};
pub use sqlite::SqliteDatabase;
pub use traits::{
    FulfillmentDatabase,
    FulfillmentError,
    GatewayDatabase,
    GatewayProvider,
    MetricsDatabase,
    MetricsError,
};
