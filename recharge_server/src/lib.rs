//! # Recharge gateway server
//! This crate hosts the HTTP surface and background workers of the recharge gateway. It is responsible for:
//! Listening for incoming payment webhooks from the payment provider.
//! Exposing order status, retry statistics and manual metrics recovery to operators.
//! Running the retry reconciliation sweep and the nightly metrics cron.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/provider/webhook/payment`: The webhook route for payment status events from the provider.
//! * `/api/order/{order_number}`: Current status of an order.
//! * `/api/retry/stats/{year}/{month}`: Retry queue depth and metrics cron health.
//! * `/api/metrics/recover/{year}/{month}`: Manual reprocessing of unresolved metrics dates.

pub mod config;
pub mod data_objects;
pub mod errors;
pub mod integrations;
pub mod routes;
pub mod server;
pub mod webhook_routes;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
