//! Client for the external recharge provider's HTTP API.
//!
//! The provider exposes a single meaningful operation for this system: submit a recharge and get
//! a coded verdict back. Calls are authenticated with an API key header and an HMAC-SHA256
//! signature over the request body. The client makes exactly one attempt per call; retry policy
//! belongs to the engine, not here.
mod api;
mod config;
mod error;
mod helpers;

mod data_objects;

pub use api::ProviderApi;
pub use config::ProviderConfig;
pub use data_objects::{RechargeBody, RechargeResponse};
pub use error::ProviderApiError;
pub use helpers::sign_payload;
