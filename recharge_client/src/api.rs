use std::{sync::Arc, time::Duration};

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};

use crate::{
    config::ProviderConfig,
    data_objects::{RechargeBody, RechargeResponse},
    helpers::sign_payload,
    ProviderApiError,
};

#[derive(Clone)]
pub struct ProviderApi {
    config: ProviderConfig,
    client: Arc<Client>,
}

impl ProviderApi {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(config.api_key.reveal().as_str())
            .map_err(|e| ProviderApiError::Initialization(e.to_string()))?;
        headers.insert("X-Api-Key", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Submits one recharge and returns the provider's verdict.
    ///
    /// The body is serialized once, signed, and sent with the signature in `X-Rgw-Signature`.
    /// Non-2xx responses and undecodable bodies surface as errors; a decoded verdict with a
    /// non-zero code is NOT an error at this level, since the caller may want to retry it.
    pub async fn send_recharge(&self, body: &RechargeBody) -> Result<RechargeResponse, ProviderApiError> {
        let url = self.url("/v1/recharges");
        let payload = serde_json::to_vec(body).map_err(|e| ProviderApiError::RequestError(e.to_string()))?;
        let signature = sign_payload(self.config.signing_secret.reveal().as_str(), &payload);
        trace!("Submitting recharge {} to {url}", body.request_id);
        let response = self
            .client
            .post(url)
            .header("X-Rgw-Signature", signature)
            .body(payload)
            .send()
            .await
            .map_err(|e| ProviderApiError::ResponseError(e.to_string()))?;
        if response.status().is_success() {
            let verdict =
                response.json::<RechargeResponse>().await.map_err(|e| ProviderApiError::JsonError(e.to_string()))?;
            debug!("Recharge {} answered with code {}: {}", body.request_id, verdict.code, verdict.message);
            Ok(verdict)
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| ProviderApiError::ResponseError(e.to_string()))?;
            Err(ProviderApiError::QueryError { status, message })
        }
    }
}
