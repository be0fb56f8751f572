use log::*;
use rg_common::Secret;

#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub signing_secret: Secret<String>,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("RGW_PROVIDER_URL").unwrap_or_else(|_| {
            warn!("RGW_PROVIDER_URL not set, using (probably useless) default");
            "https://recharge.example.com".to_string()
        });
        let api_key = Secret::new(std::env::var("RGW_PROVIDER_API_KEY").unwrap_or_else(|_| {
            warn!("RGW_PROVIDER_API_KEY not set, using (probably useless) default");
            "rgk_00000000000000".to_string()
        }));
        let signing_secret = Secret::new(std::env::var("RGW_PROVIDER_SIGNING_SECRET").unwrap_or_else(|_| {
            warn!("RGW_PROVIDER_SIGNING_SECRET not set, using (probably useless) default");
            "00000000000000".to_string()
        }));
        let timeout_secs = std::env::var("RGW_PROVIDER_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or_else(|| {
                info!("RGW_PROVIDER_TIMEOUT not set, using 30s");
                30
            });
        Self { base_url, api_key, signing_secret, timeout_secs }
    }
}
