use std::env;

use chrono::Duration;
use log::*;
use recharge_client::ProviderConfig;
use rg_common::Secret;

const DEFAULT_RGW_HOST: &str = "127.0.0.1";
const DEFAULT_RGW_PORT: u16 = 8380;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/recharge_gateway.db";
const DEFAULT_SWEEP_INTERVAL_SECS: i64 = 3600;
const DEFAULT_CRON_INTERVAL_SECS: i64 = 86_400;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// How often the retry reconciliation sweep runs. Also the staleness threshold for deciding
    /// that a RetryPending record has lost its timer.
    pub retry_sweep_interval: Duration,
    /// How often the metrics cron runs. Once per day in production; short in tests.
    pub metrics_cron_interval: Duration,
    pub webhook_auth: WebhookAuth,
    /// Recharge provider API connection settings.
    pub provider: ProviderConfig,
}

/// Signature checking settings for the payment webhook.
#[derive(Clone, Debug, Default)]
pub struct WebhookAuth {
    pub secret: Secret<String>,
    /// If false, the signature header is not checked and all webhook calls are accepted.
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RGW_HOST.to_string(),
            port: DEFAULT_RGW_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            retry_sweep_interval: Duration::seconds(DEFAULT_SWEEP_INTERVAL_SECS),
            metrics_cron_interval: Duration::seconds(DEFAULT_CRON_INTERVAL_SECS),
            webhook_auth: WebhookAuth::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("RGW_HOST").ok().unwrap_or_else(|| DEFAULT_RGW_HOST.into());
        let port = env::var("RGW_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for RGW_PORT. {e} Using the default, {DEFAULT_RGW_PORT}, instead."
                    );
                    DEFAULT_RGW_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_RGW_PORT);
        let database_url = env::var("RGW_DATABASE_URL").unwrap_or_else(|_| {
            warn!("🪛️ RGW_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.into()
        });
        let retry_sweep_interval = interval_from_env("RGW_RETRY_SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL_SECS);
        let metrics_cron_interval = interval_from_env("RGW_METRICS_CRON_INTERVAL", DEFAULT_CRON_INTERVAL_SECS);
        let secret = env::var("RGW_WEBHOOK_HMAC_SECRET").map(Secret::new).unwrap_or_else(|_| {
            warn!("🪛️ RGW_WEBHOOK_HMAC_SECRET is not set. Webhook signatures cannot be verified.");
            Secret::default()
        });
        let enabled = env::var("RGW_WEBHOOK_HMAC_CHECKS").map(|s| &s == "1" || &s == "true").unwrap_or(true);
        if !enabled {
            warn!("🪛️ Webhook HMAC checks are DISABLED. Do not do this in production.");
        }
        let provider = ProviderConfig::new_from_env_or_default();
        Self {
            host,
            port,
            database_url,
            retry_sweep_interval,
            metrics_cron_interval,
            webhook_auth: WebhookAuth { secret, enabled },
            provider,
        }
    }
}

fn interval_from_env(var: &str, default_secs: i64) -> Duration {
    env::var(var)
        .ok()
        .and_then(|s| {
            s.parse::<i64>()
                .map_err(|e| {
                    error!("🪛️ {s} is not a valid number of seconds for {var}. {e} Using {default_secs}s instead.");
                    e
                })
                .ok()
        })
        .map(Duration::seconds)
        .unwrap_or_else(|| Duration::seconds(default_secs))
}
