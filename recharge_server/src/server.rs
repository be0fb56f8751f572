use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use recharge_client::ProviderApi;
use recharge_engine::{MetricsApi, OrderFlowApi, RetryOrchestrator, SqliteDatabase};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    integrations::LiveRechargeProvider,
    routes::{health, OrderByNumberRoute, RecoverMetricsRoute, RetryStatsRoute},
    webhook_routes::PaymentWebhookRoute,
    workers::{start_metrics_cron_worker, start_retry_sweep_worker},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let api = ProviderApi::new(config.provider.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let provider = Arc::new(LiveRechargeProvider::new(api));
    // One orchestrator instance owns every retry timer; the webhook handlers and the sweep
    // worker share it.
    let retry = Arc::new(RetryOrchestrator::new(db.clone(), provider, config.retry_sweep_interval));
    let rearmed = retry.reconcile().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    if rearmed > 0 {
        info!("🚀️ Re-armed {rearmed} retries left over from the previous run");
    }
    let sweep_every = config
        .retry_sweep_interval
        .to_std()
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    let cron_every = config
        .metrics_cron_interval
        .to_std()
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    start_retry_sweep_worker(Arc::clone(&retry), sweep_every);
    start_metrics_cron_worker(db.clone(), cron_every);
    let srv = create_server_instance(config, db, Arc::clone(&retry))?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));
    // Cancel any armed retry timers so the process does not linger after the listener stops.
    retry.shutdown().await;
    info!("🚀️ Retry orchestrator drained. Goodbye.");
    result
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    retry: Arc<RetryOrchestrator<SqliteDatabase, LiveRechargeProvider>>,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let order_flow = OrderFlowApi::new(db.clone(), Arc::clone(&retry));
        let metrics = MetricsApi::new(db.clone());
        let webhook_scope = web::scope("/provider")
            .service(PaymentWebhookRoute::<SqliteDatabase, LiveRechargeProvider>::new());
        let api_scope = web::scope("/api")
            .service(OrderByNumberRoute::<SqliteDatabase>::new())
            .service(RetryStatsRoute::<SqliteDatabase, LiveRechargeProvider>::new())
            .service(RecoverMetricsRoute::<SqliteDatabase>::new());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("rgw::access_log"))
            .app_data(web::Data::new(db.clone()))
            .app_data(web::Data::new(order_flow))
            .app_data(web::Data::new(metrics))
            .app_data(web::Data::from(Arc::clone(&retry)))
            .app_data(web::Data::new(config.webhook_auth.clone()))
            .service(health)
            .service(webhook_scope)
            .service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
