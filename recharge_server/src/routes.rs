//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. For this reason, any long, non-cpu-bound operation (e.g. I/O,
//! database operations, etc.) should be expressed as futures or asynchronous functions, which get executed
//! concurrently by worker threads and thus don't block execution.

use actix_web::{get, web, HttpResponse, Responder};
use log::*;
use recharge_engine::{GatewayDatabase, GatewayProvider, MetricsApi, RetryOrchestrator};

use crate::{
    data_objects::{OrderStatusResponse, RecoveredDate, RecoveryResponse, RetryStatsResponse},
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(order_by_number => Get "/order/{order_number}" impl GatewayDatabase);
/// Customer-facing order status lookup. Exposes the status view only, never internal ids or
/// retry bookkeeping.
pub async fn order_by_number<B: GatewayDatabase>(
    path: web::Path<String>,
    db: web::Data<B>,
) -> Result<HttpResponse, ServerError> {
    let order_number = path.into_inner();
    debug!("💻️ GET order status for {order_number}");
    let order = db
        .fetch_order_by_number(&order_number)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("order {order_number}")))?;
    Ok(HttpResponse::Ok().json(OrderStatusResponse::from(order)))
}

//----------------------------------------------   Retry stats  -----------------------------------------------
route!(retry_stats => Get "/retry/stats/{year}/{month}" impl GatewayDatabase, GatewayProvider);
/// Operator view: current retry queue depth broken down by error code, plus the metrics cron
/// health for the requested month.
pub async fn retry_stats<B, P>(
    path: web::Path<(i32, u32)>,
    orchestrator: web::Data<RetryOrchestrator<B, P>>,
    metrics: web::Data<MetricsApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: GatewayDatabase + 'static,
    P: GatewayProvider + 'static,
{
    let (year, month) = path.into_inner();
    debug!("💻️ GET retry stats for {year}-{month:02}");
    if !(1..=12).contains(&month) {
        return Err(ServerError::InvalidRequestPath(format!("{month} is not a calendar month")));
    }
    let retries = orchestrator.stats().await?;
    let cron_health = metrics.cron_health(month, year).await?;
    let result = RetryStatsResponse { year, month, retries, cron_health };
    Ok(HttpResponse::Ok().json(result))
}

//----------------------------------------------   Metrics recovery  ------------------------------------------
route!(recover_metrics => Post "/metrics/recover/{year}/{month}" impl GatewayDatabase);
/// Manual recovery: reprocesses every unresolved date in the month, abandoned ones included.
pub async fn recover_metrics<B: GatewayDatabase + 'static>(
    path: web::Path<(i32, u32)>,
    metrics: web::Data<MetricsApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let (year, month) = path.into_inner();
    if !(1..=12).contains(&month) {
        return Err(ServerError::InvalidRequestPath(format!("{month} is not a calendar month")));
    }
    info!("💻️ Manual metrics recovery requested for {year}-{month:02}");
    let reprocessed = metrics
        .recover_month(month, year)
        .await?
        .into_iter()
        .map(|(date, status)| RecoveredDate { date, status })
        .collect::<Vec<_>>();
    info!("💻️ Metrics recovery for {year}-{month:02} touched {} date(s)", reprocessed.len());
    Ok(HttpResponse::Ok().json(RecoveryResponse { year, month, reprocessed }))
}
