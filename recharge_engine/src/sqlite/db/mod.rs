use std::{env, str::FromStr};

use log::*;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

pub mod coupons;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod recharges;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/recharge_gateway.db";

pub fn db_url() -> String {
    env::var("RGW_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ RGW_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}");
        DEFAULT_DATABASE_URL.to_string()
    })
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    debug!("🗃️ Connection pool for {url} created ({max_connections} connections max)");
    Ok(pool)
}
