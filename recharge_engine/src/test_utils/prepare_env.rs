use log::*;
use sqlx::{migrate, migrate::MigrateDatabase, Sqlite};

use crate::SqliteDatabase;

/// A unique throwaway database path, so concurrently running tests never share state.
pub fn random_db_path() -> String {
    format!("sqlite://../data/test_gateway_{}", rand::random::<u64>())
}

/// Creates a fresh, fully migrated database at `url` and returns a handle to it. Any leftover
/// file from a previous run at the same path is dropped first.
pub async fn fresh_test_db(url: &str) -> SqliteDatabase {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    if let Err(e) = Sqlite::drop_database(url).await {
        debug!("Nothing to drop at {url} ({e})");
    }
    Sqlite::create_database(url).await.expect("Error creating test database");
    let db = SqliteDatabase::new_with_url(url, 5).await.expect("Error connecting to test database");
    migrate!("./src/sqlite/migrations").run(db.pool()).await.expect("Error running migrations");
    debug!("🚀️ Test database ready at {url}");
    db
}
