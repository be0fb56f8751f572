//! Helpers for tests that need a real database.
pub mod prepare_env;

pub use prepare_env::{fresh_test_db, random_db_path};
