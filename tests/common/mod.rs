//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;

use gridstake::{Engine, PgStore};

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: Once = Once::new();

/// Ensure the test database schema is set up (applies schema.sql once per test binary).
pub fn ensure_schema() {
    SCHEMA_INIT.call_once(|| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = PgStore::connect(&test_db_url())
                .await
                .expect("Failed to connect to test database");
            store
                .apply_schema(include_str!("../../schema.sql"))
                .await
                .expect("Failed to apply schema");
        });
    });
}

/// Connect to the test database (also ensures schema is set up) and wipe it.
pub async fn setup_test_store() -> PgStore {
    ensure_schema();
    let store = PgStore::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    truncate_all_tables(store.pool()).await;
    store
}

/// Connect to the test database, wipe it, and wrap the store in an engine.
pub async fn setup_test_engine() -> Engine {
    Engine::new(setup_test_store().await)
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql("TRUNCATE TABLE grid_annotations, square_logs, squares, grids, pools CASCADE")
        .execute(pool)
        .await
        .expect("Failed to truncate tables");
}
