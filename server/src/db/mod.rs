//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! Only used when `DATABASE_URL` is set. Startup creates the shared SQLx pool
//! and applies the session schema before accepting websocket traffic.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const DB_MAX_CONNECTIONS: u32 = 5;
const DB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .acquire_timeout(DB_ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}
