//! Database pool construction
//!
//! All pools carry a bounded acquire timeout so that a slow or unreachable
//! database cannot pin request workers indefinitely.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Maximum time a request handler may wait for a connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a database connection pool for request handling
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    tracing::info!("Database pool created");
    Ok(pool)
}
