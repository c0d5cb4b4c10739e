use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Tables the ingestion pipeline reads and writes.
const REQUIRED_TABLES: [&str; 3] = ["consultants", "missions", "consultant_skills"];

/// Creates the PostgreSQL pool and checks that the profile tables exist.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    for table in REQUIRED_TABLES {
        let present: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await?;
        if !present {
            warn!("Table '{table}' is missing; CV confirmation will fail until it is created");
        }
    }

    info!("PostgreSQL connection pool established");
    Ok(pool)
}
