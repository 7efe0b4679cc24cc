use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Opens the PostgreSQL pool shared by the HTTP handlers and the background
/// loops. Pool size comes from config; crawl-heavy deployments raise it.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    info!("postgres pool ready (max {max_connections} connections)");
    Ok(pool)
}
