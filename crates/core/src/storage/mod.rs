pub mod lock;
pub mod sanitize;
pub mod snapshots;

use anyhow::Context;

/// Creates the snapshot table and its (data_date, symbol) unique index. Safe to re-run.
pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
