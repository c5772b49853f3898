use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::Connection;

/// First half of the two-key advisory lock. The second half is the data date.
const DATA_DATE_LOCK_CLASS: i32 = 0x4F50_4152; // "OPAR"

fn day_key(data_date: NaiveDate) -> i32 {
    data_date.num_days_from_ce()
}

/// Exclusive claim on one data date across archiver processes.
///
/// Advisory locks belong to the Postgres session that took them, so the guard owns a
/// connection detached from the pool for its whole lifetime. `release` unlocks and
/// closes it. Dropping the guard closes the socket, which ends the session and frees
/// the lock server-side.
pub struct DataDateLock {
    conn: Option<sqlx::PgConnection>,
    data_date: NaiveDate,
}

impl DataDateLock {
    /// `Ok(None)` when another session already holds the date.
    pub async fn try_acquire(pool: &sqlx::PgPool, data_date: NaiveDate) -> anyhow::Result<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .context("failed to get a connection for the data_date lock")?
            .detach();

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1, $2)")
            .persistent(false)
            .bind(DATA_DATE_LOCK_CLASS)
            .bind(day_key(data_date))
            .fetch_one(&mut conn)
            .await
            .with_context(|| format!("failed to acquire advisory lock for {data_date}"))?;

        if !acquired {
            conn.close().await.ok();
            return Ok(None);
        }

        tracing::debug!(%data_date, "data_date lock acquired");
        Ok(Some(Self {
            conn: Some(conn),
            data_date,
        }))
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let unlocked: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1, $2)")
            .persistent(false)
            .bind(DATA_DATE_LOCK_CLASS)
            .bind(day_key(self.data_date))
            .fetch_one(&mut conn)
            .await
            .with_context(|| format!("failed to release advisory lock for {}", self.data_date))?;
        if !unlocked {
            tracing::warn!(data_date = %self.data_date, "data_date lock was not held at release");
        }

        conn.close()
            .await
            .context("failed to close the data_date lock connection")?;
        Ok(())
    }
}

impl Drop for DataDateLock {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::debug!(data_date = %self.data_date, "data_date lock dropped; session close releases it");
        }
    }
}
