use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::{debug, info};

use crate::models::AlertWindowState;
use crate::traits::AlertStateStore;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(parent) = database_file(db_url).and_then(Path::parent)
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database file");
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;
        Self::migrate(pool).await
    }

    /// Single-connection in-memory database, every connection of a pool would
    /// otherwise see its own empty database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }
}

fn database_file(db_url: &str) -> Option<&Path> {
    let rest = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);

    if path.is_empty() || path.starts_with(":memory:") {
        None
    } else {
        Some(Path::new(path))
    }
}

fn window_state(row: &SqliteRow) -> Result<AlertWindowState> {
    let date: NaiveDate = row.try_get("day")?;
    let sent: i64 = row.try_get("sent")?;

    Ok(AlertWindowState {
        date,
        alerts_sent_today: u32::try_from(sent).context("stored alert counter out of range")?,
    })
}

#[async_trait]
impl AlertStateStore for Database {
    async fn load(&self) -> Result<Option<AlertWindowState>> {
        let row = sqlx::query("SELECT day, sent FROM alert_window WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(window_state).transpose()
    }

    async fn record_send(&self, today: NaiveDate, cap: u32) -> Result<Option<AlertWindowState>> {
        // One statement: reset on day change, increment otherwise, never past the cap.
        let row = sqlx::query(
            r"
            INSERT INTO alert_window (id, day, sent)
            VALUES (1, ?, 1)
            ON CONFLICT(id) DO UPDATE SET
                sent = CASE WHEN alert_window.day = excluded.day
                            THEN alert_window.sent + 1
                            ELSE 1 END,
                day = excluded.day
            WHERE alert_window.day <> excluded.day OR alert_window.sent < ?
            RETURNING day, sent
            ",
        )
        .bind(today)
        .bind(i64::from(cap))
        .fetch_optional(&self.pool)
        .await?;

        let state = row.as_ref().map(window_state).transpose()?;
        debug!(?state, "Recorded alert send");
        Ok(state)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
