//! SQLite connection bootstrap.
//!
//! Grounded on `magnetar::backends::sqlite::SqliteStore::open`: WAL journal
//! mode for concurrent readers, `create_if_missing`, and
//! `sqlx::migrate!` run on every startup.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

pub async fn open(path: &str) -> Result<SqlitePool> {
    let db_url = if path.starts_with("sqlite://") {
        path.to_string()
    } else {
        format!("sqlite://{path}")
    };

    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(%path, "opened sqlite store");
    Ok(pool)
}
