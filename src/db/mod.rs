pub mod models;
pub mod reader;
pub mod snapshots;
pub mod writer;

use std::str::FromStr;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, SqliteConnection};

use crate::error::Result;

pub use writer::Writer;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open the single ingestion connection and bring the schema up to date.
pub async fn connect(db_path: &str) -> Result<SqliteConnection> {
    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let mut conn = opts.connect().await?;
    MIGRATOR.run(&mut conn).await?;
    Ok(conn)
}

/// Read-only pool for the API binary.
pub async fn connect_pool(db_path: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?.read_only(true);
    let pool = SqlitePoolOptions::new().connect_with(opts).await?;
    Ok(pool)
}

/// Version stamp written to `created_at`: UTC midnight of `now`.
/// All upserts in one run share it, so a same-day re-fetch updates in place
/// and a later day's run adds a new historical row.
pub fn ingest_version(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

#[cfg(test)]
pub(crate) async fn memory_connection() -> SqliteConnection {
    let mut conn = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory url")
        .connect()
        .await
        .expect("open in-memory sqlite");
    MIGRATOR.run(&mut conn).await.expect("apply migrations");
    conn
}
