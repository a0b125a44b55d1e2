//! SQLite pool construction for the CRM store.
//!
//! The pool is tuned for this workload: foreign keys on so interest
//! events can never orphan their customer, WAL so dashboard reads don't
//! stall while a chat turn commits, and a busy timeout (shared with the
//! pool's acquire timeout) so concurrent writes for the same customer
//! queue instead of failing with SQLITE_BUSY.

use std::str::FromStr;
use std::time::Duration;

use renta_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let timeout = Duration::from_secs(timeout_secs.max(1));

    // The CRM file is created on first run; the database is authoritative
    // state, so there is no separate provisioning step.
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(timeout);

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(timeout)
        .connect_with(options)
        .await
}
