// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! SQLite-specific initialization helpers.
//!
//! This module is limited to:
//! - Pool construction and per-connection configuration (PRAGMA statements)
//! - Migration execution
//! - Startup verification of foreign key enforcement
//!
//! All domain queries and mutations live in `queries` and `mutations`.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sql_types::Integer;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::time::Duration;
use tracing::info;

use crate::error::PersistenceError;

/// Embedded schema migrations, applied at startup.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// How long a connection checkout may block before surfacing `PoolExhausted`.
const POOL_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite busy timeout, in milliseconds. A write that waits on a lock longer
/// than this surfaces `Busy`, which callers treat as retryable.
const BUSY_TIMEOUT_MS: u32 = 5_000;

pub(crate) type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
pub(crate) type SqlitePooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection setup applied by the pool on every new connection.
///
/// Foreign key enforcement is off by default in SQLite and must be enabled
/// on each connection; the busy timeout keeps concurrent writers from
/// failing immediately on a held lock.
#[derive(Debug, Clone, Copy)]
struct ConnectionSetup;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Helper row struct for PRAGMA queries.
///
/// This is a justified use of raw SQL as Diesel has no PRAGMA DSL.
#[derive(QueryableByName)]
struct PragmaRow {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}

/// Builds a connection pool for the given database URL and runs migrations.
///
/// # Errors
///
/// Returns an error if the pool cannot be built or migrations fail.
pub(crate) fn build_pool(database_url: &str, pool_size: u32) -> Result<SqlitePool, PersistenceError> {
    info!(database_url, pool_size, "Initializing SQLite connection pool");

    let manager: ConnectionManager<SqliteConnection> = ConnectionManager::new(database_url);
    let pool: SqlitePool = Pool::builder()
        .max_size(pool_size)
        .connection_timeout(POOL_CHECKOUT_TIMEOUT)
        .connection_customizer(Box::new(ConnectionSetup))
        .build(manager)
        .map_err(|e| PersistenceError::ConnectionFailed(e.to_string()))?;

    let mut conn: SqlitePooledConnection = pool.get()?;
    run_migrations(&mut conn)?;
    verify_foreign_key_enforcement(&mut conn)?;

    Ok(pool)
}

/// Run pending migrations on the provided connection.
///
/// # Errors
///
/// Returns an error if migration execution fails.
pub(crate) fn run_migrations(conn: &mut SqliteConnection) -> Result<(), PersistenceError> {
    info!("Running SQLite database migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| PersistenceError::MigrationFailed(e.to_string()))?;
    Ok(())
}

/// Verifies that foreign key enforcement is enabled.
///
/// This is a startup-time check required to ensure referential integrity
/// constraints are enforced.
///
/// # Errors
///
/// Returns an error if foreign key enforcement is not enabled.
pub(crate) fn verify_foreign_key_enforcement(
    conn: &mut SqliteConnection,
) -> Result<(), PersistenceError> {
    // NOTE: PRAGMA is raw SQL (justified - Diesel has no PRAGMA DSL)
    let foreign_keys_enabled: i32 = diesel::sql_query("PRAGMA foreign_keys")
        .get_result::<PragmaRow>(conn)?
        .foreign_keys;

    if foreign_keys_enabled == 0 {
        return Err(PersistenceError::ConnectionFailed(String::from(
            "foreign key enforcement is not enabled",
        )));
    }

    Ok(())
}

/// Enable WAL mode for file-based databases.
///
/// WAL (Write-Ahead Logging) mode provides better read concurrency
/// for file-based databases.
///
/// # Errors
///
/// Returns an error if the PRAGMA statement fails.
pub(crate) fn enable_wal_mode(conn: &mut SqliteConnection) -> Result<(), PersistenceError> {
    // NOTE: PRAGMA is raw SQL (justified - Diesel has no PRAGMA DSL)
    diesel::sql_query("PRAGMA journal_mode = WAL")
        .execute(conn)
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    Ok(())
}
