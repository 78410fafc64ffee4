//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time, named `NNN_name.sql`
//! and applied in order. Application is tracked in `_annex_migrations`;
//! each migration runs exactly once.

use rusqlite::Connection;
use thiserror::Error;

/// A single embedded migration.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_identity",
        sql: include_str!("migrations/001_identity.sql"),
    },
    Migration {
        name: "002_nullifiers",
        sql: include_str!("migrations/002_nullifiers.sql"),
    },
    Migration {
        name: "003_platform_identities",
        sql: include_str!("migrations/003_platform_identities.sql"),
    },
    Migration {
        name: "004_instances",
        sql: include_str!("migrations/004_instances.sql"),
    },
    Migration {
        name: "005_federation_agreements",
        sql: include_str!("migrations/005_federation_agreements.sql"),
    },
    Migration {
        name: "006_federated_identities",
        sql: include_str!("migrations/006_federated_identities.sql"),
    },
    Migration {
        name: "007_event_log",
        sql: include_str!("migrations/007_event_log.sql"),
    },
    Migration {
        name: "008_topics",
        sql: include_str!("migrations/008_topics.sql"),
    },
    Migration {
        name: "009_messages_retention",
        sql: include_str!("migrations/009_messages_retention.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Runs all pending migrations against the given connection.
///
/// Migrations already recorded in `_annex_migrations` are skipped. New
/// migrations are applied in order, each inside its own transaction, and
/// recorded on success. Returns the number of migrations applied.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    // The tracking table must exist before we can check what's been applied.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _annex_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| MigrationError::ExecutionFailed {
        name: "_annex_migrations_bootstrap".to_string(),
        source: e,
    })?;

    let mut applied = 0;

    for migration in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _annex_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(
                migration = migration.name,
                "migration already applied, skipping"
            );
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");

        let fail = |source: rusqlite::Error| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        };

        let tx = conn.unchecked_transaction().map_err(fail)?;
        tx.execute_batch(migration.sql).map_err(fail)?;
        tx.execute(
            "INSERT INTO _annex_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(fail)?;
        tx.commit().map_err(fail)?;

        applied += 1;
    }

    Ok(applied)
}
