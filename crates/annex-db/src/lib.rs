//! Database layer for the Annex platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and a busy-retry helper. Every table in the
//! identity core is created through versioned migrations managed by this
//! crate, and the store is the only persistence boundary: domain mutations
//! and their event-log appends always share one transaction.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: single-server sovereignty, no external
//!   database process. WAL allows concurrent readers with a single writer,
//!   which matches the Annex access pattern (serialised Merkle appends,
//!   many proof verifications).
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management. Pool exhaustion maps to `ServiceUnavailable` at
//!   the admission boundary.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so migrations ship with the server and cannot drift
//!   from the code that depends on them.

mod busy;
mod migrations;
mod pool;

pub use busy::{with_busy_retry, BusyClass};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, PoolError};
