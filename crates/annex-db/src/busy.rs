//! Retry helper for transient `SQLITE_BUSY` failures.

use std::time::Duration;

/// Maximum attempts for a busy-retried operation.
const MAX_ATTEMPTS: u32 = 5;

/// Base backoff between attempts; doubled each retry.
const BASE_BACKOFF: Duration = Duration::from_millis(25);

/// Errors that can classify themselves as a transient busy condition.
///
/// Implemented here for [`rusqlite::Error`]; domain error types that wrap
/// it delegate to this implementation.
pub trait BusyClass {
    /// Whether this error is a transient busy/locked condition worth
    /// retrying.
    fn is_busy(&self) -> bool;
}

impl BusyClass for rusqlite::Error {
    fn is_busy(&self) -> bool {
        matches!(
            self,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
        )
    }
}

/// Runs `op`, retrying up to 5 times with exponential backoff while it
/// fails with a busy/locked condition.
///
/// Intended for use on the blocking pool; the backoff sleeps the current
/// thread. Rate-limit budget is consumed once per request by the caller,
/// never per attempt.
///
/// # Errors
///
/// Returns the last error if all attempts fail, or immediately for any
/// error that is not a busy condition.
pub fn with_busy_retry<T, E, F>(mut op: F) -> Result<T, E>
where
    E: BusyClass,
    F: FnMut() -> Result<T, E>,
{
    let mut backoff = BASE_BACKOFF;
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_busy() && attempt < MAX_ATTEMPTS => {
                tracing::debug!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "database busy, retrying"
                );
                std::thread::sleep(backoff);
                backoff *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
