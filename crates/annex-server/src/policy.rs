//! Policy version storage.
//!
//! Policies are immutable snapshots in `server_policy_versions`; the
//! in-memory `ServerPolicy` in [`crate::AppState`] always mirrors the
//! latest committed version.

use rusqlite::{params, Connection, OptionalExtension};

use annex_types::ServerPolicy;

/// Loads the latest policy version for the server, if any.
pub fn load_latest_policy(
    conn: &Connection,
    server_id: i64,
) -> Result<Option<ServerPolicy>, rusqlite::Error> {
    let json: Option<String> = conn
        .query_row(
            "SELECT policy_json FROM server_policy_versions
             WHERE server_id = ?1
             ORDER BY version_id DESC
             LIMIT 1",
            params![server_id],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        None => Ok(None),
        Some(json) => serde_json::from_str(&json).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("corrupt stored policy: {e}").into(),
            )
        }),
    }
}

/// Appends a new policy version inside the caller's transaction and
/// returns its version id.
pub fn append_policy_version(
    conn: &Connection,
    server_id: i64,
    policy: &ServerPolicy,
) -> Result<i64, rusqlite::Error> {
    let json = serde_json::to_string(policy).map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(e))
    })?;

    conn.execute(
        "INSERT INTO server_policy_versions (server_id, policy_json) VALUES (?1, ?2)",
        params![server_id, json],
    )?;

    Ok(conn.last_insert_rowid())
}
