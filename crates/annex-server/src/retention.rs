//! Background retention sweeper.
//!
//! Two indexed deletes per pass: message bodies past their `expires_at`,
//! and event-log rows older than the policy's retention window.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use annex_db::DbPool;
use annex_types::ServerPolicy;

/// Runs one retention pass. Returns (expired messages, pruned events).
pub fn sweep_once(
    conn: &rusqlite::Connection,
    server_id: i64,
    retention_days: u32,
) -> Result<(usize, usize), rusqlite::Error> {
    let messages = conn.execute(
        "DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at <= datetime('now')",
        [],
    )?;

    let events = conn.execute(
        "DELETE FROM public_event_log
         WHERE server_id = ?1
           AND occurred_at <= datetime('now', '-' || ?2 || ' days')",
        rusqlite::params![server_id, retention_days],
    )?;

    Ok((messages, events))
}

/// Periodic retention task; runs until the process shuts down.
pub async fn start_retention_task(
    pool: DbPool,
    server_id: i64,
    policy: Arc<RwLock<ServerPolicy>>,
    interval_seconds: u64,
) {
    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting retention sweeper");

    loop {
        tokio::time::sleep(interval).await;

        let retention_days = match policy.read() {
            Ok(p) => p.default_retention_days,
            Err(_) => {
                tracing::error!("policy lock poisoned, skipping retention pass");
                continue;
            }
        };

        let pool = pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| {
                tracing::error!(error = %e, "no connection for retention pass");
            })?;
            sweep_once(&conn, server_id, retention_days).map_err(|e| {
                tracing::error!(error = %e, "retention pass failed");
            })
        })
        .await;

        if let Ok(Ok((messages, events))) = result {
            if messages > 0 || events > 0 {
                tracing::info!(messages, events, "retention pass complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        annex_db::run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO servers (slug, label, signing_key_hex, public_key_hex)
             VALUES ('test', 'Test', '00', '00')",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn expired_messages_are_swept_fresh_ones_kept() {
        let conn = setup();

        conn.execute(
            "INSERT INTO messages (public_id, channel_id, sender_pseudonym, content, expires_at)
             VALUES ('m1', 'c1', 'p1', 'old', datetime('now', '-1 hour'))",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (public_id, channel_id, sender_pseudonym, content, expires_at)
             VALUES ('m2', 'c1', 'p1', 'fresh', datetime('now', '+1 hour'))",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (public_id, channel_id, sender_pseudonym, content)
             VALUES ('m3', 'c1', 'p1', 'keeper')",
            [],
        )
        .unwrap();

        let (messages, _) = sweep_once(&conn, 1, 30).unwrap();
        assert_eq!(messages, 1);

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 2, "fresh and non-expiring messages survive");
    }

    #[test]
    fn old_events_are_pruned_by_retention_window() {
        let conn = setup();

        conn.execute(
            "INSERT INTO public_event_log
                (server_id, domain, event_type, entity_type, entity_id, seq, payload_json, occurred_at)
             VALUES (1, 'IDENTITY', 'IDENTITY_REGISTERED', 'identity', 'x', 1, '{}',
                     datetime('now', '-40 days'))",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO public_event_log
                (server_id, domain, event_type, entity_type, entity_id, seq, payload_json, occurred_at)
             VALUES (1, 'IDENTITY', 'IDENTITY_REGISTERED', 'identity', 'y', 2, '{}',
                     datetime('now'))",
            [],
        )
        .unwrap();

        let (_, events) = sweep_once(&conn, 1, 30).unwrap();
        assert_eq!(events, 1);

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM public_event_log", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
