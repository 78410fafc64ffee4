//! Platform identity registry.
//!
//! Links activated pseudonyms to their participant type and capability
//! flags. The first identity on a server becomes the founder and is
//! promoted to voice/moderate/invite/federate; `can_bridge` is never
//! granted implicitly.

use rusqlite::{params, Connection, OptionalExtension};

use annex_types::{Capabilities, RoleCode};

use crate::IdentityError;

/// A row from `platform_identities`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    pub id: i64,
    pub server_id: i64,
    pub pseudonym_id: String,
    pub participant_type: RoleCode,
    pub capabilities: Capabilities,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Inserts a platform identity if it does not exist, returning the row
/// either way.
///
/// The founder check and the insert are a single SQL statement: the
/// capability subqueries and the row insert see the same snapshot, so two
/// concurrent first registrations cannot both become founder.
///
/// # Errors
///
/// Returns [`IdentityError::Database`] on SQL failure.
pub fn upsert_platform_identity(
    conn: &Connection,
    server_id: i64,
    pseudonym_id: &str,
    participant_type: RoleCode,
) -> Result<PlatformIdentity, IdentityError> {
    conn.execute(
        "INSERT INTO platform_identities (
            server_id, pseudonym_id, participant_type,
            can_voice, can_moderate, can_invite, can_federate
        ) VALUES (?1, ?2, ?3,
            (SELECT COUNT(*) = 0 FROM platform_identities WHERE server_id = ?1),
            (SELECT COUNT(*) = 0 FROM platform_identities WHERE server_id = ?1),
            (SELECT COUNT(*) = 0 FROM platform_identities WHERE server_id = ?1),
            (SELECT COUNT(*) = 0 FROM platform_identities WHERE server_id = ?1)
        )
        ON CONFLICT(server_id, pseudonym_id) DO NOTHING",
        params![server_id, pseudonym_id, participant_type.label()],
    )?;

    get_platform_identity(conn, server_id, pseudonym_id)?.ok_or_else(|| {
        IdentityError::NotFound(format!("platform identity '{pseudonym_id}' after upsert"))
    })
}

/// Retrieves a platform identity by server and pseudonym.
///
/// # Errors
///
/// Returns [`IdentityError::Database`] on SQL failure or if the stored
/// participant type is not a known label.
pub fn get_platform_identity(
    conn: &Connection,
    server_id: i64,
    pseudonym_id: &str,
) -> Result<Option<PlatformIdentity>, IdentityError> {
    conn.query_row(
        "SELECT
            id, server_id, pseudonym_id, participant_type,
            can_voice, can_moderate, can_invite, can_federate, can_bridge,
            active, created_at, updated_at
        FROM platform_identities
        WHERE server_id = ?1 AND pseudonym_id = ?2",
        params![server_id, pseudonym_id],
        |row| {
            let label: String = row.get(3)?;
            let participant_type = RoleCode::from_label(&label).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown participant type '{label}'").into(),
                )
            })?;

            Ok(PlatformIdentity {
                id: row.get(0)?,
                server_id: row.get(1)?,
                pseudonym_id: row.get(2)?,
                participant_type,
                capabilities: Capabilities {
                    can_voice: row.get(4)?,
                    can_moderate: row.get(5)?,
                    can_invite: row.get(6)?,
                    can_federate: row.get(7)?,
                    can_bridge: row.get(8)?,
                },
                active: row.get(9)?,
                created_at: row.get(10)?,
                updated_at: row.get(11)?,
            })
        },
    )
    .optional()
    .map_err(IdentityError::Database)
}

/// Replaces the capability flags of a platform identity.
///
/// # Errors
///
/// Returns [`IdentityError::NotFound`] if the identity does not exist,
/// or [`IdentityError::Database`] on SQL failure.
pub fn update_capabilities(
    conn: &Connection,
    server_id: i64,
    pseudonym_id: &str,
    caps: Capabilities,
) -> Result<(), IdentityError> {
    let changed = conn.execute(
        "UPDATE platform_identities SET
            can_voice = ?1,
            can_moderate = ?2,
            can_invite = ?3,
            can_federate = ?4,
            can_bridge = ?5,
            updated_at = datetime('now')
        WHERE server_id = ?6 AND pseudonym_id = ?7",
        params![
            caps.can_voice,
            caps.can_moderate,
            caps.can_invite,
            caps.can_federate,
            caps.can_bridge,
            server_id,
            pseudonym_id
        ],
    )?;

    if changed == 0 {
        return Err(IdentityError::NotFound(format!(
            "platform identity '{pseudonym_id}'"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn first_identity_is_promoted_to_founder() {
        let conn = setup();

        let first = upsert_platform_identity(&conn, 1, "pseud-1", RoleCode::Human).unwrap();
        assert_eq!(first.capabilities, Capabilities::founder());
        assert!(first.active);

        let second = upsert_platform_identity(&conn, 1, "pseud-2", RoleCode::AiAgent).unwrap();
        assert_eq!(second.capabilities, Capabilities::default());
        assert_eq!(second.participant_type, RoleCode::AiAgent);
    }

    #[test]
    fn bridge_is_never_implicit() {
        let conn = setup();
        let founder = upsert_platform_identity(&conn, 1, "pseud-1", RoleCode::Bridge).unwrap();
        assert!(!founder.capabilities.can_bridge);
    }

    #[test]
    fn upsert_is_idempotent() {
        let conn = setup();

        let first = upsert_platform_identity(&conn, 1, "pseud-1", RoleCode::Human).unwrap();
        let again = upsert_platform_identity(&conn, 1, "pseud-1", RoleCode::Human).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.capabilities, Capabilities::founder());
    }

    #[test]
    fn capability_edits_are_persisted() {
        let conn = setup();
        upsert_platform_identity(&conn, 1, "pseud-1", RoleCode::Human).unwrap();
        upsert_platform_identity(&conn, 1, "pseud-2", RoleCode::Service).unwrap();

        let caps = Capabilities {
            can_voice: true,
            can_bridge: true,
            ..Capabilities::default()
        };
        update_capabilities(&conn, 1, "pseud-2", caps).unwrap();

        let identity = get_platform_identity(&conn, 1, "pseud-2").unwrap().unwrap();
        assert_eq!(identity.capabilities, caps);

        let err = update_capabilities(&conn, 1, "pseud-9", caps).unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }
}
