//! Instance registry and agreement persistence.

use rusqlite::{params, Connection, OptionalExtension};

use annex_identity::zk::{parse_verification_key, validate_membership_vkey, vkey_fingerprint};
use annex_types::{AlignmentStatus, TransferScope};
use annex_vrp::ValidationReport;

use crate::error::FederationError;
use crate::types::{FederationAgreement, Instance};

/// Registers (or re-pins) a remote instance with its verifying key.
///
/// The key is validated against the membership-circuit shape and pinned
/// by its SHA-256 fingerprint; later attestations are verified only
/// against this pinned key.
///
/// # Errors
///
/// Returns [`FederationError::Identity`] if the key does not parse or
/// has the wrong public-input count.
pub fn register_instance(
    conn: &Connection,
    base_url: &str,
    label: &str,
    verifying_key_json: &str,
) -> Result<Instance, FederationError> {
    let vk = parse_verification_key(verifying_key_json)?;
    validate_membership_vkey(&vk)?;
    let fingerprint = vkey_fingerprint(verifying_key_json);

    conn.execute(
        "INSERT INTO instances (base_url, label, public_key, verifying_key_json)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(base_url) DO UPDATE SET
            label = excluded.label,
            public_key = excluded.public_key,
            verifying_key_json = excluded.verifying_key_json",
        params![base_url, label, fingerprint, verifying_key_json],
    )?;

    get_instance_by_url(conn, base_url)?
        .ok_or_else(|| FederationError::UnknownInstance(base_url.to_string()))
}

fn instance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Instance> {
    Ok(Instance {
        id: row.get(0)?,
        base_url: row.get(1)?,
        label: row.get(2)?,
        public_key: row.get(3)?,
        verifying_key_json: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const INSTANCE_COLUMNS: &str =
    "id, base_url, label, public_key, verifying_key_json, status, created_at";

/// Fetches an instance by row id.
pub fn get_instance(conn: &Connection, id: i64) -> Result<Option<Instance>, FederationError> {
    conn.query_row(
        &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1"),
        params![id],
        instance_from_row,
    )
    .optional()
    .map_err(FederationError::Database)
}

/// Fetches an instance by base URL.
pub fn get_instance_by_url(
    conn: &Connection,
    base_url: &str,
) -> Result<Option<Instance>, FederationError> {
    conn.query_row(
        &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE base_url = ?1"),
        params![base_url],
        instance_from_row,
    )
    .optional()
    .map_err(FederationError::Database)
}

/// Lists all known instances.
pub fn list_instances(conn: &Connection) -> Result<Vec<Instance>, FederationError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {INSTANCE_COLUMNS} FROM instances ORDER BY id ASC"))?;
    let rows = stmt.query_map([], instance_from_row)?;
    let mut instances = Vec::new();
    for row in rows {
        instances.push(row?);
    }
    Ok(instances)
}

fn agreement_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FederationAgreement> {
    let status_str: String = row.get(4)?;
    let scope_str: String = row.get(5)?;
    let report_json: String = row.get(6)?;

    let conversion = |idx: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
    };

    Ok(FederationAgreement {
        id: row.get(0)?,
        agreement_uuid: row.get(1)?,
        local_server_id: row.get(2)?,
        remote_instance_id: row.get(3)?,
        alignment_status: AlignmentStatus::from_str_label(&status_str)
            .ok_or_else(|| conversion(4, format!("unknown alignment status '{status_str}'")))?,
        transfer_scope: TransferScope::from_str_label(&scope_str)
            .ok_or_else(|| conversion(5, format!("unknown transfer scope '{scope_str}'")))?,
        report: serde_json::from_str(&report_json)
            .map_err(|e| conversion(6, format!("corrupt agreement report: {e}")))?,
        active: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const AGREEMENT_COLUMNS: &str = "id, agreement_uuid, local_server_id, remote_instance_id, \
     alignment_status, transfer_scope, agreement_json, active, created_at, updated_at";

/// Fetches the single active agreement for a `(local, remote)` pair.
pub fn get_active_agreement(
    conn: &Connection,
    local_server_id: i64,
    remote_instance_id: i64,
) -> Result<Option<FederationAgreement>, FederationError> {
    conn.query_row(
        &format!(
            "SELECT {AGREEMENT_COLUMNS} FROM federation_agreements
             WHERE local_server_id = ?1 AND remote_instance_id = ?2 AND active = 1"
        ),
        params![local_server_id, remote_instance_id],
        agreement_from_row,
    )
    .optional()
    .map_err(FederationError::Database)
}

/// Writes a new active agreement row and retires the previous one, inside
/// the caller's transaction. Returns the new row's public uuid.
pub(crate) fn record_agreement(
    conn: &Connection,
    local_server_id: i64,
    remote_instance_id: i64,
    report: &ValidationReport,
) -> Result<String, FederationError> {
    let report_json = serde_json::to_string(report)
        .map_err(annex_observe::ObserveError::Serialization)?;
    let agreement_uuid = uuid::Uuid::new_v4().to_string();

    conn.execute(
        "UPDATE federation_agreements
         SET active = 0, updated_at = datetime('now')
         WHERE local_server_id = ?1 AND remote_instance_id = ?2 AND active = 1",
        params![local_server_id, remote_instance_id],
    )?;

    conn.execute(
        "INSERT INTO federation_agreements (
            agreement_uuid, local_server_id, remote_instance_id,
            alignment_status, transfer_scope, agreement_json, active
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        params![
            agreement_uuid,
            local_server_id,
            remote_instance_id,
            report.alignment_status.as_str(),
            report.transfer_scope.as_str(),
            report_json,
        ],
    )?;

    Ok(agreement_uuid)
}
