//! Federated identity cache behaviour against a real store.
//!
//! Proofs here are either structurally invalid (to stop at the pairing
//! boundary) or bypassed via `record_attested_identity`, which is the
//! documented post-verification entry point.

use rusqlite::Connection;

use annex_federation::{
    get_instance, process_attestation, process_incoming_handshake, record_attested_identity,
    register_instance, resolve_federated_identity, Attestation, FederationError, Instance,
};
use annex_identity::zk::generate_dummy_vkey;
use annex_identity::{derive_nullifier_hex, derive_pseudonym_id, fr_to_hex};
use annex_types::{ServerPolicy, TransferScope};
use annex_vrp::{AnchorSnapshot, CapabilityContract, FederationHandshake};

const TOPIC: &str = "annex:federation:v1";

fn dummy_vkey_json() -> String {
    let vk = generate_dummy_vkey();
    let g1 = |p: &annex_identity::zk::G1Affine| {
        serde_json::json!([p.x.to_string(), p.y.to_string(), "1"])
    };
    let g2 = |p: &annex_identity::zk::G2Affine| {
        serde_json::json!([
            [p.x.c0.to_string(), p.x.c1.to_string()],
            [p.y.c0.to_string(), p.y.c1.to_string()],
            ["1", "0"]
        ])
    };
    serde_json::json!({
        "vk_alpha_1": g1(&vk.alpha_g1),
        "vk_beta_2": g2(&vk.beta_g2),
        "vk_gamma_2": g2(&vk.gamma_g2),
        "vk_delta_2": g2(&vk.delta_g2),
        "IC": vk.gamma_abc_g1.iter().map(|p| g1(p)).collect::<Vec<_>>()
    })
    .to_string()
}

fn setup() -> (Connection, Instance) {
    let conn = Connection::open_in_memory().unwrap();
    annex_db::run_migrations(&conn).unwrap();
    conn.execute(
        "INSERT INTO servers (slug, label, signing_key_hex, public_key_hex)
         VALUES ('test', 'Test', '00', '00')",
        [],
    )
    .unwrap();
    let instance = register_instance(&conn, "https://peer.example", "Peer", &dummy_vkey_json())
        .unwrap();
    (conn, instance)
}

fn handshake(offered_scope: TransferScope, offered_caps: &[&str]) -> FederationHandshake {
    FederationHandshake {
        anchor_snapshot: AnchorSnapshot::new(&[], &[]).unwrap(),
        capability_contract: CapabilityContract {
            required_capabilities: vec![],
            offered_capabilities: offered_caps.iter().map(|s| s.to_string()).collect(),
        },
        offered_transfer_scope: offered_scope,
    }
}

fn establish_agreement(conn: &mut Connection, instance: &Instance, policy: &ServerPolicy) {
    process_incoming_handshake(
        conn,
        1,
        policy,
        instance,
        &handshake(TransferScope::ReflectionSummariesOnly, &[]),
    )
    .unwrap();
}

fn attestation(instance: &Instance, n: u64) -> Attestation {
    let commitment = fr_to_hex(annex_identity::zk::Fr::from(n));
    let root = fr_to_hex(annex_identity::zk::Fr::from(n + 1000));
    Attestation {
        remote_instance_id: instance.id,
        commitment_hex: commitment.clone(),
        vrp_topic: TOPIC.to_string(),
        proof: serde_json::json!({
            "pi_a": ["1", "1", "1"],
            "pi_b": [["1", "0"], ["0", "1"], ["1", "0"]],
            "pi_c": ["1", "1", "1"]
        }),
        public_signals: vec![format!("0x{root}"), format!("0x{commitment}")],
        remote_root_hex: root,
    }
}

#[test]
fn attestation_without_agreement_is_denied() {
    let (mut conn, instance) = setup();
    let policy = ServerPolicy::default();

    let err = process_attestation(&mut conn, 1, &policy, &attestation(&instance, 1)).unwrap_err();
    assert!(matches!(err, FederationError::Denied(_)));
}

#[test]
fn attestation_under_conflict_agreement_is_denied() {
    let (mut conn, instance) = setup();
    let mut policy = ServerPolicy::default();
    policy.prohibited_actions = vec!["X".to_string()];

    // The peer offers the prohibited action: agreement lands in Conflict.
    process_incoming_handshake(
        &mut conn,
        1,
        &policy,
        &instance,
        &handshake(TransferScope::FullKnowledgeBundle, &["X"]),
    )
    .unwrap();

    let err = process_attestation(&mut conn, 1, &policy, &attestation(&instance, 2)).unwrap_err();
    assert!(matches!(err, FederationError::Denied(_)));
}

#[test]
fn attestation_under_no_transfer_scope_is_denied() {
    let (mut conn, instance) = setup();
    let policy = ServerPolicy::default();

    // Aligned, but the peer offers no transfer at all.
    process_incoming_handshake(
        &mut conn,
        1,
        &policy,
        &instance,
        &handshake(TransferScope::NoTransfer, &[]),
    )
    .unwrap();

    let err = process_attestation(&mut conn, 1, &policy, &attestation(&instance, 3)).unwrap_err();
    assert!(matches!(err, FederationError::Denied(_)));
}

#[test]
fn tampered_pin_is_untrusted_peer_key() {
    let (mut conn, instance) = setup();
    let policy = ServerPolicy::default();
    establish_agreement(&mut conn, &instance, &policy);

    conn.execute("UPDATE instances SET public_key = 'deadbeef' WHERE id = ?1", [instance.id])
        .unwrap();

    let err = process_attestation(&mut conn, 1, &policy, &attestation(&instance, 4)).unwrap_err();
    assert!(matches!(err, FederationError::UntrustedPeerKey));
}

#[test]
fn garbage_proof_is_rejected_at_the_proof_boundary() {
    let (mut conn, instance) = setup();
    let policy = ServerPolicy::default();
    establish_agreement(&mut conn, &instance, &policy);

    let err = process_attestation(&mut conn, 1, &policy, &attestation(&instance, 5)).unwrap_err();
    assert!(matches!(
        err,
        FederationError::Identity(annex_identity::IdentityError::InvalidProof(_))
    ));
}

#[test]
fn unknown_instance_is_not_found() {
    let (mut conn, instance) = setup();
    let policy = ServerPolicy::default();
    establish_agreement(&mut conn, &instance, &policy);

    let mut att = attestation(&instance, 6);
    att.remote_instance_id = 999;
    let err = process_attestation(&mut conn, 1, &policy, &att).unwrap_err();
    assert!(matches!(err, FederationError::UnknownInstance(_)));
}

#[test]
fn recorded_identity_resolves_while_fresh() {
    let (mut conn, instance) = setup();
    let policy = ServerPolicy::default();
    establish_agreement(&mut conn, &instance, &policy);

    let att = attestation(&instance, 7);
    let pseudonym = record_attested_identity(&mut conn, 1, &policy, &instance, &att).unwrap();

    let expected_nullifier = derive_nullifier_hex(&att.commitment_hex, TOPIC);
    assert_eq!(pseudonym, derive_pseudonym_id(TOPIC, &expected_nullifier));

    let resolved = resolve_federated_identity(&mut conn, 1, &policy, &pseudonym).unwrap();
    assert_eq!(resolved.commitment_hex, att.commitment_hex);
    assert_eq!(resolved.vrp_topic, TOPIC);
    assert!(resolved.expires_at.is_none(), "no expiry unless policy sets one");

    // The attestation event landed in the log.
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM public_event_log WHERE event_type = 'FEDERATED_IDENTITY_ATTESTED'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn re_attestation_refreshes_rather_than_duplicates() {
    let (mut conn, instance) = setup();
    let policy = ServerPolicy::default();
    establish_agreement(&mut conn, &instance, &policy);

    let att = attestation(&instance, 8);
    record_attested_identity(&mut conn, 1, &policy, &instance, &att).unwrap();
    record_attested_identity(&mut conn, 1, &policy, &instance, &att).unwrap();

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM federated_identities", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn stale_identity_failing_reverification_is_deleted() {
    let (mut conn, instance) = setup();
    let policy = ServerPolicy::default();
    establish_agreement(&mut conn, &instance, &policy);

    let att = attestation(&instance, 9);
    let pseudonym = record_attested_identity(&mut conn, 1, &policy, &instance, &att).unwrap();

    // Push the record past the freshness TTL. Its cached proof is garbage,
    // so synchronous re-verification must fail.
    conn.execute(
        "UPDATE federated_identities SET last_verified_at = datetime('now', '-2 days')",
        [],
    )
    .unwrap();

    let err = resolve_federated_identity(&mut conn, 1, &policy, &pseudonym).unwrap_err();
    assert!(matches!(err, FederationError::IdentityExpired(_)));

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM federated_identities", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 0, "failed re-verification deletes the record");

    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM public_event_log WHERE event_type = 'FEDERATED_IDENTITY_EXPIRED'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn policy_expiry_populates_and_enforces_expires_at() {
    let (mut conn, instance) = setup();
    let mut policy = ServerPolicy::default();
    policy.federated_identity_expiry_seconds = Some(3600);
    establish_agreement(&mut conn, &instance, &policy);

    let att = attestation(&instance, 10);
    let pseudonym = record_attested_identity(&mut conn, 1, &policy, &instance, &att).unwrap();

    let expires_at: Option<String> = conn
        .query_row("SELECT expires_at FROM federated_identities", [], |r| r.get(0))
        .unwrap();
    assert!(expires_at.is_some());

    // Hard-expire the row; even a fresh last_verified_at cannot save it.
    conn.execute(
        "UPDATE federated_identities SET expires_at = datetime('now', '-1 minute')",
        [],
    )
    .unwrap();

    let err = resolve_federated_identity(&mut conn, 1, &policy, &pseudonym).unwrap_err();
    assert!(matches!(err, FederationError::IdentityExpired(_)));
}

#[test]
fn resolution_is_gated_by_current_agreement_state() {
    let (mut conn, instance) = setup();
    let mut policy = ServerPolicy::default();
    policy.prohibited_actions = vec!["X".to_string()];
    establish_agreement(&mut conn, &instance, &policy);

    let att = attestation(&instance, 11);
    let pseudonym = record_attested_identity(&mut conn, 1, &policy, &instance, &att).unwrap();

    // The peer re-handshakes into Conflict; cached identities stop
    // resolving immediately.
    conn.execute(
        "UPDATE federation_agreements SET updated_at = datetime('now', '-2 hours') WHERE active = 1",
        [],
    )
    .unwrap();
    process_incoming_handshake(
        &mut conn,
        1,
        &policy,
        &instance,
        &handshake(TransferScope::FullKnowledgeBundle, &["X"]),
    )
    .unwrap();

    let err = resolve_federated_identity(&mut conn, 1, &policy, &pseudonym).unwrap_err();
    assert!(matches!(err, FederationError::Denied(_)));

    // Instance lookup still works; only the transfer is blocked.
    assert!(get_instance(&conn, instance.id).unwrap().is_some());
}
