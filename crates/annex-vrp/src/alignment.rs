//! Anchor comparison and transfer-scope negotiation.

use std::collections::HashSet;

use annex_types::{AlignmentStatus, TransferScope};

use crate::types::{AnchorSnapshot, FederationHandshake, ValidationReport};

/// Compares the local anchor against a remote anchor and handshake offer.
///
/// - `Conflict` when the remote offers (as a principle or a capability)
///   anything the local side prohibits, or when the principle sets are
///   disjoint.
/// - `Aligned` when every local principle is covered by the remote.
/// - `Partial` when the principle sets overlap without full coverage.
///
/// An empty local principle list is trivially covered.
pub fn compare_anchors(
    local: &AnchorSnapshot,
    remote: &AnchorSnapshot,
    remote_offered_capabilities: &[String],
) -> AlignmentStatus {
    let local_principles: HashSet<&str> = local.principles.iter().map(String::as_str).collect();
    let remote_principles: HashSet<&str> = remote.principles.iter().map(String::as_str).collect();

    let remote_offers: HashSet<&str> = remote_principles
        .iter()
        .copied()
        .chain(remote_offered_capabilities.iter().map(String::as_str))
        .collect();

    let violated = local
        .prohibited_actions
        .iter()
        .any(|action| remote_offers.contains(action.as_str()));
    if violated {
        return AlignmentStatus::Conflict;
    }

    if local_principles.is_subset(&remote_principles) {
        return AlignmentStatus::Aligned;
    }

    if local_principles
        .intersection(&remote_principles)
        .next()
        .is_some()
    {
        AlignmentStatus::Partial
    } else {
        AlignmentStatus::Conflict
    }
}

/// Negotiates the transfer scope on the total order
/// `NoTransfer < ReflectionSummariesOnly < FullKnowledgeBundle`.
///
/// Conflict disables transfer entirely; otherwise the result is the
/// minimum of what the local policy allows and what the remote offered.
pub fn negotiate_scope(
    status: AlignmentStatus,
    local_max: TransferScope,
    remote_offered: TransferScope,
) -> TransferScope {
    if status == AlignmentStatus::Conflict {
        TransferScope::NoTransfer
    } else {
        local_max.min(remote_offered)
    }
}

/// Evaluates an inbound handshake against the local anchor and scope
/// ceiling, producing the full validation report.
pub fn evaluate_handshake(
    local_anchor: &AnchorSnapshot,
    local_max_scope: TransferScope,
    handshake: &FederationHandshake,
) -> ValidationReport {
    let status = compare_anchors(
        local_anchor,
        &handshake.anchor_snapshot,
        &handshake.capability_contract.offered_capabilities,
    );
    let scope = negotiate_scope(status, local_max_scope, handshake.offered_transfer_scope);

    let remote_principles: HashSet<&str> = handshake
        .anchor_snapshot
        .principles
        .iter()
        .map(String::as_str)
        .collect();
    let covered = local_anchor
        .principles
        .iter()
        .filter(|p| remote_principles.contains(p.as_str()))
        .count();
    let alignment_score = if local_anchor.principles.is_empty() {
        1.0
    } else {
        covered as f32 / local_anchor.principles.len() as f32
    };

    let mut notes = vec![format!(
        "{covered}/{} local principles covered by peer",
        local_anchor.principles.len()
    )];
    for action in &local_anchor.prohibited_actions {
        let offered = handshake
            .capability_contract
            .offered_capabilities
            .iter()
            .chain(handshake.anchor_snapshot.principles.iter())
            .any(|o| o == action);
        if offered {
            notes.push(format!("peer offers prohibited action '{action}'"));
        }
    }
    notes.push(format!(
        "scope: min(local {}, offered {}) with status {status}",
        local_max_scope, handshake.offered_transfer_scope
    ));

    ValidationReport {
        alignment_status: status,
        transfer_scope: scope,
        alignment_score,
        negotiation_notes: notes,
    }
}
