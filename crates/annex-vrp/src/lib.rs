//! VRP (Values-and-Role-Profile) trust negotiation for the Annex platform.
//!
//! Implements the alignment layer of federation: anchor snapshots, peer
//! anchor comparison, and transfer-scope negotiation. VRP is how Annex
//! enforces cryptographic trust rather than administrative trust: every
//! federation agreement is the output of a deterministic comparison
//! between the local policy root and the remote anchor, never of an
//! operator's say-so.
//!
//! The comparison is set-based and total: a peer is `Aligned` when it
//! covers every local principle and offers nothing prohibited, `Partial`
//! when principles overlap without any prohibition being violated, and
//! `Conflict` otherwise. Conflict forces the transfer scope to
//! `NoTransfer` regardless of what either side offered.

mod alignment;
mod server_root;
mod types;

pub use alignment::{compare_anchors, evaluate_handshake, negotiate_scope};
pub use server_root::ServerPolicyRoot;
pub use types::{
    AnchorSnapshot, CapabilityContract, FederationHandshake, ValidationReport, VrpError,
};
