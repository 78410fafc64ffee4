//! Federation layer for the Annex platform.
//!
//! Implements server-to-server trust: the VRP handshake engine with its
//! re-entrant agreement state machine, the federated-identity attestation
//! cache with freshness re-verification, and the outbound peer client.
//!
//! Federation in Annex is sovereign and bilateral: each server
//! independently negotiates trust with each peer via VRP. There is no
//! central registry, no global authority, and no implicit trust. A
//! handshake may move a pair between `Aligned`, `Partial`, and `Conflict`
//! at any time; `Conflict` keeps the agreement row (with scope forced to
//! `NoTransfer`) but disables every onward accept path until a later
//! handshake clears it.

mod agreements;
mod attest;
mod client;
mod error;
mod handshake;
mod types;

pub use agreements::{
    get_active_agreement, get_instance, get_instance_by_url, list_instances, register_instance,
};
pub use attest::{
    process_attestation, record_attested_identity, resolve_federated_identity, Attestation,
    FederatedIdentity,
};
pub use client::initiate_handshake;
pub use error::FederationError;
pub use handshake::{process_incoming_handshake, HandshakeOutcome};
pub use types::{FederationAgreement, HandshakeResponse, Instance};
