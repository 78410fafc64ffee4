//! Outbound peer client — initiating a handshake with a remote server.

use annex_vrp::FederationHandshake;

use crate::error::FederationError;
use crate::types::HandshakeResponse;

/// Posts the local handshake payload to a peer's handshake endpoint and
/// returns the peer's verdict.
///
/// The peer evaluates us against *its* policy; recording the agreement on
/// our side still requires the peer to handshake back (federation is
/// bilateral).
///
/// # Errors
///
/// Returns [`FederationError::Peer`] on transport failure or a non-2xx
/// response.
pub async fn initiate_handshake(
    peer_base_url: &str,
    handshake: &FederationHandshake,
) -> Result<HandshakeResponse, FederationError> {
    let url = format!(
        "{}/api/federation/handshake",
        peer_base_url.trim_end_matches('/')
    );

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(handshake)
        .send()
        .await?
        .error_for_status()?;

    let verdict = response.json::<HandshakeResponse>().await?;

    tracing::info!(
        peer = peer_base_url,
        alignment = verdict.alignment_status.as_str(),
        "outbound handshake completed"
    );

    Ok(verdict)
}
