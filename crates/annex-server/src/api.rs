//! Registry and membership-verification handlers, plus the uniform API
//! error type.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use annex_db::with_busy_retry;
use annex_identity::{
    activate_membership, get_path_for_commitment, register_identity, MembershipClaim, RoleCode,
};
use annex_types::{ErrorBody, ErrorKind};

use crate::AppState;

/// Deadline for registration (holds the Merkle single-writer lock).
const REGISTER_DEADLINE: Duration = Duration::from_secs(5);
/// Deadline for verification (covers the pairing check).
const VERIFY_DEADLINE: Duration = Duration::from_secs(20);

/// Uniform API error: a public kind, a message, and the optional
/// rate-limit hint. Serialises to `{error, message, retry_after_seconds?}`.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    retry_after_seconds: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    /// An internal failure surfaced as `ServiceUnavailable`; the detail
    /// goes to the log, not the client.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        tracing::error!(%detail, "internal error");
        Self::new(ErrorKind::ServiceUnavailable, "service unavailable")
    }

    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: "rate limit exceeded".to_string(),
            retry_after_seconds: Some(retry_after_seconds),
        }
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, "operation exceeded its deadline")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<annex_identity::IdentityError> for ApiError {
    fn from(err: annex_identity::IdentityError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::ServiceUnavailable {
            // Store/crypto internals stay in the structured log.
            return Self::internal(err);
        }
        Self::new(kind, err.to_string())
    }
}

impl From<annex_federation::FederationError> for ApiError {
    fn from(err: annex_federation::FederationError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::ServiceUnavailable {
            return Self::internal(err);
        }
        let retry_after_seconds = match &err {
            annex_federation::FederationError::HandshakeThrottled {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        };
        Self {
            kind,
            message: err.to_string(),
            retry_after_seconds,
        }
    }
}

impl From<annex_observe::ObserveError> for ApiError {
    fn from(err: annex_observe::ObserveError) -> Self {
        Self::internal(err)
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(err: r2d2::Error) -> Self {
        tracing::error!(%err, "connection pool exhausted or store unreachable");
        Self::new(ErrorKind::ServiceUnavailable, "store unavailable")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::InvalidInput | ErrorKind::PublicSignalMismatch => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidProof | ErrorKind::UntrustedPeerKey => StatusCode::UNAUTHORIZED,
            ErrorKind::FederationDenied => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UnknownRoot
            | ErrorKind::DuplicateCommitment
            | ErrorKind::NullifierReplay => StatusCode::CONFLICT,
            ErrorKind::FederatedIdentityExpired => StatusCode::GONE,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::CapacityExceeded => StatusCode::INSUFFICIENT_STORAGE,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        };

        let body = ErrorBody {
            error: self.kind,
            message: self.message,
            retry_after_seconds: self.retry_after_seconds,
        };

        (status, Json(body)).into_response()
    }
}

/// Runs a blocking closure on the blocking pool under a deadline.
///
/// On deadline expiry the operation is abandoned: a transaction still in
/// flight rolls back when its connection drops, and no event is emitted.
pub async fn run_blocking<T, F>(deadline: Duration, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(f)).await {
        Err(_) => Err(ApiError::timeout()),
        Ok(Err(join_err)) => Err(ApiError::internal(join_err)),
        Ok(Ok(result)) => result,
    }
}

/// Request body for identity registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// The identity commitment (64-char hex string).
    #[serde(rename = "commitmentHex")]
    pub commitment_hex: String,
    /// The role code of the participant (1..=5).
    #[serde(rename = "roleCode")]
    pub role_code: u8,
    /// The node ID used in the commitment derivation.
    #[serde(rename = "nodeId")]
    pub node_id: i64,
}

/// Response body for successful registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(rename = "identityId")]
    pub identity_id: i64,
    #[serde(rename = "leafIndex")]
    pub leaf_index: usize,
    #[serde(rename = "rootHex")]
    pub root_hex: String,
    #[serde(rename = "pathElements")]
    pub path_elements: Vec<String>,
    #[serde(rename = "pathIndexBits")]
    pub path_index_bits: Vec<u8>,
}

/// Response body for Merkle path retrieval.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetPathResponse {
    #[serde(rename = "leafIndex")]
    pub leaf_index: usize,
    #[serde(rename = "rootHex")]
    pub root_hex: String,
    #[serde(rename = "pathElements")]
    pub path_elements: Vec<String>,
    #[serde(rename = "pathIndexBits")]
    pub path_index_bits: Vec<u8>,
}

/// Response body for the current-root endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetRootResponse {
    #[serde(rename = "rootHex")]
    pub root_hex: String,
    #[serde(rename = "leafCount")]
    pub leaf_count: usize,
}

/// Request body for ZK membership verification.
#[derive(Debug, Deserialize)]
pub struct VerifyMembershipRequest {
    /// The Merkle root against which the proof was generated.
    pub root: String,
    /// The identity commitment.
    pub commitment: String,
    /// The topic for which the pseudonym is being derived.
    pub topic: String,
    /// The Groth16 proof (snarkjs JSON object).
    pub proof: serde_json::Value,
    /// The public signals `[root, commitment]`.
    #[serde(rename = "publicSignals")]
    pub public_signals: Vec<String>,
}

/// Response body for successful membership verification.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyMembershipResponse {
    pub ok: bool,
    #[serde(rename = "pseudonymId")]
    pub pseudonym_id: String,
}

/// Handler for `POST /api/registry/register`.
pub async fn register_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let role = RoleCode::from_u8(payload.role_code).ok_or_else(|| {
        ApiError::new(
            ErrorKind::InvalidInput,
            format!("invalid role code: {}", payload.role_code),
        )
    })?;

    let result = run_blocking(REGISTER_DEADLINE, move || {
        let mut conn = state.pool.get()?;

        // Single-writer lock: appends are globally serialised per server.
        let mut tree = state
            .merkle_tree
            .lock()
            .map_err(|_| ApiError::internal("merkle tree lock poisoned"))?;

        let result = with_busy_retry(|| {
            register_identity(
                &mut tree,
                &mut conn,
                state.server_id,
                &payload.commitment_hex,
                role,
                payload.node_id,
            )
        })?;
        Ok(result)
    })
    .await?;

    Ok(Json(RegisterResponse {
        identity_id: result.identity_id,
        leaf_index: result.leaf_index,
        root_hex: result.root_hex,
        path_elements: result.path_elements,
        path_index_bits: result.path_index_bits,
    }))
}

/// Handler for `GET /api/registry/path/{commitmentHex}`.
pub async fn get_path_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(commitment_hex): Path<String>,
) -> Result<Json<GetPathResponse>, ApiError> {
    let path = run_blocking(REGISTER_DEADLINE, move || {
        let conn = state.pool.get()?;
        let tree = state
            .merkle_tree
            .lock()
            .map_err(|_| ApiError::internal("merkle tree lock poisoned"))?;

        let path = get_path_for_commitment(&tree, &conn, &commitment_hex)?;
        Ok(path)
    })
    .await?;

    Ok(Json(GetPathResponse {
        leaf_index: path.leaf_index,
        root_hex: path.root_hex,
        path_elements: path.path_elements,
        path_index_bits: path.path_index_bits,
    }))
}

/// Handler for `GET /api/registry/current-root`.
pub async fn current_root_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<GetRootResponse>, ApiError> {
    let tree = state
        .merkle_tree
        .lock()
        .map_err(|_| ApiError::internal("merkle tree lock poisoned"))?;

    Ok(Json(GetRootResponse {
        root_hex: tree.root_hex(),
        leaf_count: tree.leaf_count(),
    }))
}

/// A topic catalog entry.
#[derive(Debug, Serialize)]
pub struct TopicEntry {
    pub topic: String,
    pub description: String,
}

/// Handler for `GET /api/registry/topics`.
pub async fn list_topics_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<TopicEntry>>, ApiError> {
    let topics = run_blocking(REGISTER_DEADLINE, move || {
        let conn = state.pool.get()?;
        let mut stmt = conn
            .prepare("SELECT topic, description FROM vrp_topics ORDER BY created_at ASC")
            .map_err(ApiError::internal)?;
        let topics = stmt
            .query_map([], |row| {
                Ok(TopicEntry {
                    topic: row.get(0)?,
                    description: row.get(1)?,
                })
            })
            .map_err(ApiError::internal)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)?;
        Ok(topics)
    })
    .await?;

    Ok(Json(topics))
}

/// A role catalog entry.
#[derive(Debug, Serialize)]
pub struct RoleEntry {
    #[serde(rename = "roleCode")]
    pub role_code: u8,
    pub label: &'static str,
}

/// Handler for `GET /api/registry/roles`. The role table is fixed by the
/// commitment scheme, so this is a static catalog.
pub async fn list_roles_handler() -> Json<Vec<RoleEntry>> {
    let roles = [
        RoleCode::Human,
        RoleCode::AiAgent,
        RoleCode::Collective,
        RoleCode::Bridge,
        RoleCode::Service,
    ]
    .into_iter()
    .map(|role| RoleEntry {
        role_code: role.as_u8(),
        label: role.label(),
    })
    .collect();

    Json(roles)
}

/// Handler for `POST /api/zk/verify-membership`.
pub async fn verify_membership_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<VerifyMembershipRequest>,
) -> Result<Json<VerifyMembershipResponse>, ApiError> {
    let outcome = run_blocking(VERIFY_DEADLINE, move || {
        let mut conn = state.pool.get()?;

        let claim = MembershipClaim {
            root_hex: payload.root,
            commitment_hex: payload.commitment,
            topic: payload.topic,
            proof: payload.proof,
            public_signals: payload.public_signals,
        };

        // No Merkle lock here: verification reads only historical roots
        // from the store and must not block concurrent appends.
        let outcome = with_busy_retry(|| {
            activate_membership(&mut conn, &state.membership_vkey, state.server_id, &claim)
        })?;
        Ok(outcome)
    })
    .await?;

    Ok(Json(VerifyMembershipResponse {
        ok: true,
        pseudonym_id: outcome.pseudonym_id,
    }))
}
