//! Annex server library: application state, router, and bootstrap.

pub mod admission;
pub mod api;
pub mod api_admin;
pub mod api_federation;
pub mod api_observe;
pub mod config;
pub mod policy;
pub mod retention;

use std::sync::{Arc, Mutex, RwLock};

use axum::routing::{get, patch, post, put};
use axum::{Extension, Json, Router};
use ed25519_dalek::SigningKey;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use annex_db::DbPool;
use annex_identity::zk::{Bn254, VerifyingKey};
use annex_identity::MerkleTree;
use annex_types::ServerPolicy;

use admission::RateLimiter;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// In-memory Merkle tree behind the single-writer lock.
    pub merkle_tree: Arc<Mutex<MerkleTree>>,
    /// ZK membership verification key, loaded at startup.
    pub membership_vkey: Arc<VerifyingKey<Bn254>>,
    /// The local server ID.
    pub server_id: i64,
    /// The local server signing key (Ed25519).
    pub signing_key: Arc<SigningKey>,
    /// Live snapshot of the latest policy version.
    pub policy: Arc<RwLock<ServerPolicy>>,
    /// Admission-layer rate limiter.
    pub rate_limiter: RateLimiter,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes and the admission
/// middleware in front of them.
pub fn app(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health))
        .route("/api/registry/register", post(api::register_handler))
        .route(
            "/api/registry/path/{commitmentHex}",
            get(api::get_path_handler),
        )
        .route("/api/registry/current-root", get(api::current_root_handler))
        .route("/api/registry/topics", get(api::list_topics_handler))
        .route("/api/registry/roles", get(api::list_roles_handler))
        .route(
            "/api/zk/verify-membership",
            post(api::verify_membership_handler),
        )
        .route(
            "/api/federation/handshake",
            post(api_federation::handshake_handler),
        )
        .route(
            "/api/federation/attest-identity",
            post(api_federation::attest_identity_handler),
        )
        .route(
            "/api/federation/instances",
            post(api_federation::register_instance_handler)
                .get(api_federation::list_instances_handler),
        )
        .route(
            "/api/federation/peers/handshake",
            post(api_federation::outbound_handshake_handler),
        )
        .route("/api/observe/events", get(api_observe::events_handler))
        .route(
            "/api/admin/policy",
            put(api_admin::update_policy_handler).get(api_admin::get_policy_handler),
        )
        .route(
            "/api/identities/{pseudonymId}/capabilities",
            patch(api_admin::update_capabilities_handler),
        )
        .layer(axum::middleware::from_fn(admission::rate_limit_middleware))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Loads the server row for `slug`, creating it (with a fresh Ed25519
/// keypair) on first boot. Returns the row id and the signing key.
pub fn ensure_server(
    conn: &rusqlite::Connection,
    slug: &str,
    label: &str,
) -> Result<(i64, SigningKey), rusqlite::Error> {
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, signing_key_hex FROM servers WHERE slug = ?1",
            [slug],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((id, key_hex)) = existing {
        let bytes: [u8; 32] = hex::decode(&key_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    "corrupt stored signing key".into(),
                )
            })?;
        return Ok((id, SigningKey::from_bytes(&bytes)));
    }

    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    conn.execute(
        "INSERT INTO servers (slug, label, signing_key_hex, public_key_hex)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            slug,
            label,
            hex::encode(signing_key.to_bytes()),
            hex::encode(signing_key.verifying_key().to_bytes()),
        ],
    )?;

    Ok((conn.last_insert_rowid(), signing_key))
}
