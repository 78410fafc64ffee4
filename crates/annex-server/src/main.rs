//! Annex server binary — identity + membership core entry point.
//!
//! Startup order matters: configuration, tracing, store + migrations,
//! the Poseidon circuit-compat self-check, the verifying key (wrong key
//! shape aborts boot), the server row and policy, then the Merkle
//! restore. Only a server that passed every check starts listening.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use annex_identity::poseidon::circuit_compat_check;
use annex_identity::zk::{parse_verification_key, validate_membership_vkey};
use annex_identity::{MerkleTree, MERKLE_DEPTH};
use annex_server::config::{apply_policy_env_overrides, load_config};
use annex_server::policy::{append_policy_version, load_latest_policy};
use annex_server::{app, ensure_server, retention, AppState};
use annex_types::ServerPolicy;

/// Seconds between retention sweeps.
const RETENTION_INTERVAL_SECONDS: u64 = 15 * 60;

#[tokio::main]
async fn main() {
    let config = load_config(Some("config.toml"))
        .expect("failed to load configuration — the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // The hash plane must agree with the client circuit library before
    // anything touches the tree.
    circuit_compat_check().expect("Poseidon disagrees with the circomlib test vectors");

    let pool = annex_db::create_pool(&config.database.path)
        .expect("failed to create database pool — check database.path in config");

    let (server_id, signing_key, policy, tree) = {
        let conn = pool.get().expect("failed to get database connection");

        let applied = annex_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }

        let (server_id, signing_key) =
            ensure_server(&conn, &config.server.slug, &config.server.label)
                .expect("failed to initialise server identity");

        let policy = match load_latest_policy(&conn, server_id)
            .expect("failed to load server policy")
        {
            Some(policy) => policy,
            None => {
                // First boot: seed version 1 from defaults + env overrides.
                let mut policy = ServerPolicy::default();
                apply_policy_env_overrides(&mut policy);
                let version_id = append_policy_version(&conn, server_id, &policy)
                    .expect("failed to seed initial policy version");
                tracing::info!(version_id, "seeded initial server policy");
                policy
            }
        };

        let tree = MerkleTree::restore(&conn, MERKLE_DEPTH)
            .expect("merkle restore failed — leaf log and active root disagree");
        tracing::info!(leaves = tree.leaf_count(), "merkle registry restored");

        (server_id, signing_key, policy, tree)
    };

    let vkey_json = std::fs::read_to_string(&config.zk.verifying_key_path).unwrap_or_else(|e| {
        panic!(
            "failed to read verifying key at {}: {e}",
            config.zk.verifying_key_path
        )
    });
    let vkey = parse_verification_key(&vkey_json).expect("verifying key does not parse");
    validate_membership_vkey(&vkey)
        .expect("verifying key does not match the membership circuit (depth 20, 2 public signals)");

    let state = AppState {
        pool: pool.clone(),
        merkle_tree: Arc::new(Mutex::new(tree)),
        membership_vkey: Arc::new(vkey),
        server_id,
        signing_key: Arc::new(signing_key),
        policy: Arc::new(RwLock::new(policy)),
        rate_limiter: annex_server::admission::RateLimiter::new(),
    };

    tokio::spawn(retention::start_retention_task(
        pool,
        server_id,
        state.policy.clone(),
        RETENTION_INTERVAL_SECONDS,
    ));

    let app = app(state).into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting annex server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("annex server shut down");
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
