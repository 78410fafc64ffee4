//! Router-level tests: the §4.5 operations over the wire contract, the
//! admission layer, and the capability gate.

use std::sync::{Arc, Mutex, RwLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use annex_identity::zk::generate_dummy_vkey;
use annex_identity::{fr_to_hex, record_activation, MerkleTree, MERKLE_DEPTH};
use annex_server::admission::RateLimiter;
use annex_server::{app, ensure_server, AppState};
use annex_types::ServerPolicy;

struct TestServer {
    state: AppState,
    router: axum::Router,
    // Held so the on-disk database outlives the test.
    _dir: tempfile::TempDir,
}

fn test_server() -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("annex.db");
    let pool = annex_db::create_pool(db_path.to_str().unwrap()).expect("pool");

    let server_id = {
        let conn = pool.get().unwrap();
        annex_db::run_migrations(&conn).unwrap();
        let (server_id, _) = ensure_server(&conn, "test", "Test Server").unwrap();
        server_id
    };

    let state = AppState {
        pool,
        merkle_tree: Arc::new(Mutex::new(MerkleTree::new(MERKLE_DEPTH))),
        membership_vkey: Arc::new(generate_dummy_vkey()),
        server_id,
        signing_key: Arc::new(ed25519_key()),
        policy: Arc::new(RwLock::new(ServerPolicy::default())),
        rate_limiter: RateLimiter::new(),
    };

    TestServer {
        router: app(state.clone()),
        state,
        _dir: dir,
    }
}

fn ed25519_key() -> ed25519_dalek::SigningKey {
    ed25519_dalek::SigningKey::from_bytes(&[7u8; 32])
}

fn commitment(n: u64) -> String {
    fr_to_hex(ark_bn254::Fr::from(n))
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register(router: &axum::Router, n: u64) -> (StatusCode, Value) {
    send(
        router,
        post_json(
            "/api/registry/register",
            &json!({"commitmentHex": commitment(n), "roleCode": 1, "nodeId": n}),
        ),
    )
    .await
}

#[tokio::test]
async fn health_check_returns_ok() {
    let server = test_server();
    let (status, body) = send(
        &server.router,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn register_returns_wire_shape() {
    let server = test_server();
    let (status, body) = register(&server.router, 1).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["leafIndex"], 0);
    assert_eq!(body["pathElements"].as_array().unwrap().len(), 20);
    assert_eq!(body["pathIndexBits"].as_array().unwrap().len(), 20);
    assert_eq!(body["rootHex"].as_str().unwrap().len(), 64);
    assert!(body["identityId"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn duplicate_registration_is_conflict() {
    let server = test_server();
    register(&server.router, 2).await;
    let (status, body) = register(&server.router, 2).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "DuplicateCommitment");
}

#[tokio::test]
async fn invalid_role_code_is_bad_request() {
    let server = test_server();
    let (status, body) = send(
        &server.router,
        post_json(
            "/api/registry/register",
            &json!({"commitmentHex": commitment(3), "roleCode": 9, "nodeId": 3}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");
}

#[tokio::test]
async fn path_refresh_and_current_root_agree() {
    let server = test_server();
    let (_, reg) = register(&server.router, 4).await;

    let (status, path) = send(
        &server.router,
        Request::builder()
            .uri(format!("/api/registry/path/{}", commitment(4)))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(path["leafIndex"], 0);
    assert_eq!(path["rootHex"], reg["rootHex"]);

    let (status, root) = send(
        &server.router,
        Request::builder()
            .uri("/api/registry/current-root")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(root["rootHex"], reg["rootHex"]);
    assert_eq!(root["leafCount"], 1);
}

#[tokio::test]
async fn unknown_commitment_path_is_not_found() {
    let server = test_server();
    let (status, body) = send(
        &server.router,
        Request::builder()
            .uri(format!("/api/registry/path/{}", commitment(99)))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

fn verify_body(root: &str, commitment_hex: &str, topic: &str) -> Value {
    json!({
        "root": root,
        "commitment": commitment_hex,
        "topic": topic,
        "proof": {
            "pi_a": ["1", "1", "1"],
            "pi_b": [["1", "0"], ["0", "1"], ["1", "0"]],
            "pi_c": ["1", "1", "1"]
        },
        "publicSignals": [format!("0x{root}"), format!("0x{commitment_hex}")]
    })
}

#[tokio::test]
async fn verify_against_unknown_root_is_conflict() {
    let server = test_server();
    register(&server.router, 5).await;

    let bogus_root = format!("{:0>64}", "1");
    let (status, body) = send(
        &server.router,
        post_json(
            "/api/zk/verify-membership",
            &verify_body(&bogus_root, &commitment(5), "annex:server:default:v1"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "UnknownRoot");
}

#[tokio::test]
async fn verify_with_garbage_proof_is_unauthorized() {
    let server = test_server();
    let (_, reg) = register(&server.router, 6).await;
    let root = reg["rootHex"].as_str().unwrap();

    let (status, body) = send(
        &server.router,
        post_json(
            "/api/zk/verify-membership",
            &verify_body(root, &commitment(6), "annex:server:default:v1"),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "InvalidProof");
}

#[tokio::test]
async fn verify_with_mismatched_signals_is_bad_request() {
    let server = test_server();
    let (_, reg) = register(&server.router, 7).await;
    let root = reg["rootHex"].as_str().unwrap();

    let mut body = verify_body(root, &commitment(7), "annex:server:default:v1");
    body["publicSignals"][1] = json!("12345");

    let (status, response) =
        send(&server.router, post_json("/api/zk/verify-membership", &body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "PublicSignalMismatch");
}

#[tokio::test]
async fn eleventh_registration_in_window_is_rate_limited() {
    let server = test_server();

    // Invalid role keeps the handler cheap; admission still charges the
    // registration bucket once per request.
    let body = json!({"commitmentHex": commitment(50), "roleCode": 9, "nodeId": 1});

    for i in 0..10 {
        let mut request = post_json("/api/registry/register", &body);
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        let (status, _) = send(&server.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "request {i} passes admission");
    }

    let mut request = post_json("/api/registry/register", &body);
    request
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
    let (status, response) = send(&server.router, request).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response["error"], "RateLimited");
    let retry = response["retry_after_seconds"].as_u64().unwrap();
    assert!(retry > 0 && retry <= 60);

    // A different IP still has budget.
    let mut request = post_json("/api/registry/register", &body);
    request
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.10".parse().unwrap());
    let (status, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Registers and activates the founder identity, returning its pseudonym.
fn activate_founder(server: &TestServer, n: u64) -> String {
    let mut conn = server.state.pool.get().unwrap();
    let mut tree = server.state.merkle_tree.lock().unwrap();
    annex_identity::register_identity(
        &mut tree,
        &mut conn,
        server.state.server_id,
        &commitment(n),
        annex_types::RoleCode::Human,
        n as i64,
    )
    .unwrap();
    drop(tree);

    record_activation(
        &mut conn,
        server.state.server_id,
        &commitment(n),
        "annex:server:default:v1",
    )
    .unwrap()
    .pseudonym_id
}

#[tokio::test]
async fn capability_gate_requires_header_and_moderator() {
    let server = test_server();
    let founder = activate_founder(&server, 8);

    let caps_body = json!({"capabilities": {
        "can_voice": true, "can_moderate": false, "can_invite": false,
        "can_federate": false, "can_bridge": false
    }});

    // No header.
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/identities/{founder}/capabilities"))
        .header("content-type", "application/json")
        .body(Body::from(caps_body.to_string()))
        .unwrap();
    let (status, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Unknown caller.
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/identities/{founder}/capabilities"))
        .header("content-type", "application/json")
        .header("x-annex-pseudonym", "nobody")
        .body(Body::from(caps_body.to_string()))
        .unwrap();
    let (status, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The founder holds can_moderate.
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/identities/{founder}/capabilities"))
        .header("content-type", "application/json")
        .header("x-annex-pseudonym", &founder)
        .body(Body::from(caps_body.to_string()))
        .unwrap();
    let (status, body) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_voice"], true);
    assert_eq!(body["can_moderate"], false);
}

#[tokio::test]
async fn policy_update_appends_version_and_swaps_snapshot() {
    let server = test_server();
    let founder = activate_founder(&server, 9);

    let mut new_policy = ServerPolicy::default();
    new_policy.max_members = 42;
    new_policy.principles = vec!["openness".to_string()];

    let request = Request::builder()
        .method("PUT")
        .uri("/api/admin/policy")
        .header("content-type", "application/json")
        .header("x-annex-pseudonym", &founder)
        .body(Body::from(serde_json::to_string(&new_policy).unwrap()))
        .unwrap();
    let (status, body) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["versionId"].as_i64().unwrap() > 0);

    let (status, policy) = send(
        &server.router,
        Request::builder()
            .uri("/api/admin/policy")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(policy["max_members"], 42);
    assert_eq!(policy["principles"][0], "openness");
}

#[tokio::test]
async fn events_endpoint_streams_the_audit_trail() {
    let server = test_server();
    register(&server.router, 10).await;
    register(&server.router, 11).await;

    let (status, events) = send(
        &server.router,
        Request::builder()
            .uri("/api/observe/events?domain=IDENTITY")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["seq"], 1);
    assert_eq!(events[1]["seq"], 2);
    assert_eq!(events[0]["event_type"], "IDENTITY_REGISTERED");

    let (status, filtered) = send(
        &server.router,
        Request::builder()
            .uri("/api/observe/events?after_seq=1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(filtered.as_array().unwrap().len(), 1);
}
