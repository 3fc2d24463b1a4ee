use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use matchforge_backend::{RateLimitConfig, create_app};
use matchforge_engine::{
    Credential, EngineConfig, JsonFileStore, Ledger, MatchState, Matchmaker, MemoryStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tower::ServiceExt;
// for `oneshot` method

const CREDENTIAL: &str = "test";

fn credential(i: usize) -> Credential {
    Credential {
        access_token: format!("access-{}", i),
        refresh_token: format!("refresh-{}", i),
        account: format!("account-{}", i),
        uuid: format!("uuid-{}", i),
    }
}

/// Helper to create an engine whose ledger holds `count` credentials
fn setup_engine(count: usize) -> Matchmaker {
    let ledger = Ledger::load(MemoryStore::new((0..count).map(credential).collect()))
        .expect("Failed to load in-memory ledger");
    Matchmaker::new(ledger, EngineConfig::default())
}

/// Helper to create app with default test configuration
fn create_test_app(engine: Matchmaker) -> axum::Router {
    let config = matchforge_backend::config::Config::default();
    create_app(
        engine,
        CREDENTIAL.to_string(),
        Arc::new(Notify::new()),
        config.request_body_limit,
        config.request_timeout,
        RateLimitConfig::default(),
    )
}

/// Helper to send a request and get response
async fn send_request(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    // The rate limiter keys requests by client IP
    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("X-Forwarded-For", "127.0.0.1");

    // Add Authorization header if provided
    if let Some(token) = auth_token {
        request_builder = request_builder.header("Authorization", format!("Bearer {}", token));
    }

    // Build request with body
    let request = if let Some(json_body) = body {
        request_builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json_body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    // Send request
    let response = app.oneshot(request).await.unwrap();

    // Extract status
    let status = response.status();

    // Extract body
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();

    // Try to parse as JSON, or return empty object
    let json = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send_request(app.clone(), "POST", uri, Some(body), Some(CREDENTIAL)).await
}

/// Server 0 at localhost:3000 with match 1 of "battle" accepting the given tokens
async fn setup_battle(app: &axum::Router, tokens: &[&str]) {
    let (status, body) = post(
        app,
        "/api/servers/register",
        json!({ "ip": "localhost", "port": 3000, "game": "battle" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 0);

    let (status, _) = post(
        app,
        "/api/matches/advertise",
        json!({ "server": 0, "match": { "id": 1, "game": "battle" }, "tokens": tokens }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        app,
        "/api/matches/set_state",
        json!({ "server": 0, "match": 1, "state": "accepting" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// HEALTH AND AUTH TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    // GIVEN: A running application
    let app = create_test_app(setup_engine(0));

    // WHEN: Making a GET request to /health without a credential
    let (status, _body) = send_request(app, "GET", "/health", None, None).await;

    // THEN: Should return 200 OK
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_api_requires_credential() {
    // GIVEN: A running application
    let app = create_test_app(setup_engine(1));
    let body = json!({ "ip": "localhost", "port": 3000, "game": "battle" });

    // WHEN: Registering without and with a wrong credential
    let (missing, _) = send_request(
        app.clone(),
        "POST",
        "/api/servers/register",
        Some(body.clone()),
        None,
    )
    .await;
    let (wrong, _) = send_request(
        app,
        "POST",
        "/api/servers/register",
        Some(body),
        Some("not-the-credential"),
    )
    .await;

    // THEN: Both are rejected
    assert_eq!(missing, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_player_rate_limit_replenishes_per_second_rate() {
    // GIVEN: Player routes limited to 10 requests per second with no burst
    let app = create_app(
        setup_engine(0),
        CREDENTIAL.to_string(),
        Arc::new(Notify::new()),
        1024 * 1024,
        Duration::from_secs(30),
        RateLimitConfig {
            player_per_sec: 10,
            player_burst: 1,
            ..RateLimitConfig::default()
        },
    );
    let uri = "/api/players/active?player=Steve";

    // WHEN: Two requests arrive back to back
    let (first, _) = send_request(app.clone(), "GET", uri, None, Some(CREDENTIAL)).await;
    let (second, _) = send_request(app.clone(), "GET", uri, None, Some(CREDENTIAL)).await;

    // THEN: The second one is throttled
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);

    // AND: A tenth of a second later there is room again
    tokio::time::sleep(Duration::from_millis(250)).await;
    let (third, _) = send_request(app, "GET", uri, None, Some(CREDENTIAL)).await;
    assert_eq!(third, StatusCode::OK);
}

// =============================================================================
// SERVER TESTS
// =============================================================================

#[tokio::test]
async fn test_register_server_hands_out_credential() {
    // GIVEN: A ledger with one credential
    let app = create_test_app(setup_engine(1));

    // WHEN: A game server registers
    let (status, body) = post(
        &app,
        "/api/servers/register",
        json!({ "ip": "10.0.0.5", "port": 25565, "game": "battle" }),
    )
    .await;

    // THEN: It gets the credential and its address back
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 0);
    assert_eq!(body["access_token"], "access-0");
    assert_eq!(body["refresh_token"], "refresh-0");
    assert_eq!(body["uuid"], "uuid-0");
    assert_eq!(body["ip"], "10.0.0.5");
    assert_eq!(body["port"], 25565);

    // AND: A second server finds the ledger exhausted
    let (status, _) = post(
        &app,
        "/api/servers/register",
        json!({ "ip": "10.0.0.6", "port": 25565, "game": "battle" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_renew_and_state_are_noops_for_unknown_servers() {
    // GIVEN: No registered servers
    let app = create_test_app(setup_engine(1));

    // WHEN: Renewing and setting state of an unknown server
    let (renew, _) = post(&app, "/api/servers/renew", json!({ "id": 4 })).await;
    let (state, _) = post(
        &app,
        "/api/servers/set_state",
        json!({ "id": 4, "state": "lobby" }),
    )
    .await;

    // THEN: Both succeed without effect
    assert_eq!(renew, StatusCode::OK);
    assert_eq!(state, StatusCode::OK);
}

#[tokio::test]
async fn test_server_state_change() {
    // GIVEN: A registered server
    let engine = setup_engine(1);
    let app = create_test_app(engine.clone());
    setup_battle(&app, &["a"]).await;

    // WHEN: It reports being in game
    let (status, _) = post(
        &app,
        "/api/servers/set_state",
        json!({ "id": 0, "state": "ingame" }),
    )
    .await;

    // THEN: The engine has the new state
    assert_eq!(status, StatusCode::OK);
    let details = engine.server_details(0).await.unwrap();
    assert_eq!(details.state, matchforge_engine::ServerState::Ingame);

    // AND: Unknown states are rejected
    let (status, _) = post(
        &app,
        "/api/servers/set_state",
        json!({ "id": 0, "state": "sleeping" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_credentials_are_persisted() {
    // GIVEN: A ledger stored in a temporary directory
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::load(JsonFileStore::in_dir(dir.path())).unwrap();
    let app = create_test_app(Matchmaker::new(ledger, EngineConfig::default()));

    // WHEN: A credential is added and its access token refreshed
    let (status, body) = post(
        &app,
        "/api/credentials/add",
        json!({
            "access_token": "old",
            "refresh_token": "refresh",
            "account": "Steve",
            "uuid": "uuid-steve"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 0);

    let (status, _) = post(
        &app,
        "/api/servers/set_access_token",
        json!({ "id": 0, "access_token": "new" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // THEN: The file holds the refreshed credential
    let stored: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("tokens.json")).unwrap()).unwrap();
    assert_eq!(
        stored,
        json!([{
            "access_token": "new",
            "refresh_token": "refresh",
            "account": "Steve",
            "uuid": "uuid-steve"
        }])
    );

    // AND: Unknown credentials are reported
    let (status, _) = post(
        &app,
        "/api/servers/set_access_token",
        json!({ "id": 3, "access_token": "new" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// MATCH TESTS
// =============================================================================

#[tokio::test]
async fn test_advertise_match() {
    // GIVEN: A registered server
    let engine = setup_engine(1);
    let app = create_test_app(engine.clone());
    post(
        &app,
        "/api/servers/register",
        json!({ "ip": "localhost", "port": 3000, "game": "battle" }),
    )
    .await;
    let request = json!({ "server": 0, "match": { "id": 1, "game": "battle" }, "tokens": ["a"] });

    // WHEN: A match is advertised
    let (status, _) = post(&app, "/api/matches/advertise", request.clone()).await;

    // THEN: It is registered as available with an untouched pool
    assert_eq!(status, StatusCode::OK);
    let snapshot = engine.match_snapshot(0, 1).await.unwrap();
    assert_eq!(snapshot.game, "battle");
    assert_eq!(snapshot.state, MatchState::Available);
    assert_eq!(snapshot.join_tokens, vec!["a".to_string()]);
    assert!(snapshot.players.is_empty());
    assert_eq!(engine.registry_snapshot("battle").await.len(), 1);

    // AND: The same match can't be advertised twice
    let (status, _) = post(&app, "/api/matches/advertise", request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        engine.match_snapshot(0, 1).await.unwrap().state,
        MatchState::Available
    );

    // AND: Not on a server that doesn't exist
    let (status, _) = post(
        &app,
        "/api/matches/advertise",
        json!({ "server": 5, "match": { "id": 1, "game": "battle" }, "tokens": ["a"] }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_advertise_rejects_invalid_pools() {
    // GIVEN: A registered server
    let app = create_test_app(setup_engine(1));
    post(
        &app,
        "/api/servers/register",
        json!({ "ip": "localhost", "port": 3000, "game": "battle" }),
    )
    .await;

    // WHEN: Advertising with an empty or repeating pool
    let (empty, _) = post(
        &app,
        "/api/matches/advertise",
        json!({ "server": 0, "match": { "id": 1, "game": "battle" }, "tokens": [] }),
    )
    .await;
    let (duplicate, _) = post(
        &app,
        "/api/matches/advertise",
        json!({ "server": 0, "match": { "id": 1, "game": "battle" }, "tokens": ["a", "a"] }),
    )
    .await;

    // THEN: Both are rejected
    assert_eq!(empty, StatusCode::BAD_REQUEST);
    assert_eq!(duplicate, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_set_state_on_unknown_match() {
    // GIVEN: A registered server without matches
    let app = create_test_app(setup_engine(1));
    post(
        &app,
        "/api/servers/register",
        json!({ "ip": "localhost", "port": 3000, "game": "battle" }),
    )
    .await;

    // WHEN: Setting the state of a match that doesn't exist
    let (status, _) = post(
        &app,
        "/api/matches/set_state",
        json!({ "server": 0, "match": 9, "state": "accepting" }),
    )
    .await;

    // THEN: Should return 404
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// PLAYER TESTS
// =============================================================================

#[tokio::test]
async fn test_player_lifecycle() {
    // GIVEN: Match 1 on localhost:3000 accepting one player
    let engine = setup_engine(1);
    let app = create_test_app(engine.clone());
    setup_battle(&app, &["test"]).await;

    // WHEN: A player queues
    let (status, body) = post(
        &app,
        "/api/players/queue",
        json!({ "player": "test", "game": "battle" }),
    )
    .await;

    // THEN: They get the token and the server address
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"], "test");
    assert_eq!(body["address"], "localhost");
    assert_eq!(body["port"], 3000);

    // AND: Another player finds no room
    let (status, _) = post(
        &app,
        "/api/players/queue",
        json!({ "player": "test2", "game": "battle" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // AND: The same player can't queue twice
    let (status, _) = post(
        &app,
        "/api/players/queue",
        json!({ "player": "test", "game": "battle" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // WHEN: The game server confirms the player
    let (status, body) = post(
        &app,
        "/api/players/confirm",
        json!({ "server": 0, "player": "test", "token": "test" }),
    )
    .await;

    // THEN: It learns the match
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["match"], 1);

    let (status, body) = send_request(
        app.clone(),
        "GET",
        "/api/players/active?player=test",
        None,
        Some(CREDENTIAL),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);

    // WHEN: The match ends
    let (status, _) = post(
        &app,
        "/api/matches/set_state",
        json!({ "server": 0, "match": 1, "state": "end" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // THEN: The player is gone and the match left the registry
    let (_, body) = send_request(
        app.clone(),
        "GET",
        "/api/players/active?player=test",
        None,
        Some(CREDENTIAL),
    )
    .await;
    assert_eq!(body["active"], false);
    assert!(engine.registry_snapshot("battle").await.is_empty());
}

#[tokio::test]
async fn test_confirm_with_wrong_token() {
    // GIVEN: A queued player
    let app = create_test_app(setup_engine(1));
    setup_battle(&app, &["right"]).await;
    post(
        &app,
        "/api/players/queue",
        json!({ "player": "Steve", "game": "battle" }),
    )
    .await;

    // WHEN: Confirming with a different token
    let (status, _) = post(
        &app,
        "/api/players/confirm",
        json!({ "server": 0, "player": "Steve", "token": "wrong" }),
    )
    .await;

    // THEN: Confirmation fails and the right token still works
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = post(
        &app,
        "/api/players/confirm",
        json!({ "server": 0, "player": "Steve", "token": "right" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // AND: Confirming again fails
    let (status, _) = post(
        &app,
        "/api/players/confirm",
        json!({ "server": 0, "player": "Steve", "token": "right" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_removed_player_frees_seat() {
    // GIVEN: A full one-seat match
    let engine = setup_engine(1);
    let app = create_test_app(engine.clone());
    setup_battle(&app, &["seat"]).await;
    post(
        &app,
        "/api/players/queue",
        json!({ "player": "Steve", "game": "battle" }),
    )
    .await;

    // WHEN: The player is removed
    let (status, _) = post(&app, "/api/players/remove", json!({ "player": "Steve" })).await;
    assert_eq!(status, StatusCode::OK);

    // THEN: The next player gets the same seat
    let (status, body) = post(
        &app,
        "/api/players/queue",
        json!({ "player": "Alex", "game": "battle" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"], "seat");

    // AND: Removing an unknown player reports it
    let (status, _) = post(&app, "/api/players/remove", json!({ "player": "Steve" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_server_releases_everything() {
    // GIVEN: A server with a confirmed player
    let engine = setup_engine(1);
    let app = create_test_app(engine.clone());
    setup_battle(&app, &["a", "b"]).await;
    post(
        &app,
        "/api/players/queue",
        json!({ "player": "Steve", "game": "battle" }),
    )
    .await;
    post(
        &app,
        "/api/players/confirm",
        json!({ "server": 0, "player": "Steve", "token": "a" }),
    )
    .await;

    // WHEN: The server stops renewing and its lease lapses
    engine
        .sweep_expired(Instant::now() + engine.config().server_ttl + Duration::from_secs(1))
        .await;

    // THEN: The player is gone, and the credential can be leased again
    assert!(!engine.is_player_active("Steve").await);
    let (status, body) = post(
        &app,
        "/api/servers/register",
        json!({ "ip": "localhost", "port": 3001, "game": "battle" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 0);

    // AND: The old match takes no one
    let (status, _) = post(
        &app,
        "/api/players/queue",
        json!({ "player": "Alex", "game": "battle" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
