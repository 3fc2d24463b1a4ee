pub mod config;
mod error;
pub mod routes;
mod validation;

use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_extra::TypedHeader;
use headers::Authorization;
use headers::authorization::Bearer;
use matchforge_engine::{EngineError, Matchmaker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;

pub struct AppState {
    pub engine: Matchmaker,
    /// Shared secret expected as the bearer token on every /api route
    pub credential: String,
    /// Notified when the credential ledger fails; the server stops serving
    pub fatal: Arc<Notify>,
}

impl AppState {
    /// Turn an engine error into a response, raising the fatal signal for
    /// ledger failures.
    pub(crate) fn engine_error(&self, err: EngineError) -> AppError {
        if err.is_fatal() {
            tracing::error!(%err, "credential ledger failure, shutting down");
            self.fatal.notify_one();
        }
        AppError::Engine(err)
    }
}

/// Rate limiting configuration, per client IP
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per minute for server registration and credential intake
    pub register_per_min: u64,
    /// Burst size for registration
    pub register_burst: u32,
    /// Requests per second for player endpoints (queue, confirm, remove, active)
    pub player_per_sec: u64,
    /// Burst size for player endpoints
    pub player_burst: u32,
    /// Requests per second for server and match upkeep
    pub general_per_sec: u64,
    /// Burst size for server and match upkeep
    pub general_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            register_per_min: 30,
            register_burst: 10,
            player_per_sec: 50,
            player_burst: 100,
            general_per_sec: 10,
            general_burst: 20,
        }
    }
}

/// Governor quotas are given as the time to replenish one request, so a
/// rate of `requests` per `window_millis` becomes that window split evenly.
fn replenish_period_millis(requests: u64, window_millis: u64) -> u64 {
    (window_millis / requests.max(1)).max(1)
}

/// Reject /api requests that do not carry the shared credential.
async fn require_credential(
    State(state): State<Arc<AppState>>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match auth {
        Some(TypedHeader(auth)) if auth.token() == state.credential => Ok(next.run(request).await),
        _ => Err(AppError::Unauthorized),
    }
}

/// Create the application router around the given engine
pub fn create_app(
    engine: Matchmaker,
    credential: String,
    fatal: Arc<Notify>,
    request_body_limit: usize,
    request_timeout: Duration,
    rate_limit: RateLimitConfig,
) -> Router {
    let state = Arc::new(AppState {
        engine,
        credential,
        fatal,
    });

    // Strict rate limit for registration - once per server boot
    let register_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_period_millis(rate_limit.register_per_min, 60_000))
        .burst_size(rate_limit.register_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("rate limit period and burst are non-zero");

    // Lenient rate limit for player endpoints - players queue in waves
    let player_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_period_millis(rate_limit.player_per_sec, 1_000))
        .burst_size(rate_limit.player_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("rate limit period and burst are non-zero");

    // General rate limit for heartbeats and match upkeep
    let general_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_period_millis(rate_limit.general_per_sec, 1_000))
        .burst_size(rate_limit.general_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("rate limit period and burst are non-zero");

    let register_routes = Router::new()
        .route("/servers/register", post(routes::register_server))
        .route("/credentials/add", post(routes::add_credential))
        .layer(GovernorLayer::new(register_governor));

    let general_routes = Router::new()
        .route("/servers/renew", post(routes::renew_server))
        .route("/servers/set_state", post(routes::set_server_state))
        .route("/servers/set_access_token", post(routes::set_access_token))
        .route("/matches/advertise", post(routes::advertise_match))
        .route("/matches/set_state", post(routes::set_match_state))
        .layer(GovernorLayer::new(general_governor));

    let player_routes = Router::new()
        .route("/players/queue", post(routes::queue_player))
        .route("/players/confirm", post(routes::confirm_player))
        .route("/players/remove", post(routes::remove_player))
        .route("/players/active", get(routes::player_active))
        .layer(GovernorLayer::new(player_governor));

    let api = Router::new()
        .merge(register_routes)
        .merge(general_routes)
        .merge(player_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_credential,
        ));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .with_state(state)
}
