use crate::AppState;
use crate::error::AppError;
use crate::validation;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_macros::debug_handler;
use matchforge_engine::{Credential, MatchId, MatchState, ServerId, ServerState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize, Serialize)]
pub struct RegisterServerRequest {
    pub ip: String,
    pub port: u16,
    pub game: String,
}

#[derive(Deserialize, Serialize)]
pub struct RegisterServerResponse {
    pub id: ServerId,
    pub access_token: String,
    pub refresh_token: String,
    pub uuid: String,
    pub ip: String,
    pub port: u16,
}

#[derive(Deserialize, Serialize)]
pub struct RenewServerRequest {
    pub id: ServerId,
}

#[derive(Deserialize, Serialize)]
pub struct ServerStateRequest {
    pub id: ServerId,
    pub state: String,
}

#[derive(Deserialize, Serialize)]
pub struct SetTokenRequest {
    pub id: ServerId,
    pub access_token: String,
}

#[derive(Deserialize, Serialize)]
pub struct AddCredentialResponse {
    pub id: ServerId,
}

#[derive(Deserialize, Serialize)]
pub struct MatchCreate {
    pub id: MatchId,
    pub game: String,
}

#[derive(Deserialize, Serialize)]
pub struct AdvertiseMatchRequest {
    pub server: ServerId,
    #[serde(rename = "match")]
    pub match_info: MatchCreate,
    /// Tokens for all the players, so the game server can check joins locally
    pub tokens: Vec<String>,
}

#[derive(Deserialize, Serialize)]
pub struct MatchStateRequest {
    pub server: ServerId,
    #[serde(rename = "match")]
    pub match_id: MatchId,
    pub state: String,
}

#[derive(Deserialize, Serialize)]
pub struct QueuePlayerRequest {
    pub player: String,
    pub game: String,
}

#[derive(Deserialize, Serialize)]
pub struct QueuePlayerResponse {
    /// Address of the server (e.g. example.com or 127.0.0.1)
    pub address: String,
    pub port: u16,
    pub token: String,
}

#[derive(Deserialize, Serialize)]
pub struct ConfirmPlayerRequest {
    pub server: ServerId,
    pub player: String,
    pub token: String,
}

#[derive(Deserialize, Serialize)]
pub struct ConfirmPlayerResponse {
    #[serde(rename = "match")]
    pub match_id: MatchId,
}

#[derive(Deserialize, Serialize)]
pub struct PlayerRequest {
    pub player: String,
}

#[derive(Deserialize, Serialize)]
pub struct PlayerActiveResponse {
    pub active: bool,
}

// Route: POST /api/servers/register
#[debug_handler]
pub(crate) async fn register_server(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterServerRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_address(&payload.ip, payload.port)?;
    validation::validate_game(&payload.game)?;

    let registered = state
        .engine
        .register_server(&payload.game, &payload.ip, payload.port)
        .await?;

    Ok((
        StatusCode::OK,
        Json(RegisterServerResponse {
            id: registered.id,
            access_token: registered.credential.access_token,
            refresh_token: registered.credential.refresh_token,
            uuid: registered.credential.uuid,
            ip: registered.ip,
            port: registered.port,
        }),
    ))
}

// Route: POST /api/servers/renew
pub(crate) async fn renew_server(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RenewServerRequest>,
) -> StatusCode {
    state.engine.refresh_server(payload.id).await;
    StatusCode::OK
}

// Route: POST /api/servers/set_state
pub(crate) async fn set_server_state(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ServerStateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let server_state: ServerState = payload
        .state
        .parse()
        .map_err(validation::ValidationError::from)?;

    state
        .engine
        .set_server_state(payload.id, server_state)
        .await;

    Ok(StatusCode::OK)
}

// Route: POST /api/servers/set_access_token
pub(crate) async fn set_access_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SetTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .engine
        .set_access_token(payload.id, payload.access_token)
        .await
        .map_err(|err| state.engine_error(err))?;

    Ok(StatusCode::OK)
}

// Route: POST /api/credentials/add
pub(crate) async fn add_credential(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Credential>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_account(&payload.account)?;

    let id = state
        .engine
        .add_credential(payload)
        .await
        .map_err(|err| state.engine_error(err))?;

    Ok((StatusCode::CREATED, Json(AddCredentialResponse { id })))
}

// Route: POST /api/matches/advertise
#[debug_handler]
pub(crate) async fn advertise_match(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AdvertiseMatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_game(&payload.match_info.game)?;
    validation::validate_token_pool(&payload.tokens)?;

    state
        .engine
        .advertise_match(
            payload.server,
            payload.match_info.id,
            &payload.match_info.game,
            payload.tokens,
        )
        .await?;

    Ok(StatusCode::OK)
}

// Route: POST /api/matches/set_state
pub(crate) async fn set_match_state(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MatchStateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let match_state: MatchState = payload
        .state
        .parse()
        .map_err(validation::ValidationError::from)?;

    state
        .engine
        .set_match_state(payload.server, payload.match_id, match_state)
        .await?;

    Ok(StatusCode::OK)
}

// Route: POST /api/players/queue
#[debug_handler]
pub(crate) async fn queue_player(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueuePlayerRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_account(&payload.player)?;
    validation::validate_game(&payload.game)?;

    let admission = state
        .engine
        .queue_player(&payload.game, &payload.player)
        .await?;

    // The lease can expire right after admission; give the seat back then
    let details = match state.engine.server_details(admission.server).await {
        Ok(details) => details,
        Err(err) => {
            state.engine.delete_player(&payload.player).await;
            return Err(err.into());
        }
    };

    Ok((
        StatusCode::OK,
        Json(QueuePlayerResponse {
            address: details.ip,
            port: details.port,
            token: admission.token,
        }),
    ))
}

// Route: POST /api/players/confirm
pub(crate) async fn confirm_player(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmPlayerRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_account(&payload.player)?;

    let match_id = state
        .engine
        .confirm_player(payload.server, &payload.player, &payload.token)
        .await?;

    Ok((StatusCode::OK, Json(ConfirmPlayerResponse { match_id })))
}

// Route: POST /api/players/remove
pub(crate) async fn remove_player(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PlayerRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_account(&payload.player)?;

    if state.engine.delete_player(&payload.player).await {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

// Route: GET /api/players/active?player=
pub(crate) async fn player_active(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlayerRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_account(&query.player)?;

    let active = state.engine.is_player_active(&query.player).await;

    Ok(Json(PlayerActiveResponse { active }))
}
