use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::room::{RoomPath, RoomStatusResponse},
    error::AppError,
    services::room_service,
    state::SharedState,
};

/// Routes exposing room status and administration.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/{room_id}", get(room_status))
        .route("/rooms/{room_id}/reset", post(reset_room))
}

/// Describe the current state of a room, loading it if it is not live.
#[utoipa::path(
    get,
    path = "/rooms/{room_id}",
    tag = "rooms",
    params(RoomPath),
    responses(
        (status = 200, description = "Room status", body = RoomStatusResponse),
        (status = 400, description = "Invalid room id"),
        (status = 503, description = "Room did not answer in time")
    )
)]
pub async fn room_status(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<RoomPath>>,
) -> Result<Json<RoomStatusResponse>, AppError> {
    let status = room_service::room_status(&state, &path.room_id).await?;
    Ok(Json(status))
}

/// Disconnect every player and clear the room back to an empty lobby.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/reset",
    tag = "rooms",
    params(RoomPath),
    responses(
        (status = 200, description = "Room reset", body = RoomStatusResponse),
        (status = 400, description = "Invalid room id"),
        (status = 503, description = "Room did not answer in time")
    )
)]
pub async fn reset_room(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<RoomPath>>,
) -> Result<Json<RoomStatusResponse>, AppError> {
    let status = room_service::reset_room(&state, &path.room_id).await?;
    Ok(Json(status))
}
