use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::room::{JoinQuery, RoomPath},
    services::websocket_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/ws/{room_id}",
    tag = "rooms",
    params(RoomPath, JoinQuery),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 400, description = "Invalid room id or handshake parameters")
    )
)]
/// Upgrade the HTTP connection into a player session of `room_id`.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<RoomPath>>,
    Valid(Query(join)): Valid<Query<JoinQuery>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_service::handle_socket(state, socket, path.room_id, join))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws/{room_id}", get(ws_handler))
}
