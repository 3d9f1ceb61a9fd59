use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Taiacu Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::room::room_status,
        crate::routes::room::reset_room,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::RoomStatusResponse,
            crate::dto::room::PlayerSummary,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::TrackInput,
            crate::dto::phase::VisibleRoomPhase,
            crate::state::room::GameMode,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room sessions: player WebSocket and room administration"),
    )
)]
pub struct ApiDoc;
