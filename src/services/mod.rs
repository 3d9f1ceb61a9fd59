/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Room snapshot reads and writes.
pub mod persistence;
/// Per-room actor driving a game session.
pub mod room_actor;
/// Outbound frame builders.
pub mod room_events;
/// Room lookup and command delivery.
pub mod room_service;
/// Round timers.
pub mod round_scheduler;
/// Round scoring rules.
pub mod scoring;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
