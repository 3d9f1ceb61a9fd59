use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::{
        room::JoinQuery,
        ws::{ClientMessage, InboundError},
    },
    services::{
        room_actor::{RoomCommand, RoomSettings},
        room_service,
    },
    state::{SharedState, registry::PlayerConnection},
};

/// Handle the full lifecycle of one player socket.
///
/// The handshake already identified the player, so the connection is handed
/// to the room actor right away and every later frame is forwarded to it.
pub async fn handle_socket(state: SharedState, socket: WebSocket, room_id: String, join: JoinQuery) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let player_id = join.player_id.clone();
    let connection = PlayerConnection::new(outbound_tx.clone());
    let connection_id = connection.id;

    info!(room_id = %room_id, player_id = %player_id, "player socket connected");
    room_service::dispatch(
        &state,
        &room_id,
        RoomCommand::Join {
            player_id: player_id.clone(),
            display_name: join.display_name(),
            settings: RoomSettings {
                mode: join.mode,
                tracks_per_player: join.tracks_per_player,
            },
            connection,
        },
    );

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(ClientMessage::Unknown) => {
                    debug!(room_id = %room_id, player_id = %player_id, payload = %text, "ignoring unknown message type");
                }
                Ok(message) => room_service::dispatch(
                    &state,
                    &room_id,
                    RoomCommand::Client {
                        player_id: player_id.clone(),
                        message,
                    },
                ),
                Err(InboundError::Parse(err)) => {
                    debug!(room_id = %room_id, player_id = %player_id, error = %err, "ignoring malformed frame");
                }
                Err(err @ InboundError::Validation(_)) => {
                    debug!(room_id = %room_id, player_id = %player_id, error = %err, "ignoring invalid frame");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                debug!(room_id = %room_id, player_id = %player_id, "client closed the socket");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(room_id = %room_id, player_id = %player_id, error = %err, "websocket error");
                break;
            }
        }
    }

    room_service::dispatch(&state, &room_id, RoomCommand::Leave { connection_id });
    info!(room_id = %room_id, player_id = %player_id, "player socket disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
