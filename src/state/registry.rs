use std::collections::HashMap;

use axum::extract::ws::Message;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::room::PlayerId;

/// Identifier of a single WebSocket connection.
pub type ConnectionId = Uuid;

#[derive(Clone, Debug)]
/// Handle used to push messages to a connected player.
pub struct PlayerConnection {
    /// Unique per socket, so a stale socket can be told apart after a reconnect.
    pub id: ConnectionId,
    /// Writer channel feeding the socket's outbound task.
    pub tx: mpsc::UnboundedSender<Message>,
}

impl PlayerConnection {
    /// Wrap the writer channel of a freshly accepted socket.
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }
}

/// Live connections of one room, keyed both ways.
///
/// Only connection mappings live here: player records belong to the room
/// state and survive any change made through the registry.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_player: IndexMap<PlayerId, PlayerConnection>,
    by_connection: HashMap<ConnectionId, PlayerId>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `connection` to `player_id`, returning the connection it replaced.
    pub fn register(
        &mut self,
        player_id: PlayerId,
        connection: PlayerConnection,
    ) -> Option<PlayerConnection> {
        self.by_connection.insert(connection.id, player_id.clone());
        let previous = self.by_player.insert(player_id, connection);
        if let Some(previous) = previous.as_ref() {
            self.by_connection.remove(&previous.id);
        }
        previous
    }

    /// Detach a connection. A stale connection that was already replaced by a
    /// reconnect leaves the current mapping untouched and yields `None`.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<PlayerId> {
        let player_id = self.by_connection.remove(&connection_id)?;
        self.by_player.shift_remove(&player_id);
        Some(player_id)
    }

    /// Serialize `payload` once and push it to every registered connection.
    ///
    /// A closed connection is pruned and never affects the other recipients.
    pub fn broadcast<T>(&mut self, payload: &T)
    where
        T: ?Sized + Serialize + std::fmt::Debug,
    {
        let Some(message) = encode_message(payload) else {
            return;
        };

        let dead: Vec<PlayerId> = self
            .by_player
            .iter()
            .filter(|(_, connection)| connection.tx.send(message.clone()).is_err())
            .map(|(player_id, _)| player_id.clone())
            .collect();

        for player_id in dead {
            debug!(player_id = %player_id, "dropping closed connection after failed broadcast");
            self.remove_player(&player_id);
        }
    }

    /// Push `payload` to a single player. Returns `false` when the player is
    /// offline or its connection is closed.
    pub fn send_to<T>(&mut self, player_id: &str, payload: &T) -> bool
    where
        T: ?Sized + Serialize + std::fmt::Debug,
    {
        let Some(connection) = self.by_player.get(player_id) else {
            return false;
        };
        let Some(message) = encode_message(payload) else {
            return false;
        };
        if connection.tx.send(message).is_err() {
            debug!(player_id = %player_id, "dropping closed connection after failed send");
            self.remove_player(player_id);
            return false;
        }
        true
    }

    /// Ask every connection to close and forget all of them.
    pub fn close_all(&mut self) {
        for (_, connection) in self.by_player.drain(..) {
            let _ = connection.tx.send(Message::Close(None));
        }
        self.by_connection.clear();
    }

    /// Identifiers of the players currently connected, in connection order.
    pub fn list_online_ids(&self) -> Vec<PlayerId> {
        self.by_player.keys().cloned().collect()
    }

    /// Whether `player_id` has a live connection.
    pub fn is_online(&self, player_id: &str) -> bool {
        self.by_player.contains_key(player_id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.by_player.len()
    }

    /// True when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.by_player.is_empty()
    }

    fn remove_player(&mut self, player_id: &str) {
        if let Some(connection) = self.by_player.shift_remove(player_id) {
            self.by_connection.remove(&connection.id);
        }
    }
}

/// Serialize a payload into a text frame.
///
/// Serialization failures are a bug in the payload type; they are logged and
/// the frame is skipped.
fn encode_message<T>(value: &T) -> Option<Message>
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    match serde_json::to_string(value) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            None
        }
    }
}
