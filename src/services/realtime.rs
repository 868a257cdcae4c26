//! Fire-and-forget realtime notification after each committed change.

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::dto::events::{GameEvent, GameEventEnvelope, LobbyEvent, LobbyEventEnvelope};

/// Push side of the realtime layer, consumed right after a commit.
///
/// Implementations must never block and never fail the calling operation;
/// delivery problems are swallowed and logged.
pub trait RealtimeNotifier: Send + Sync {
    /// Push a committed state change to the game's room.
    fn notify_game(&self, game_id: Uuid, event: GameEvent);
    /// Push a lobby membership change to all lobby watchers.
    fn notify_lobby(&self, event: LobbyEvent);
}

/// Default notifier backed by tokio broadcast channels. The excluded
/// transport layer (and tests) subscribe and fan out however they like.
pub struct BroadcastHub {
    games: broadcast::Sender<GameEventEnvelope>,
    lobby: broadcast::Sender<LobbyEventEnvelope>,
}

impl BroadcastHub {
    /// Hub with per-stream channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (games, _) = broadcast::channel(capacity);
        let (lobby, _) = broadcast::channel(capacity);
        Self { games, lobby }
    }

    /// Register a subscriber for game-room events.
    pub fn subscribe_games(&self) -> broadcast::Receiver<GameEventEnvelope> {
        self.games.subscribe()
    }

    /// Register a subscriber for lobby events.
    pub fn subscribe_lobby(&self) -> broadcast::Receiver<LobbyEventEnvelope> {
        self.lobby.subscribe()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(16)
    }
}

impl RealtimeNotifier for BroadcastHub {
    fn notify_game(&self, game_id: Uuid, event: GameEvent) {
        let envelope = GameEventEnvelope {
            game_id,
            at: OffsetDateTime::now_utc(),
            event,
        };
        if let Err(err) = self.games.send(envelope) {
            // No subscribers; nothing to deliver to.
            debug!(%game_id, error = %err, "dropping game event");
        }
    }

    fn notify_lobby(&self, event: LobbyEvent) {
        let envelope = LobbyEventEnvelope {
            at: OffsetDateTime::now_utc(),
            event,
        };
        if let Err(err) = self.lobby.send(envelope) {
            debug!(error = %err, "dropping lobby event");
        }
    }
}
