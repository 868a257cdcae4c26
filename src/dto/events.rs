//! Realtime event envelopes pushed through the notifier after each commit.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::{
    chess::{ChessState, DrawAction},
    status::GameStatus,
};

/// Game-room event wrapped with its target game and emission time.
#[derive(Debug, Clone, Serialize)]
pub struct GameEventEnvelope {
    /// Target game.
    pub game_id: Uuid,
    /// Emission time.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    /// The event itself.
    #[serde(flatten)]
    pub event: GameEvent,
}

/// Committed state change broadcast to a game's room.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// The chess sub-state changed (move, timeout, resignation, draw).
    ChessState {
        /// Lifecycle status after the change.
        status: GameStatus,
        /// Winner, when the change decided one.
        winner: Option<String>,
        /// Snapshot of the chess sub-state.
        chess: Box<ChessState>,
    },
    /// A final score submission was recorded.
    ScoreSubmission {
        /// Winner hint, once every participant submitted.
        resolved_winner: Option<String>,
        /// Participants still owed a submission.
        waiting_for: Vec<String>,
    },
    /// A live-progress submission was recorded.
    LiveSubmission {
        /// Winner hint, once every participant is done.
        resolved_winner: Option<String>,
        /// Participants whose run is not done.
        waiting_for: Vec<String>,
    },
    /// A free-form merge landed in the document's extras block.
    StateMerged,
    /// The draw-offer sub-protocol advanced.
    DrawOffer {
        /// Action taken.
        action: DrawAction,
        /// Acting participant.
        by: String,
        /// Whether the action ended the game.
        game_over: bool,
    },
    /// A guest took the second seat.
    GameJoined {
        /// The guest's name.
        guest_name: String,
    },
    /// The game reached `finished` and settlement ran.
    GameFinished {
        /// Final winner; `None` for a draw.
        winner: Option<String>,
        /// Whether it ended in a draw.
        draw: bool,
        /// Points moved by settlement.
        stake_transferred: u32,
    },
    /// The game record was removed.
    GameDeleted,
}

/// Lobby event wrapped with its emission time.
#[derive(Debug, Clone, Serialize)]
pub struct LobbyEventEnvelope {
    /// Emission time.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    /// The event itself.
    #[serde(flatten)]
    pub event: LobbyEvent,
}

/// Change in the set of joinable games.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyEvent {
    /// A new `waiting` game appeared.
    GameCreated {
        /// Its identity.
        game_id: Uuid,
    },
    /// A game left the lobby (joined, finished early, or deleted).
    GameRemoved {
        /// Its identity.
        game_id: Uuid,
    },
}
