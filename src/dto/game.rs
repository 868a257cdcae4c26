//! Inputs and outputs of the session service operations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{format_timestamp, validation::validate_square},
    state::{
        chess::{CandidateMove, DrawAction, DrawDecision, DrawOffer},
        game::{Game, GameDoc, GameType},
        status::GameStatus,
    },
};

/// Resolved actor identity handed in by the external authentication layer.
///
/// This component never verifies credentials; it trusts these fields.
#[derive(Debug, Clone)]
pub struct Actor {
    /// Authenticated username.
    pub username: String,
    /// Whether the actor holds the admin role.
    pub is_admin: bool,
    /// Current points balance, read at authentication time.
    pub points: u32,
    /// Venue check-in state, when the actor is checked in.
    pub check_in: Option<CheckIn>,
}

/// Venue binding produced by the external check-in flow.
#[derive(Debug, Clone)]
pub struct CheckIn {
    /// Venue identity.
    pub cafe_id: String,
    /// Table the actor is seated at.
    pub table: String,
}

impl Actor {
    /// Table code of the actor's check-in, if any.
    pub fn table(&self) -> Option<&str> {
        self.check_in.as_ref().map(|check_in| check_in.table.as_str())
    }
}

/// Payload used to open a new game at a table.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateGameRequest {
    /// Game type to play.
    pub game_type: GameType,
    /// Stake in points; fixed for the game's lifetime.
    pub points: u32,
    /// Table override; the actor's check-in table wins when present.
    #[serde(default)]
    pub table: Option<String>,
    /// Requested chess clock, clamped into the supported ranges.
    #[serde(default)]
    pub clock: Option<ClockRequest>,
}

/// Requested chess clock configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClockRequest {
    /// Base thinking time per side, in seconds.
    pub base_seconds: u64,
    /// Increment per move, in seconds.
    pub increment_seconds: u64,
}

/// Seat designator used by admin overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Seat {
    /// The host's seat (white in chess).
    Host,
    /// The guest's seat (black in chess).
    Guest,
}

/// A chess move in coordinate form.
#[derive(Debug, Clone, Deserialize)]
pub struct ChessMoveInput {
    /// Origin square, algebraic syntax.
    pub from: String,
    /// Destination square, algebraic syntax.
    pub to: String,
    /// Promotion piece (`q`/`queen`, `r`/`rook`, `b`/`bishop`, `n`/`knight`).
    #[serde(default)]
    pub promotion: Option<String>,
    /// Seat to act for; honored only for admin actors.
    #[serde(default)]
    pub seat: Option<Seat>,
}

impl Validate for ChessMoveInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_square(&self.from) {
            errors.add("from", e);
        }
        if let Err(e) = validate_square(&self.to) {
            errors.add("to", e);
        }
        if self.promotion.is_some() && self.promotion_char().is_none() {
            errors.add("promotion", validator::ValidationError::new("promotion_piece"));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl ChessMoveInput {
    /// Normalized promotion letter, or `None` when absent or unrecognized.
    pub fn promotion_char(&self) -> Option<char> {
        let raw = self.promotion.as_deref()?.trim().to_lowercase();
        match raw.as_str() {
            "q" | "queen" => Some('q'),
            "r" | "rook" => Some('r'),
            "b" | "bishop" => Some('b'),
            "n" | "knight" => Some('n'),
            _ => None,
        }
    }

    /// Lowered into the engine's candidate form.
    pub fn candidate(&self) -> CandidateMove {
        CandidateMove {
            from: self.from.clone(),
            to: self.to.clone(),
            promotion: self.promotion_char(),
        }
    }
}

/// A participant's final score for a score-based game.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ScoreSubmissionInput {
    /// Submitted score.
    #[validate(range(max = 1_000_000))]
    pub score: u32,
    /// Free-form detail line.
    #[serde(default)]
    #[validate(length(max = 200))]
    pub detail: Option<String>,
}

/// A participant's live progress report.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveSubmissionInput {
    /// Game type the run claims to be for; must match the record's.
    #[serde(default)]
    pub mode: Option<GameType>,
    /// Current score.
    #[serde(default)]
    pub score: Option<u32>,
    /// Whether the run is finished.
    #[serde(default)]
    pub done: bool,
}

/// Exactly one move payload per request; the enum makes "more than one at
/// once" unrepresentable here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePayload {
    /// A chess move.
    Chess(ChessMoveInput),
    /// A live-progress submission.
    Live(LiveSubmissionInput),
    /// A final score submission.
    Score(ScoreSubmissionInput),
    /// A free-form state merge into the document's extras block.
    Merge(Map<String, Value>),
}

/// Action on the draw-offer sub-protocol (re-exported domain enum).
pub type DrawOfferAction = DrawAction;

/// Full projection of a game returned by every operation.
#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    /// Game identity.
    pub id: Uuid,
    /// Host display name.
    pub host_name: String,
    /// Guest display name, once seated.
    pub guest_name: Option<String>,
    /// Game type.
    pub game_type: GameType,
    /// Stake in points.
    pub points: u32,
    /// Venue table code.
    pub table: String,
    /// Lifecycle status.
    pub status: GameStatus,
    /// Final winner, when decided.
    pub winner: Option<String>,
    /// Structured state document.
    pub state: GameDoc,
    /// Creation time, RFC 3339.
    pub created_at: String,
}

impl From<Game> for GameSummary {
    fn from(game: Game) -> Self {
        Self {
            id: game.id,
            host_name: game.host_name,
            guest_name: game.guest_name,
            game_type: game.game_type,
            points: game.points,
            table: game.table,
            status: game.status,
            winner: game.winner,
            state: game.doc,
            created_at: format_timestamp(game.created_at),
        }
    }
}

/// Result of `join_game`.
#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    /// The joined game.
    pub game: GameSummary,
    /// True when the guest was already seated and simply reconnected.
    pub rejoined: bool,
}

/// The move that was just played, echoed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct PlayedMove {
    /// Origin square.
    pub from: String,
    /// Destination square.
    pub to: String,
    /// Standard algebraic notation.
    pub san: String,
}

/// Result of `make_move`.
#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    /// Updated game.
    pub game: GameSummary,
    /// Winner hint currently stored on the document.
    pub resolved_winner: Option<String>,
    /// Participants still owed a submission (score/live payloads).
    pub waiting_for: Vec<String>,
    /// True when the move surfaced an expired clock instead of applying.
    pub timeout: bool,
    /// The applied chess move, for chess payloads.
    pub played: Option<PlayedMove>,
}

/// Result of `draw_offer`.
#[derive(Debug, Clone, Serialize)]
pub struct DrawOfferOutcome {
    /// Updated game.
    pub game: GameSummary,
    /// What the action did.
    pub decision: DrawDecision,
    /// Offer record after the action.
    pub offer: Option<DrawOffer>,
}

/// Result of `finish_game`, `resign_game`, and the internal finish paths.
#[derive(Debug, Clone, Serialize)]
pub struct FinishOutcome {
    /// Finished game.
    pub game: GameSummary,
    /// Final winner; `None` for a draw.
    pub winner: Option<String>,
    /// Whether the game concluded without a winner.
    pub draw: bool,
    /// True when the game was already finished and this call was a no-op
    /// (settlement may still have been applied if a legacy write missed it).
    pub already_finished: bool,
    /// Points moved by settlement, from the stored receipt.
    pub stake_transferred: u32,
}
