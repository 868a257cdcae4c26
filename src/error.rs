//! Operation-boundary error taxonomy.
//!
//! Every session operation returns one of these; each carries a stable
//! machine-readable code plus enough context for the caller to render a
//! precise message. Only [`GameError::Internal`] is meant to be logged with
//! full detail and surfaced generically.

use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;
use crate::state::chess::{ChessColor, ChessMoveError, DrawOfferError, EngineError};
use crate::state::status::TransitionError;

/// Extra context attached to a [`GameError::Conflict`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConflictContext {
    /// No additional context.
    #[default]
    None,
    /// A status transition was rejected; normalized endpoints.
    Transition {
        /// Normalized current status.
        from: String,
        /// Normalized requested status.
        to: String,
    },
    /// A finish was requested against an already-settled different outcome.
    WinnerMismatch {
        /// Winner the caller asked for.
        requested: Option<String>,
        /// Winner stored on the finished game.
        stored: Option<String>,
    },
    /// The actor already has an open game.
    ExistingGame {
        /// Identity of the open game.
        id: Uuid,
    },
}

/// Errors surfaced by the game session service.
#[derive(Debug, Error)]
pub enum GameError {
    /// Malformed move or payload shape.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The actor is not a participant or admin of the target game.
    #[error("not allowed: {0}")]
    Authorization(String),
    /// The game id is unknown.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation is legal in shape but not in the current state.
    #[error("conflict: {message}")]
    Conflict {
        /// Stable snake_case conflict code.
        code: &'static str,
        /// Human-readable description.
        message: String,
        /// Machine-readable context for precise client messages.
        context: ConflictContext,
    },
    /// The chess rules engine rejected the move.
    #[error("illegal move: {0}")]
    IllegalMove(String),
    /// The actor moved out of turn.
    #[error("not your turn: it is {expected}'s move")]
    NotYourTurn {
        /// Side whose move it actually is.
        expected: ChessColor,
    },
    /// Store or transport failure.
    #[error("internal error")]
    Internal(#[from] StorageError),
}

impl GameError {
    /// Conflict without extra context.
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
            context: ConflictContext::None,
        }
    }

    /// Conflict with context.
    pub fn conflict_with(
        code: &'static str,
        message: impl Into<String>,
        context: ConflictContext,
    ) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
            context,
        }
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_input",
            Self::Authorization(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict { code, .. } => code,
            Self::IllegalMove(_) => "illegal_move",
            Self::NotYourTurn { .. } => "not_your_turn",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<TransitionError> for GameError {
    fn from(err: TransitionError) -> Self {
        let message = err.to_string();
        Self::Conflict {
            code: err.code.as_str(),
            message,
            context: ConflictContext::Transition {
                from: err.from,
                to: err.to,
            },
        }
    }
}

impl From<ChessMoveError> for GameError {
    fn from(err: ChessMoveError) -> Self {
        match err {
            ChessMoveError::GameOver => {
                Self::conflict("game_over", "the game already has a result")
            }
            ChessMoveError::NotYourTurn { expected } => Self::NotYourTurn { expected },
            ChessMoveError::Engine(EngineError::Illegal(message)) => Self::IllegalMove(message),
            ChessMoveError::Engine(EngineError::Position(message)) => {
                Self::Internal(StorageError::corrupted(message))
            }
        }
    }
}

impl From<DrawOfferError> for GameError {
    fn from(err: DrawOfferError) -> Self {
        let code = match err {
            DrawOfferError::OpponentOfferPending => "draw_offer_pending",
            DrawOfferError::NoPendingOffer => "no_pending_draw_offer",
            DrawOfferError::OwnOffer => "own_draw_offer",
            DrawOfferError::NotYourOffer => "not_your_draw_offer",
        };
        Self::conflict(code, err.to_string())
    }
}

impl From<ValidationErrors> for GameError {
    fn from(err: ValidationErrors) -> Self {
        Self::Validation(format!("validation failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::status::assert_transition;

    #[test]
    fn transition_rejections_keep_their_machine_code() {
        let err: GameError = assert_transition("finished", "active").unwrap_err().into();
        assert_eq!(err.code(), "invalid_status_transition");
        match err {
            GameError::Conflict { context, .. } => {
                assert_eq!(
                    context,
                    ConflictContext::Transition {
                        from: "finished".into(),
                        to: "active".into(),
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn turn_violation_has_its_own_code() {
        let err: GameError = ChessMoveError::NotYourTurn {
            expected: ChessColor::Black,
        }
        .into();
        assert_eq!(err.code(), "not_your_turn");
        assert!(err.to_string().contains("black"));
    }
}
