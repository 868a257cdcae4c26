//! Pure lifecycle state machine for game sessions.
//!
//! Every operation that wants to persist a status change must consult
//! [`assert_transition`] (or the typed [`ensure_transition`]) first. The
//! machine is stateless; callers own the stored status.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// Host created the game and is waiting for a guest.
    Waiting,
    /// Both seats are taken and play is in progress.
    Active,
    /// A terminal outcome has been determined but settlement is still in flight.
    Finishing,
    /// Terminal. The outcome and settlement receipt are frozen.
    Finished,
}

impl GameStatus {
    /// Parse a free-form status string after trimming and lower-casing it.
    pub fn parse_normalized(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "finishing" => Some(Self::Finishing),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }

    /// Whether this status accepts `to` as its successor.
    ///
    /// `active -> active` is the self-loop used for in-place state mutation
    /// without a lifecycle change. Nothing leaves `finished`, not even the
    /// identity transition.
    pub fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Waiting, Self::Active)
                | (Self::Waiting, Self::Finished)
                | (Self::Active, Self::Active)
                | (Self::Active, Self::Finishing)
                | (Self::Active, Self::Finished)
                | (Self::Finishing, Self::Finished)
        )
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Finishing => "finishing",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason a transition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCode {
    /// The current status is not a recognized lifecycle status.
    InvalidGameStatus,
    /// The requested target is not a recognized lifecycle status.
    InvalidTargetStatus,
    /// Both statuses are valid but the pair is not in the transition table.
    InvalidStatusTransition,
}

impl TransitionCode {
    /// Stable snake_case code for API consumers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidGameStatus => "invalid_game_status",
            Self::InvalidTargetStatus => "invalid_target_status",
            Self::InvalidStatusTransition => "invalid_status_transition",
        }
    }
}

/// Rejection returned by [`assert_transition`], carrying the normalized
/// endpoints for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition ({}): {from} -> {to}", code.as_str())]
pub struct TransitionError {
    /// Why the transition was rejected.
    pub code: TransitionCode,
    /// Normalized (trimmed, lower-cased) current status.
    pub from: String,
    /// Normalized requested status.
    pub to: String,
}

/// An accepted transition between two validated statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Validated current status.
    pub from: GameStatus,
    /// Validated target status.
    pub to: GameStatus,
}

/// Validate a transition between two free-form status strings.
///
/// Both endpoints are normalized (trim + lowercase) before validation so
/// statuses read back from storage can be checked verbatim.
pub fn assert_transition(from: &str, to: &str) -> Result<Transition, TransitionError> {
    let from_norm = from.trim().to_lowercase();
    let to_norm = to.trim().to_lowercase();

    let Some(from_status) = GameStatus::parse_normalized(&from_norm) else {
        return Err(TransitionError {
            code: TransitionCode::InvalidGameStatus,
            from: from_norm,
            to: to_norm,
        });
    };

    let Some(to_status) = GameStatus::parse_normalized(&to_norm) else {
        return Err(TransitionError {
            code: TransitionCode::InvalidTargetStatus,
            from: from_norm,
            to: to_norm,
        });
    };

    ensure_transition(from_status, to_status)
}

/// Typed variant of [`assert_transition`] for statuses already parsed.
pub fn ensure_transition(from: GameStatus, to: GameStatus) -> Result<Transition, TransitionError> {
    if !from.can_transition(to) {
        return Err(TransitionError {
            code: TransitionCode::InvalidStatusTransition,
            from: from.as_str().to_owned(),
            to: to.as_str().to_owned(),
        });
    }

    Ok(Transition { from, to })
}
