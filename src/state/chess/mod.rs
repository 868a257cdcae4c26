//! Chess sub-state embedded in a game session: position, move history,
//! per-side clock, and the draw-offer sub-protocol.

pub mod clock;
pub mod engine;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::state::game::participant_key;

pub use clock::{ChessClock, ClockConfig};
pub use engine::{CandidateMove, EngineError};

/// Side of the board. The host always sits on white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChessColor {
    /// The host's side.
    White,
    /// The guest's side.
    Black,
}

impl ChessColor {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

impl fmt::Display for ChessColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::White => "white",
            Self::Black => "black",
        })
    }
}

/// How a chess game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChessResult {
    /// The side to move is mated; the mover wins.
    Checkmate,
    /// The side to move has no legal move and is not in check.
    Stalemate,
    /// Neither side can ever mate.
    InsufficientMaterial,
    /// The same position occurred three times.
    ThreefoldRepetition,
    /// Fifty moves without a capture or pawn move.
    Draw,
    /// The side to move ran out of clock; the opponent wins.
    Timeout,
    /// A player resigned; the opponent wins.
    Resignation,
    /// Both players agreed to a draw.
    DrawAgreement,
}

impl ChessResult {
    /// Whether this outcome settles as a draw (no winner, no transfer).
    pub fn is_draw(self) -> bool {
        matches!(
            self,
            Self::Stalemate
                | Self::InsufficientMaterial
                | Self::ThreefoldRepetition
                | Self::Draw
                | Self::DrawAgreement
        )
    }
}

/// One applied move as stored in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEntry {
    /// Side that moved.
    pub color: ChessColor,
    /// Origin square.
    pub from: String,
    /// Destination square.
    pub to: String,
    /// Promotion piece letter, when promoting.
    pub promotion: Option<char>,
    /// Standard algebraic notation.
    pub san: String,
    /// Position after the move.
    pub fen_after: String,
    /// Clock time the mover spent on this move, in milliseconds.
    pub spent_ms: u64,
    /// Mover's remaining time after the move (increment included).
    pub remaining_ms: u64,
    /// When the move was committed.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// State of a draw offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawOfferStatus {
    /// Waiting for the opponent's response.
    Pending,
    /// The opponent accepted; the game ended in a draw agreement.
    Accepted,
    /// The opponent declined; play continues.
    Rejected,
    /// The offerer withdrew the offer.
    Cancelled,
}

/// A draw offer keyed by the offering participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawOffer {
    /// Participant who made the offer.
    pub offered_by: String,
    /// Current state of the offer.
    pub status: DrawOfferStatus,
    /// When the offer was made.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Participant who accepted/rejected/cancelled, once resolved.
    pub responded_by: Option<String>,
    /// When the offer was resolved.
    #[serde(with = "time::serde::rfc3339::option")]
    pub responded_at: Option<OffsetDateTime>,
}

/// Action on the draw-offer sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawAction {
    /// Propose a draw to the opponent.
    Offer,
    /// Accept the opponent's pending offer, ending the game.
    Accept,
    /// Decline the opponent's pending offer.
    Reject,
    /// Withdraw one's own pending offer.
    Cancel,
}

/// What a draw action did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawDecision {
    /// A fresh offer is now pending.
    Offered,
    /// The actor already had a pending offer; nothing changed.
    AlreadyPending,
    /// The game just ended by draw agreement.
    Accepted,
    /// The offer was declined; play continues.
    Rejected,
    /// The offer was withdrawn; play continues.
    Cancelled,
}

/// Rejections from the draw-offer machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawOfferError {
    /// The opponent's offer is pending and must be answered first.
    #[error("the opponent's draw offer is pending; respond to it first")]
    OpponentOfferPending,
    /// Accept/reject/cancel require a pending offer.
    #[error("no pending draw offer")]
    NoPendingOffer,
    /// One cannot accept or reject one's own offer.
    #[error("cannot respond to your own draw offer")]
    OwnOffer,
    /// Only the offerer may cancel.
    #[error("only the offering player may cancel the offer")]
    NotYourOffer,
}

/// Rejections from move application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChessMoveError {
    /// The game already has a terminal result.
    #[error("the game is already over")]
    GameOver,
    /// The actor moved out of turn.
    #[error("not your turn: it is {expected}'s move")]
    NotYourTurn {
        /// Side whose move it actually is.
        expected: ChessColor,
    },
    /// The rules engine rejected the move.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A committed move plus its consequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOutcome {
    /// Side that moved.
    pub mover: ChessColor,
    /// SAN of the move.
    pub san: String,
    /// Terminal classification reached by this move, if any.
    pub terminal: Option<ChessResult>,
}

/// Full chess sub-state persisted inside the game document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChessState {
    /// Position the game started from.
    #[serde(default = "engine::start_fen")]
    pub initial_fen: String,
    /// Current position.
    pub fen: String,
    /// Side to move (mirrors the FEN, stored for clients).
    pub turn: ChessColor,
    /// Whether the side to move is in check.
    pub in_check: bool,
    /// Frozen once a terminal result is set.
    pub game_over: bool,
    /// Terminal result tag, if the game is over.
    pub result: Option<ChessResult>,
    /// Side that flagged, when the game ended on time.
    pub timed_out: Option<ChessColor>,
    /// Most recent moves, oldest first.
    pub moves: Vec<MoveEntry>,
    /// Per-side countdown clock.
    pub clock: ChessClock,
    /// Draw offer, if one was ever made.
    pub draw_offer: Option<DrawOffer>,
    /// Last mutation time.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ChessState {
    /// Fresh sub-state at stake-reservation time: starting position, clock
    /// seeded from the (clamped) configuration but not yet ticking.
    pub fn initial(config: ClockConfig, now: OffsetDateTime) -> Self {
        let fen = engine::start_fen();
        Self {
            initial_fen: fen.clone(),
            fen,
            turn: ChessColor::White,
            in_check: false,
            game_over: false,
            result: None,
            timed_out: None,
            moves: Vec::new(),
            clock: ChessClock::from_config(config),
            draw_offer: None,
            updated_at: now,
        }
    }

    /// Start the clock ticking. Called once, when the guest joins.
    pub fn activate_clock(&mut self, now: OffsetDateTime) {
        self.clock.activate(now);
        self.updated_at = now;
    }

    /// Validate and apply a candidate move for `acting`.
    ///
    /// History is capped to the most recent `history_cap` entries; the FEN
    /// remains the source of truth for the position. A pending draw offer is
    /// dropped by any applied move.
    pub fn apply_move(
        &mut self,
        candidate: &CandidateMove,
        acting: ChessColor,
        now: OffsetDateTime,
        history_cap: usize,
    ) -> Result<AppliedOutcome, ChessMoveError> {
        if self.game_over {
            return Err(ChessMoveError::GameOver);
        }

        let side = engine::side_to_move(&self.fen)?;
        if acting != side {
            return Err(ChessMoveError::NotYourTurn { expected: side });
        }

        let charge = self.clock.charge(side, now);
        let prior = std::iter::once(self.initial_fen.as_str())
            .chain(self.moves.iter().map(|entry| entry.fen_after.as_str()));
        let applied = engine::apply_move(&self.fen, candidate, prior)?;

        let game_over = applied.terminal.is_some();
        let credited = self
            .clock
            .commit_move(side, charge.remaining_ms, now, game_over);

        self.moves.push(MoveEntry {
            color: side,
            from: candidate.from.clone(),
            to: candidate.to.clone(),
            promotion: candidate.promotion,
            san: applied.san.clone(),
            fen_after: applied.fen_after.clone(),
            spent_ms: charge.elapsed_ms,
            remaining_ms: credited,
            at: now,
        });
        if self.moves.len() > history_cap {
            let excess = self.moves.len() - history_cap;
            self.moves.drain(..excess);
        }

        self.fen = applied.fen_after;
        self.turn = side.opposite();
        self.in_check = applied.in_check;
        self.result = applied.terminal;
        self.game_over = game_over;
        if self.pending_offer().is_some() {
            self.draw_offer = None;
        }
        self.updated_at = now;

        Ok(AppliedOutcome {
            mover: side,
            san: applied.san,
            terminal: applied.terminal,
        })
    }

    /// Lazily decide whether the side to move has flagged.
    ///
    /// Evaluated on reads and at the head of move application — never from a
    /// background timer, so an untouched expired game stays as-is until the
    /// next caller surfaces it. On timeout the clock freezes and the
    /// opponent's color is returned as the winner.
    pub fn resolve_timeout(&mut self, now: OffsetDateTime) -> Option<ChessColor> {
        if self.game_over || !self.clock.is_running() {
            return None;
        }

        let side = self.turn;
        if self.clock.charge(side, now).remaining_ms > 0 {
            return None;
        }

        self.clock.freeze_expired(side);
        self.timed_out = Some(side);
        self.result = Some(ChessResult::Timeout);
        self.game_over = true;
        self.updated_at = now;
        Some(side.opposite())
    }

    /// End the game by resignation; the service records who wins.
    pub fn resign(&mut self, now: OffsetDateTime) {
        self.result = Some(ChessResult::Resignation);
        self.game_over = true;
        self.clock.last_tick_at = None;
        self.updated_at = now;
    }

    /// Drive the draw-offer machine for `actor`.
    pub fn apply_draw_action(
        &mut self,
        actor: &str,
        action: DrawAction,
        now: OffsetDateTime,
    ) -> Result<DrawDecision, DrawOfferError> {
        match action {
            DrawAction::Offer => match self.pending_offer() {
                Some(offer) if participant_key(&offer.offered_by) == participant_key(actor) => {
                    Ok(DrawDecision::AlreadyPending)
                }
                Some(_) => Err(DrawOfferError::OpponentOfferPending),
                None => {
                    self.draw_offer = Some(DrawOffer {
                        offered_by: actor.to_owned(),
                        status: DrawOfferStatus::Pending,
                        created_at: now,
                        responded_by: None,
                        responded_at: None,
                    });
                    self.updated_at = now;
                    Ok(DrawDecision::Offered)
                }
            },
            DrawAction::Accept => {
                let offer = self.pending_offer_mut()?;
                if participant_key(&offer.offered_by) == participant_key(actor) {
                    return Err(DrawOfferError::OwnOffer);
                }
                offer.status = DrawOfferStatus::Accepted;
                offer.responded_by = Some(actor.to_owned());
                offer.responded_at = Some(now);
                self.result = Some(ChessResult::DrawAgreement);
                self.game_over = true;
                self.clock.last_tick_at = None;
                self.updated_at = now;
                Ok(DrawDecision::Accepted)
            }
            DrawAction::Reject => {
                let offer = self.pending_offer_mut()?;
                if participant_key(&offer.offered_by) == participant_key(actor) {
                    return Err(DrawOfferError::OwnOffer);
                }
                offer.status = DrawOfferStatus::Rejected;
                offer.responded_by = Some(actor.to_owned());
                offer.responded_at = Some(now);
                self.updated_at = now;
                Ok(DrawDecision::Rejected)
            }
            DrawAction::Cancel => {
                let offer = self.pending_offer_mut()?;
                if participant_key(&offer.offered_by) != participant_key(actor) {
                    return Err(DrawOfferError::NotYourOffer);
                }
                offer.status = DrawOfferStatus::Cancelled;
                offer.responded_by = Some(actor.to_owned());
                offer.responded_at = Some(now);
                self.updated_at = now;
                Ok(DrawDecision::Cancelled)
            }
        }
    }

    fn pending_offer(&self) -> Option<&DrawOffer> {
        self.draw_offer
            .as_ref()
            .filter(|offer| offer.status == DrawOfferStatus::Pending)
    }

    fn pending_offer_mut(&mut self) -> Result<&mut DrawOffer, DrawOfferError> {
        self.draw_offer
            .as_mut()
            .filter(|offer| offer.status == DrawOfferStatus::Pending)
            .ok_or(DrawOfferError::NoPendingOffer)
    }
}
