//! Thin wrapper around the `shakmaty` rules engine.
//!
//! Positions are carried as FEN strings in the stored game document; this
//! module is the only place that parses them back into real positions,
//! resolves candidate moves against the legal move list, and classifies
//! terminal outcomes.

use shakmaty::{
    CastlingMode, Chess, EnPassantMode, Move, Position, Role, Square, fen::Fen, san::San,
};
use thiserror::Error;

use super::{ChessColor, ChessResult};

/// Failures surfaced while validating or applying a candidate move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The stored FEN could not be parsed back into a legal position.
    #[error("unreadable stored position: {0}")]
    Position(String),
    /// The candidate move is not legal in the current position.
    #[error("illegal move: {0}")]
    Illegal(String),
}

/// Candidate move in coordinate form, squares in algebraic syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMove {
    /// Origin square, e.g. `e2`.
    pub from: String,
    /// Destination square, e.g. `e4`.
    pub to: String,
    /// Promotion piece letter (`q`, `r`, `b`, `n`) when promoting.
    pub promotion: Option<char>,
}

/// Result of applying a legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    /// Standard algebraic notation of the move, from the pre-move position.
    pub san: String,
    /// Position after the move.
    pub fen_after: String,
    /// Whether the side now to move is in check.
    pub in_check: bool,
    /// Terminal classification of the resulting position, if any.
    pub terminal: Option<ChessResult>,
}

/// FEN of the standard starting position.
pub fn start_fen() -> String {
    fen_of(&Chess::default())
}

/// Side to move encoded in a stored FEN.
pub fn side_to_move(fen: &str) -> Result<ChessColor, EngineError> {
    Ok(parse_position(fen)?.turn().into())
}

/// Validate `candidate` against the position in `fen` and apply it.
///
/// `prior_fens` is the stored history of post-move positions (oldest first);
/// it feeds the threefold-repetition count, which the position itself does
/// not carry.
pub fn apply_move<'a>(
    fen: &str,
    candidate: &CandidateMove,
    prior_fens: impl IntoIterator<Item = &'a str>,
) -> Result<AppliedMove, EngineError> {
    let mut position = parse_position(fen)?;

    let from: Square = candidate
        .from
        .parse()
        .map_err(|_| EngineError::Illegal(format!("bad origin square `{}`", candidate.from)))?;
    let to: Square = candidate
        .to
        .parse()
        .map_err(|_| EngineError::Illegal(format!("bad target square `{}`", candidate.to)))?;
    let promotion = candidate
        .promotion
        .map(|letter| {
            Role::from_char(letter)
                .filter(|role| matches!(role, Role::Queen | Role::Rook | Role::Bishop | Role::Knight))
                .ok_or_else(|| EngineError::Illegal(format!("bad promotion piece `{letter}`")))
        })
        .transpose()?;

    let matched: Option<Move> = position
        .legal_moves()
        .iter()
        .find(|m| m.from() == Some(from) && m.to() == to && m.promotion() == promotion)
        .cloned();

    let Some(chess_move) = matched else {
        return Err(EngineError::Illegal(format!(
            "{}{} is not legal here",
            candidate.from, candidate.to
        )));
    };

    let san = San::from_move(&position, &chess_move).to_string();
    position.play_unchecked(&chess_move);
    let fen_after = fen_of(&position);
    let terminal = classify_terminal(&position, &fen_after, prior_fens);

    Ok(AppliedMove {
        san,
        in_check: position.is_check(),
        fen_after,
        terminal,
    })
}

/// Classify a position as terminal, or `None` while play continues.
///
/// Precedence: checkmate, stalemate, insufficient material, threefold
/// repetition, then the fifty-move draw.
fn classify_terminal<'a>(
    position: &Chess,
    fen_after: &str,
    prior_fens: impl IntoIterator<Item = &'a str>,
) -> Option<ChessResult> {
    if position.is_checkmate() {
        return Some(ChessResult::Checkmate);
    }
    if position.is_stalemate() {
        return Some(ChessResult::Stalemate);
    }
    if position.is_insufficient_material() {
        return Some(ChessResult::InsufficientMaterial);
    }

    let key = repetition_key(fen_after);
    let repeats = prior_fens
        .into_iter()
        .filter(|fen| repetition_key(fen) == key)
        .count();
    if repeats + 1 >= 3 {
        return Some(ChessResult::ThreefoldRepetition);
    }

    if position.halfmoves() >= 100 {
        return Some(ChessResult::Draw);
    }

    None
}

fn parse_position(fen: &str) -> Result<Chess, EngineError> {
    let parsed: Fen = fen
        .parse()
        .map_err(|_| EngineError::Position(format!("bad FEN `{fen}`")))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|err| EngineError::Position(err.to_string()))
}

fn fen_of(position: &Chess) -> String {
    Fen::from_position(position.clone(), EnPassantMode::Legal).to_string()
}

/// Piece placement, side to move, castling rights, and en-passant square —
/// the fields that make two positions "the same" for repetition purposes.
fn repetition_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

impl From<shakmaty::Color> for ChessColor {
    fn from(color: shakmaty::Color) -> Self {
        match color {
            shakmaty::Color::White => ChessColor::White,
            shakmaty::Color::Black => ChessColor::Black,
        }
    }
}
