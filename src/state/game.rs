//! Domain model for a game session: the stored record, the tagged per-type
//! payload union, and the always-present settlement receipt.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::chess::{ChessColor, ChessState, ClockConfig};
use crate::state::status::GameStatus;

/// Canonical lookup key for a participant name: trimmed and lower-cased.
pub fn participant_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Closed set of playable game types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    /// Reaction-time duel.
    Reflex,
    /// Rhythm-tapping duel.
    Rhythm,
    /// Arena variant of the rhythm duel.
    Arena,
    /// Full two-player chess with clocks.
    Chess,
    /// Head-to-head trivia.
    Trivia,
}

/// Tie-break applied when both submitted scores are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// The earlier-listed participant (the host) takes the win.
    FirstListed,
}

impl GameType {
    /// Whether moves for this type go through the chess sub-engine.
    pub fn is_chess(self) -> bool {
        matches!(self, Self::Chess)
    }

    /// Tie-break rule for score-based resolution.
    pub fn tie_break(self) -> TieBreak {
        TieBreak::FirstListed
    }

    /// Canonical snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reflex => "reflex",
            Self::Rhythm => "rhythm",
            Self::Arena => "arena",
            Self::Chess => "chess",
            Self::Trivia => "trivia",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's submitted final result for a score-based game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSubmission {
    /// Username as authenticated, preserved for display.
    pub username: String,
    /// Submitted score.
    pub score: u32,
    /// Free-form detail line, e.g. a reaction-time breakdown.
    pub detail: Option<String>,
    /// When the submission arrived.
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

/// A participant's in-progress live submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveProgress {
    /// Current score reported mid-game.
    pub score: Option<u32>,
    /// Whether the participant declared their run finished.
    pub done: bool,
    /// When the entry was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Live-progress block of a score board.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBoard {
    /// Game type the live run claims to be for; must match the record's.
    pub mode: Option<GameType>,
    /// Per-participant progress, keyed by canonical participant name.
    pub submissions: IndexMap<String, LiveProgress>,
}

/// Payload for score-based game types: final results plus live progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBoard {
    /// Per-participant final submissions, keyed by canonical name.
    pub results: IndexMap<String, ScoreSubmission>,
    /// Live progress block.
    #[serde(default)]
    pub live: LiveBoard,
}

impl ScoreBoard {
    /// Winner once every listed participant has a final submission: the
    /// highest score, ties resolved by the game type's rule.
    pub fn resolved_winner(&self, participants: &[&str], tie_break: TieBreak) -> Option<String> {
        self.pick_winner(participants, tie_break, |key| {
            self.results.get(key).map(|submission| submission.score)
        })
    }

    /// Winner once every listed participant has declared their live run done.
    pub fn live_winner(&self, participants: &[&str], tie_break: TieBreak) -> Option<String> {
        self.pick_winner(participants, tie_break, |key| {
            self.live
                .submissions
                .get(key)
                .filter(|entry| entry.done)
                .map(|entry| entry.score.unwrap_or(0))
        })
    }

    /// Participants that have not delivered a final submission yet.
    pub fn waiting_for(&self, participants: &[&str]) -> Vec<String> {
        participants
            .iter()
            .filter(|name| !self.results.contains_key(&participant_key(name)))
            .map(|name| (*name).to_owned())
            .collect()
    }

    /// Participants whose live run is not declared done yet.
    pub fn live_waiting_for(&self, participants: &[&str]) -> Vec<String> {
        participants
            .iter()
            .filter(|name| {
                !self
                    .live
                    .submissions
                    .get(&participant_key(name))
                    .is_some_and(|entry| entry.done)
            })
            .map(|name| (*name).to_owned())
            .collect()
    }

    fn pick_winner(
        &self,
        participants: &[&str],
        tie_break: TieBreak,
        score_of: impl Fn(&str) -> Option<u32>,
    ) -> Option<String> {
        if participants.len() < 2 {
            return None;
        }

        let mut best: Option<(&str, u32)> = None;
        for name in participants {
            let score = score_of(&participant_key(name))?;
            best = match best {
                None => Some((name, score)),
                Some((_, top)) if score > top => Some((name, score)),
                // Equal scores: the earlier-listed participant keeps the win.
                Some(current) => {
                    let TieBreak::FirstListed = tie_break;
                    Some(current)
                }
            };
        }

        best.map(|(name, _)| name.to_owned())
    }
}

/// Per-game-type sub-state, re-architected from the source's single untyped
/// JSON document into a tagged union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GamePayload {
    /// Chess position, history, clock, and draw-offer sub-state.
    Chess(ChessState),
    /// Score/live submissions for every other type.
    Score(ScoreBoard),
}

/// Exactly-once settlement receipt carried by every game document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Set to true the moment settlement runs; never unset.
    pub applied: bool,
    /// Points actually moved from loser to winner (0 for draws and
    /// degraded settlements).
    pub stake_transferred: u32,
    /// When settlement ran.
    #[serde(with = "time::serde::rfc3339::option")]
    pub settled_at: Option<OffsetDateTime>,
}

/// Structured state document of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDoc {
    /// Game-type-specific payload.
    pub payload: GamePayload,
    /// Winner hint surfaced by checkmate, timeout, resignation, or
    /// completed score submissions.
    pub resolved_winner: Option<String>,
    /// Whether the game concluded without a winner.
    #[serde(default)]
    pub draw: bool,
    /// Settlement receipt, always present.
    #[serde(default)]
    pub settlement: SettlementReceipt,
    /// Free-form keys accepted from legacy state merges. Reserved names are
    /// rejected before anything lands here.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

impl GameDoc {
    /// Document for a fresh chess game, clock seeded but inactive.
    pub fn chess(config: ClockConfig, now: OffsetDateTime) -> Self {
        Self::with_payload(GamePayload::Chess(ChessState::initial(config, now)))
    }

    /// Document for a fresh score-based game.
    pub fn score() -> Self {
        Self::with_payload(GamePayload::Score(ScoreBoard::default()))
    }

    fn with_payload(payload: GamePayload) -> Self {
        Self {
            payload,
            resolved_winner: None,
            draw: false,
            settlement: SettlementReceipt::default(),
            extras: Map::new(),
        }
    }

    /// Chess sub-state, if this is a chess document.
    pub fn chess_state(&self) -> Option<&ChessState> {
        match &self.payload {
            GamePayload::Chess(state) => Some(state),
            GamePayload::Score(_) => None,
        }
    }

    /// Mutable chess sub-state, if this is a chess document.
    pub fn chess_state_mut(&mut self) -> Option<&mut ChessState> {
        match &mut self.payload {
            GamePayload::Chess(state) => Some(state),
            GamePayload::Score(_) => None,
        }
    }

    /// Score board, if this is a score document.
    pub fn score_board(&self) -> Option<&ScoreBoard> {
        match &self.payload {
            GamePayload::Chess(_) => None,
            GamePayload::Score(board) => Some(board),
        }
    }

    /// Mutable score board, if this is a score document.
    pub fn score_board_mut(&mut self) -> Option<&mut ScoreBoard> {
        match &mut self.payload {
            GamePayload::Chess(_) => None,
            GamePayload::Score(board) => Some(board),
        }
    }
}

/// One game session: one row/record per match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Opaque identity.
    pub id: Uuid,
    /// Host display name; the host sits on white in chess.
    pub host_name: String,
    /// Guest display name, set when someone joins.
    pub guest_name: Option<String>,
    /// Game type, fixed at creation.
    pub game_type: GameType,
    /// Stake in points, fixed at creation, never mutated.
    pub points: u32,
    /// Venue table the game is scoped to.
    pub table: String,
    /// Lifecycle status.
    pub status: GameStatus,
    /// Final winner; `None` encodes a draw or an unresolved game.
    pub winner: Option<String>,
    /// Structured state document.
    pub doc: GameDoc,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Game {
    /// Build a fresh `waiting` game owned by `host_name`.
    pub fn new_waiting(
        host_name: String,
        game_type: GameType,
        points: u32,
        table: String,
        doc: GameDoc,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            host_name,
            guest_name: None,
            game_type,
            points,
            table,
            status: GameStatus::Waiting,
            winner: None,
            doc,
            created_at: now,
        }
    }

    /// Seated participants, host first.
    pub fn participants(&self) -> Vec<&str> {
        let mut names = vec![self.host_name.as_str()];
        if let Some(guest) = self.guest_name.as_deref() {
            names.push(guest);
        }
        names
    }

    /// Canonical participant name matching `name` case-insensitively.
    pub fn participant_matching(&self, name: &str) -> Option<&str> {
        let key = participant_key(name);
        self.participants()
            .into_iter()
            .find(|candidate| participant_key(candidate) == key)
    }

    /// The other seated participant.
    pub fn opponent_of(&self, name: &str) -> Option<&str> {
        let key = participant_key(name);
        self.participants()
            .into_iter()
            .find(|candidate| participant_key(candidate) != key)
    }

    /// Board color of a participant: host plays white, guest plays black.
    pub fn seat_of(&self, name: &str) -> Option<ChessColor> {
        let key = participant_key(name);
        if participant_key(&self.host_name) == key {
            return Some(ChessColor::White);
        }
        if self
            .guest_name
            .as_deref()
            .is_some_and(|guest| participant_key(guest) == key)
        {
            return Some(ChessColor::Black);
        }
        None
    }

    /// Participant seated on `color`, if that seat is taken.
    pub fn name_of_seat(&self, color: ChessColor) -> Option<&str> {
        match color {
            ChessColor::White => Some(self.host_name.as_str()),
            ChessColor::Black => self.guest_name.as_deref(),
        }
    }
}

/// Account fields the settlement engine reads and writes. All other user
/// mutations belong to external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Unique username.
    pub username: String,
    /// Spendable points balance.
    pub points: u32,
    /// Lifetime wins.
    pub wins: u32,
    /// Lifetime games played.
    pub games_played: u32,
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn submission(name: &str, score: u32) -> ScoreSubmission {
        ScoreSubmission {
            username: name.to_owned(),
            score,
            detail: None,
            submitted_at: datetime!(2025-06-01 12:00 UTC),
        }
    }

    fn sample_game() -> Game {
        let mut game = Game::new_waiting(
            "Alice".into(),
            GameType::Reflex,
            100,
            "TBL04".into(),
            GameDoc::score(),
            datetime!(2025-06-01 12:00 UTC),
        );
        game.guest_name = Some("Bob".into());
        game
    }

    #[test]
    fn winner_needs_every_participant_submitted() {
        let mut board = ScoreBoard::default();
        board.results.insert("alice".into(), submission("Alice", 10));

        assert_eq!(
            board.resolved_winner(&["Alice", "Bob"], TieBreak::FirstListed),
            None
        );
        assert_eq!(board.waiting_for(&["Alice", "Bob"]), vec!["Bob".to_owned()]);

        board.results.insert("bob".into(), submission("Bob", 5));
        assert_eq!(
            board.resolved_winner(&["Alice", "Bob"], TieBreak::FirstListed),
            Some("Alice".to_owned())
        );
        assert!(board.waiting_for(&["Alice", "Bob"]).is_empty());
    }

    #[test]
    fn equal_scores_go_to_the_host() {
        let mut board = ScoreBoard::default();
        board.results.insert("alice".into(), submission("Alice", 7));
        board.results.insert("bob".into(), submission("Bob", 7));

        assert_eq!(
            board.resolved_winner(&["Alice", "Bob"], TieBreak::FirstListed),
            Some("Alice".to_owned())
        );
    }

    #[test]
    fn live_winner_requires_everyone_done() {
        let mut board = ScoreBoard::default();
        board.live.submissions.insert(
            "alice".into(),
            LiveProgress {
                score: Some(12),
                done: true,
                updated_at: datetime!(2025-06-01 12:00 UTC),
            },
        );
        board.live.submissions.insert(
            "bob".into(),
            LiveProgress {
                score: Some(20),
                done: false,
                updated_at: datetime!(2025-06-01 12:00 UTC),
            },
        );

        assert_eq!(
            board.live_winner(&["Alice", "Bob"], TieBreak::FirstListed),
            None
        );
        assert_eq!(
            board.live_waiting_for(&["Alice", "Bob"]),
            vec!["Bob".to_owned()]
        );

        board.live.submissions.get_mut("bob").unwrap().done = true;
        assert_eq!(
            board.live_winner(&["Alice", "Bob"], TieBreak::FirstListed),
            Some("Bob".to_owned())
        );
    }

    #[test]
    fn participant_lookup_is_case_insensitive() {
        let game = sample_game();
        assert_eq!(game.participant_matching(" bob "), Some("Bob"));
        assert_eq!(game.participant_matching("ALICE"), Some("Alice"));
        assert_eq!(game.participant_matching("Carol"), None);
        assert_eq!(game.opponent_of("alice"), Some("Bob"));
    }

    #[test]
    fn host_sits_on_white() {
        let game = sample_game();
        assert_eq!(game.seat_of("alice"), Some(ChessColor::White));
        assert_eq!(game.seat_of("Bob"), Some(ChessColor::Black));
        assert_eq!(game.name_of_seat(ChessColor::Black), Some("Bob"));
    }

    #[test]
    fn payload_union_round_trips_with_its_tag() {
        let doc = GameDoc::chess(ClockConfig::default(), datetime!(2025-06-01 12:00 UTC));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["payload"]["kind"], "chess");

        let back: GameDoc = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);

        let json = serde_json::to_value(GameDoc::score()).unwrap();
        assert_eq!(json["payload"]["kind"], "score");
    }
}
