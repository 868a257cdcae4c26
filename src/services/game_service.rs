//! Orchestration of the game session lifecycle.
//!
//! Every mutating operation follows the same pipeline: acquire the game's
//! lock from the registry, read the record, authorize the actor, mutate
//! through the domain state, run any status change past the state machine,
//! settle exactly once on entry into `finished`, write, then fire realtime
//! events. The store only ever sees individually-atomic reads and writes;
//! ordering comes from the lock.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::EngineConfig,
    dao::{
        game_store::{GameStore, LobbyFilter},
        storage::StorageError,
    },
    dto::{
        events::{GameEvent, LobbyEvent},
        game::{
            Actor, ChessMoveInput, CreateGameRequest, DrawOfferAction, DrawOfferOutcome,
            FinishOutcome, GameSummary, JoinOutcome, LiveSubmissionInput, MoveOutcome, MovePayload,
            PlayedMove, ScoreSubmissionInput, Seat,
        },
        validation::{normalize_table_code, validate_table_code},
    },
    error::{ConflictContext, GameError},
    services::{
        locks::LockRegistry,
        realtime::RealtimeNotifier,
        settlement::{Outcome, Settlement},
    },
    state::{
        chess::{ChessColor, ChessResult, DrawDecision},
        game::{Game, GameDoc, LiveProgress, ScoreSubmission, participant_key},
        status::{GameStatus, ensure_transition},
    },
};

/// Table assigned when neither the check-in nor the request names one.
const DEFAULT_TABLE: &str = "TBL00";

/// Document keys the free-form merge payload may never touch.
const RESERVED_MERGE_KEYS: [&str; 6] = [
    "payload",
    "kind",
    "settlement",
    "resolved_winner",
    "draw",
    "winner",
];

/// The game session service: the exposed surface of this crate.
pub struct GameSessions {
    store: Arc<dyn GameStore>,
    settlement: Settlement,
    notifier: Arc<dyn RealtimeNotifier>,
    config: EngineConfig,
    games: LockRegistry<Uuid>,
}

impl GameSessions {
    /// Service over an injected store and notifier.
    pub fn new(
        store: Arc<dyn GameStore>,
        notifier: Arc<dyn RealtimeNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            settlement: Settlement::new(store.clone()),
            store,
            notifier,
            config,
            games: LockRegistry::new(),
        }
    }

    /// Open a new `waiting` game hosted by the actor.
    pub async fn create_game(
        &self,
        actor: &Actor,
        request: CreateGameRequest,
    ) -> Result<GameSummary, GameError> {
        request.validate()?;
        if let Some(table) = request.table.as_deref() {
            validate_table_code(table).map_err(|err| GameError::Validation(err.to_string()))?;
        }

        if !actor.is_admin && actor.check_in.is_none() {
            return Err(GameError::Authorization(
                "check in at a venue table before creating a game".into(),
            ));
        }
        if request.points > self.config.stake_ceiling {
            return Err(GameError::Validation(format!(
                "stake exceeds the ceiling of {}",
                self.config.stake_ceiling
            )));
        }
        if !actor.is_admin && request.points > actor.points {
            return Err(GameError::conflict(
                "stake_exceeds_balance",
                "stake cannot exceed your current balance",
            ));
        }

        if let Some(existing) = self
            .store
            .find_open_for_user(actor.username.clone())
            .await?
        {
            return Err(GameError::conflict_with(
                "duplicate_game",
                "finish your current game before starting another",
                ConflictContext::ExistingGame { id: existing.id },
            ));
        }

        let now = OffsetDateTime::now_utc();
        let table = actor
            .table()
            .and_then(normalize_table_code)
            .or_else(|| request.table.as_deref().and_then(normalize_table_code))
            .unwrap_or_else(|| DEFAULT_TABLE.to_owned());

        let doc = if request.game_type.is_chess() {
            let clock = request
                .clock
                .map(|clock| {
                    crate::state::chess::ClockConfig::clamped(
                        clock.base_seconds,
                        clock.increment_seconds,
                    )
                })
                .unwrap_or(self.config.default_clock);
            GameDoc::chess(clock, now)
        } else {
            GameDoc::score()
        };

        let game = Game::new_waiting(
            actor.username.clone(),
            request.game_type,
            request.points,
            table,
            doc,
            now,
        );
        self.store.insert_game(game.clone()).await?;
        info!(game_id = %game.id, host = %game.host_name, game_type = %game.game_type, "game created");

        self.notifier
            .notify_lobby(LobbyEvent::GameCreated { game_id: game.id });
        Ok(game.into())
    }

    /// Take the guest seat of a `waiting` game.
    pub async fn join_game(&self, actor: &Actor, game_id: Uuid) -> Result<JoinOutcome, GameError> {
        if !actor.is_admin && actor.check_in.is_none() {
            return Err(GameError::Authorization(
                "check in at a venue table before joining a game".into(),
            ));
        }

        let _guard = self.games.acquire(game_id).await;
        let mut game = self.load(game_id).await?;

        if participant_key(&game.host_name) == participant_key(&actor.username) {
            return Err(GameError::Validation("you cannot join your own game".into()));
        }

        match game.status {
            GameStatus::Finished | GameStatus::Finishing => {
                return Err(GameError::conflict(
                    "already_finished",
                    "this game has already concluded",
                ));
            }
            GameStatus::Active => {
                // Reconnect support: the seated guest gets the state back.
                let is_guest = game
                    .guest_name
                    .as_deref()
                    .is_some_and(|guest| participant_key(guest) == participant_key(&actor.username));
                if is_guest {
                    return Ok(JoinOutcome {
                        game: game.into(),
                        rejoined: true,
                    });
                }
                return Err(GameError::conflict("game_full", "this game is full"));
            }
            GameStatus::Waiting => {}
        }

        if !actor.is_admin && actor.points < game.points {
            return Err(GameError::conflict(
                "stake_exceeds_balance",
                "your balance is below this game's stake",
            ));
        }

        if let Some(busy) = self
            .store
            .find_active_for_user(actor.username.clone())
            .await?
        {
            if busy.id != game_id {
                return Err(GameError::conflict_with(
                    "player_busy",
                    "you are already in an active game",
                    ConflictContext::ExistingGame { id: busy.id },
                ));
            }
        }

        ensure_transition(game.status, GameStatus::Active)?;
        let now = OffsetDateTime::now_utc();
        game.status = GameStatus::Active;
        game.guest_name = Some(actor.username.clone());
        if let Some(chess) = game.doc.chess_state_mut() {
            chess.activate_clock(now);
        }
        self.store.update_game(game.clone()).await?;
        info!(game_id = %game.id, guest = %actor.username, "guest joined");

        self.notifier.notify_game(
            game.id,
            GameEvent::GameJoined {
                guest_name: actor.username.clone(),
            },
        );
        self.notifier
            .notify_lobby(LobbyEvent::GameRemoved { game_id: game.id });

        Ok(JoinOutcome {
            game: game.into(),
            rejoined: false,
        })
    }

    /// Apply exactly one move payload to a game.
    pub async fn make_move(
        &self,
        actor: &Actor,
        game_id: Uuid,
        payload: MovePayload,
    ) -> Result<MoveOutcome, GameError> {
        let _guard = self.games.acquire(game_id).await;
        let mut game = self.load(game_id).await?;

        if game.status == GameStatus::Finished {
            return Err(GameError::conflict(
                "already_finished",
                "this game is finished; moves are not accepted",
            ));
        }

        let participant = game
            .participant_matching(&actor.username)
            .map(str::to_owned);
        if participant.is_none() && !actor.is_admin {
            return Err(GameError::Authorization(
                "you are not a player in this game".into(),
            ));
        }

        match payload {
            MovePayload::Chess(input) => self.chess_move(&mut game, actor, participant, input).await,
            MovePayload::Score(input) => {
                self.score_move(&mut game, actor, participant, input).await
            }
            MovePayload::Live(input) => self.live_move(&mut game, participant, input).await,
            MovePayload::Merge(map) => self.merge_move(&mut game, map).await,
        }
    }

    /// Drive the draw-offer sub-protocol.
    pub async fn draw_offer(
        &self,
        actor: &Actor,
        game_id: Uuid,
        action: DrawOfferAction,
    ) -> Result<DrawOfferOutcome, GameError> {
        let _guard = self.games.acquire(game_id).await;
        let mut game = self.load(game_id).await?;

        if !game.game_type.is_chess() {
            return Err(GameError::Validation(
                "draw offers apply to chess games".into(),
            ));
        }
        let Some(participant) = game
            .participant_matching(&actor.username)
            .map(str::to_owned)
        else {
            return Err(GameError::Authorization(
                "only a seated player may act on draw offers".into(),
            ));
        };
        if game.status != GameStatus::Active {
            return Err(GameError::conflict(
                "not_active",
                "draw offers require an active game",
            ));
        }

        let now = OffsetDateTime::now_utc();
        let decision = {
            let state = game
                .doc
                .chess_state_mut()
                .ok_or_else(|| chess_payload_missing(game_id))?;
            state.apply_draw_action(&participant, action, now)?
        };

        let mut transferred = 0;
        if decision == DrawDecision::Accepted {
            transferred = self.conclude(&mut game, Outcome::Draw, now).await?;
        } else {
            self.store.update_game(game.clone()).await?;
        }

        self.notifier.notify_game(
            game.id,
            GameEvent::DrawOffer {
                action,
                by: participant,
                game_over: decision == DrawDecision::Accepted,
            },
        );
        if decision == DrawDecision::Accepted {
            self.notifier.notify_game(
                game.id,
                GameEvent::GameFinished {
                    winner: None,
                    draw: true,
                    stake_transferred: transferred,
                },
            );
        }

        let offer = game.doc.chess_state().and_then(|state| state.draw_offer.clone());
        Ok(DrawOfferOutcome {
            game: game.into(),
            decision,
            offer,
        })
    }

    /// Concede the game; the opponent is declared winner.
    pub async fn resign_game(
        &self,
        actor: &Actor,
        game_id: Uuid,
    ) -> Result<FinishOutcome, GameError> {
        let _guard = self.games.acquire(game_id).await;
        let mut game = self.load(game_id).await?;

        let Some(participant) = game
            .participant_matching(&actor.username)
            .map(str::to_owned)
        else {
            return Err(GameError::Authorization(
                "only a seated player may resign".into(),
            ));
        };
        if game.status != GameStatus::Active {
            return Err(GameError::conflict(
                "not_active",
                "resignation requires an active game",
            ));
        }
        let Some(opponent) = game.opponent_of(&participant).map(str::to_owned) else {
            return Err(GameError::conflict(
                "no_opponent",
                "no opponent is seated in this game",
            ));
        };

        let now = OffsetDateTime::now_utc();
        if let Some(chess) = game.doc.chess_state_mut() {
            chess.resign(now);
        }
        let transferred = self
            .conclude(&mut game, Outcome::Winner(opponent.clone()), now)
            .await?;
        info!(game_id = %game.id, resigned = %participant, winner = %opponent, "resignation");

        self.emit_finish_events(&game, transferred);
        Ok(finish_outcome(game, false))
    }

    /// Resolve the winner and drive the game to `finished`, idempotently.
    pub async fn finish_game(
        &self,
        actor: &Actor,
        game_id: Uuid,
        requested_winner: Option<String>,
    ) -> Result<FinishOutcome, GameError> {
        let _guard = self.games.acquire(game_id).await;
        let mut game = self.load(game_id).await?;

        let participant = game
            .participant_matching(&actor.username)
            .map(str::to_owned);
        if participant.is_none() && !actor.is_admin {
            return Err(GameError::Authorization(
                "you are not allowed to close this game".into(),
            ));
        }

        // Anti-self-declare: a non-admin request may only name the opponent.
        let requested = requested_winner
            .as_deref()
            .and_then(|name| game.participant_matching(name))
            .map(str::to_owned);
        if let (Some(requested), Some(me), false) =
            (requested.as_deref(), participant.as_deref(), actor.is_admin)
        {
            if participant_key(requested) == participant_key(me) {
                return Err(GameError::conflict(
                    "self_declared_winner",
                    "you cannot declare yourself the winner",
                ));
            }
        }

        // Winner precedence: stored hint, then completed score submissions,
        // then the explicit request.
        let hint = game
            .doc
            .resolved_winner
            .as_deref()
            .and_then(|name| game.participant_matching(name))
            .map(str::to_owned);
        let from_scores = game.doc.score_board().and_then(|board| {
            board.resolved_winner(&game.participants(), game.game_type.tie_break())
        });
        let Some(winner) = hint.or(from_scores).or(requested) else {
            return Err(GameError::conflict(
                "winner_unresolved",
                "winner could not be determined; both players must submit results",
            ));
        };

        let now = OffsetDateTime::now_utc();
        if game.status == GameStatus::Finished {
            let stored_matches = game
                .winner
                .as_deref()
                .is_some_and(|stored| participant_key(stored) == participant_key(&winner));
            if !stored_matches {
                return Err(GameError::conflict_with(
                    "finished_outcome_mismatch",
                    "the game already finished with a different outcome",
                    ConflictContext::WinnerMismatch {
                        requested: Some(winner),
                        stored: game.winner.clone(),
                    },
                ));
            }

            // Legacy/partial write: the record is finished but settlement
            // never ran. Apply it now, once.
            if !game.doc.settlement.applied {
                let receipt = self
                    .settlement
                    .settle(&game, &Outcome::Winner(winner.clone()), now)
                    .await?;
                game.doc.settlement = receipt;
                self.store.update_game(game.clone()).await?;
                debug!(game_id = %game.id, "applied missing settlement on re-finish");
            }
            return Ok(finish_outcome(game, true));
        }

        let was_waiting = game.status == GameStatus::Waiting;
        let transferred = self
            .conclude(&mut game, Outcome::Winner(winner), now)
            .await?;
        info!(game_id = %game.id, winner = ?game.winner, transferred, "game finished");

        self.emit_finish_events(&game, transferred);
        if was_waiting {
            self.notifier
                .notify_lobby(LobbyEvent::GameRemoved { game_id: game.id });
        }
        Ok(finish_outcome(game, false))
    }

    /// Permanently remove a game record.
    pub async fn delete_game(&self, actor: &Actor, game_id: Uuid) -> Result<(), GameError> {
        let _guard = self.games.acquire(game_id).await;
        let game = self.load(game_id).await?;

        if !actor.is_admin && game.participant_matching(&actor.username).is_none() {
            return Err(GameError::Authorization(
                "you are not allowed to delete this game".into(),
            ));
        }

        self.store.delete_game(game_id).await?;
        info!(game_id = %game_id, by = %actor.username, "game deleted");

        self.notifier.notify_game(game_id, GameEvent::GameDeleted);
        self.notifier
            .notify_lobby(LobbyEvent::GameRemoved { game_id });
        Ok(())
    }

    /// Read a game, surfacing (and settling) an expired chess clock first.
    pub async fn get_game_state(
        &self,
        actor: &Actor,
        game_id: Uuid,
    ) -> Result<GameSummary, GameError> {
        let _guard = self.games.acquire(game_id).await;
        let mut game = self.load(game_id).await?;

        if !actor.is_admin && game.participant_matching(&actor.username).is_none() {
            return Err(GameError::Authorization(
                "only participants may view this game".into(),
            ));
        }

        if game.status == GameStatus::Active {
            let now = OffsetDateTime::now_utc();
            let flag_winner = game
                .doc
                .chess_state_mut()
                .and_then(|state| state.resolve_timeout(now));
            if let Some(winner_color) = flag_winner {
                let winner = game.name_of_seat(winner_color).map(str::to_owned);
                let outcome = match winner.clone() {
                    Some(name) => Outcome::Winner(name),
                    None => Outcome::Draw,
                };
                let transferred = self.conclude(&mut game, outcome, now).await?;
                info!(game_id = %game.id, winner = ?winner, "clock expiry settled on read");
                self.emit_finish_events(&game, transferred);
            }
        }

        Ok(game.into())
    }

    /// Waiting games visible to the actor, optionally scoped to a table.
    pub async fn list_waiting_games(
        &self,
        actor: &Actor,
        requested_table: Option<String>,
    ) -> Result<Vec<GameSummary>, GameError> {
        // Without a check-in there is no lobby to see.
        if !actor.is_admin && actor.check_in.is_none() {
            return Ok(Vec::new());
        }

        let table = if actor.is_admin {
            requested_table.as_deref().and_then(normalize_table_code)
        } else {
            actor.table().and_then(normalize_table_code)
        };

        let games = self.store.list_waiting(LobbyFilter { table }).await?;
        Ok(games.into_iter().map(Into::into).collect())
    }

    /// Most recent active game the user is seated in.
    pub async fn latest_active_game_for_user(
        &self,
        username: &str,
    ) -> Result<Option<GameSummary>, GameError> {
        let game = self.store.find_active_for_user(username.to_owned()).await?;
        Ok(game.map(Into::into))
    }

    async fn chess_move(
        &self,
        game: &mut Game,
        actor: &Actor,
        participant: Option<String>,
        input: ChessMoveInput,
    ) -> Result<MoveOutcome, GameError> {
        input.validate()?;
        if !game.game_type.is_chess() {
            return Err(GameError::Validation(
                "this game type does not accept chess moves".into(),
            ));
        }
        if game.status != GameStatus::Active {
            return Err(GameError::conflict(
                "not_active",
                "chess moves require an active game",
            ));
        }

        let color = match &participant {
            Some(name) => game.seat_of(name).ok_or_else(|| {
                GameError::Authorization("you have no seat in this chess game".into())
            })?,
            // Admin override: act for a named seat, defaulting to the host's.
            None if actor.is_admin => match input.seat {
                Some(Seat::Guest) => ChessColor::Black,
                _ => ChessColor::White,
            },
            None => {
                return Err(GameError::Authorization(
                    "you have no seat in this chess game".into(),
                ));
            }
        };

        let now = OffsetDateTime::now_utc();

        // Expired clocks settle before any move is considered.
        let flag_winner = {
            let state = game
                .doc
                .chess_state_mut()
                .ok_or_else(|| chess_payload_missing(game.id))?;
            state.resolve_timeout(now)
        };
        if let Some(winner_color) = flag_winner {
            let winner = game.name_of_seat(winner_color).map(str::to_owned);
            let outcome = match winner {
                Some(name) => Outcome::Winner(name),
                None => Outcome::Draw,
            };
            let transferred = self.conclude(game, outcome, now).await?;
            self.emit_chess_state(game);
            self.emit_finish_events(game, transferred);
            return Ok(MoveOutcome {
                resolved_winner: game.doc.resolved_winner.clone(),
                waiting_for: Vec::new(),
                timeout: true,
                played: None,
                game: game.clone().into(),
            });
        }

        let applied = {
            let state = game
                .doc
                .chess_state_mut()
                .ok_or_else(|| chess_payload_missing(game.id))?;
            state.apply_move(&input.candidate(), color, now, self.config.move_history_cap)?
        };

        let winner = match applied.terminal {
            Some(ChessResult::Checkmate) => game.name_of_seat(applied.mover).map(str::to_owned),
            _ => None,
        };

        let mut transferred = None;
        if let Some(terminal) = applied.terminal {
            let outcome = match (&winner, terminal.is_draw()) {
                (Some(name), _) => Outcome::Winner(name.clone()),
                _ => Outcome::Draw,
            };
            transferred = Some(self.conclude(game, outcome, now).await?);
        } else {
            // The self-loop is still a machine-checked transition.
            ensure_transition(game.status, GameStatus::Active)?;
            self.store.update_game(game.clone()).await?;
        }

        self.emit_chess_state(game);
        if let Some(transferred) = transferred {
            self.emit_finish_events(game, transferred);
        }

        Ok(MoveOutcome {
            resolved_winner: game.doc.resolved_winner.clone(),
            waiting_for: Vec::new(),
            timeout: false,
            played: Some(PlayedMove {
                from: input.from,
                to: input.to,
                san: applied.san,
            }),
            game: game.clone().into(),
        })
    }

    async fn score_move(
        &self,
        game: &mut Game,
        actor: &Actor,
        participant: Option<String>,
        input: ScoreSubmissionInput,
    ) -> Result<MoveOutcome, GameError> {
        input.validate()?;
        if game.game_type.is_chess() {
            return Err(GameError::Validation(
                "chess games take chess moves, not score submissions".into(),
            ));
        }
        if game.status != GameStatus::Active {
            return Err(GameError::conflict(
                "not_active",
                "score submissions require an active game",
            ));
        }
        let Some(participant) = participant else {
            return Err(GameError::Authorization(
                "only a seated player may submit a score".into(),
            ));
        };

        let now = OffsetDateTime::now_utc();
        let participants: Vec<String> = game
            .participants()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let tie_break = game.game_type.tie_break();

        let (resolved, waiting_for) = {
            let board = game
                .doc
                .score_board_mut()
                .ok_or_else(|| score_payload_missing(game.id))?;
            board.results.insert(
                participant_key(&participant),
                ScoreSubmission {
                    username: actor.username.clone(),
                    score: input.score,
                    detail: input.detail,
                    submitted_at: now,
                },
            );

            let names: Vec<&str> = participants.iter().map(String::as_str).collect();
            (
                board.resolved_winner(&names, tie_break),
                board.waiting_for(&names),
            )
        };

        // The hint is surfaced without a status change; only an explicit
        // finish call moves the game to `finished`.
        if let Some(winner) = &resolved {
            game.doc.resolved_winner = Some(winner.clone());
        }
        self.store.update_game(game.clone()).await?;

        self.notifier.notify_game(
            game.id,
            GameEvent::ScoreSubmission {
                resolved_winner: resolved.clone(),
                waiting_for: waiting_for.clone(),
            },
        );

        Ok(MoveOutcome {
            resolved_winner: resolved,
            waiting_for,
            timeout: false,
            played: None,
            game: game.clone().into(),
        })
    }

    async fn live_move(
        &self,
        game: &mut Game,
        participant: Option<String>,
        input: LiveSubmissionInput,
    ) -> Result<MoveOutcome, GameError> {
        if game.game_type.is_chess() {
            return Err(GameError::Validation(
                "chess games take chess moves, not live submissions".into(),
            ));
        }
        if game.status != GameStatus::Active {
            return Err(GameError::conflict(
                "not_active",
                "live submissions require an active game",
            ));
        }
        let Some(participant) = participant else {
            return Err(GameError::Authorization(
                "only a seated player may report live progress".into(),
            ));
        };
        if input.mode.is_some_and(|mode| mode != game.game_type) {
            return Err(GameError::Validation(
                "live submission game type does not match this game".into(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let participants: Vec<String> = game
            .participants()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let tie_break = game.game_type.tie_break();
        let game_type = game.game_type;

        let (resolved, waiting_for) = {
            let board = game
                .doc
                .score_board_mut()
                .ok_or_else(|| score_payload_missing(game.id))?;
            board.live.mode.get_or_insert(game_type);

            let key = participant_key(&participant);
            let entry = board.live.submissions.entry(key).or_insert(LiveProgress {
                score: None,
                done: false,
                updated_at: now,
            });
            if input.score.is_some() {
                entry.score = input.score;
            }
            entry.done = entry.done || input.done;
            entry.updated_at = now;

            let names: Vec<&str> = participants.iter().map(String::as_str).collect();
            (
                board.live_winner(&names, tie_break),
                board.live_waiting_for(&names),
            )
        };

        if let Some(winner) = &resolved {
            game.doc.resolved_winner = Some(winner.clone());
        }
        self.store.update_game(game.clone()).await?;

        self.notifier.notify_game(
            game.id,
            GameEvent::LiveSubmission {
                resolved_winner: resolved.clone(),
                waiting_for: waiting_for.clone(),
            },
        );

        Ok(MoveOutcome {
            resolved_winner: resolved,
            waiting_for,
            timeout: false,
            played: None,
            game: game.clone().into(),
        })
    }

    async fn merge_move(
        &self,
        game: &mut Game,
        map: serde_json::Map<String, serde_json::Value>,
    ) -> Result<MoveOutcome, GameError> {
        for key in map.keys() {
            if RESERVED_MERGE_KEYS.contains(&key.as_str()) {
                return Err(GameError::Validation(format!(
                    "state merge may not touch the reserved key `{key}`"
                )));
            }
        }

        game.doc.extras.extend(map);
        self.store.update_game(game.clone()).await?;
        self.notifier.notify_game(game.id, GameEvent::StateMerged);

        Ok(MoveOutcome {
            resolved_winner: game.doc.resolved_winner.clone(),
            waiting_for: Vec::new(),
            timeout: false,
            played: None,
            game: game.clone().into(),
        })
    }

    /// Drive a game into `finished` with exactly one settlement, and write
    /// the receipt atomically with the status transition.
    async fn conclude(
        &self,
        game: &mut Game,
        outcome: Outcome,
        now: OffsetDateTime,
    ) -> Result<u32, GameError> {
        ensure_transition(game.status, GameStatus::Finished)?;

        let receipt = if game.doc.settlement.applied {
            game.doc.settlement.clone()
        } else {
            self.settlement.settle(game, &outcome, now).await?
        };
        let transferred = receipt.stake_transferred;

        match outcome {
            Outcome::Winner(name) => {
                game.winner = Some(name.clone());
                game.doc.resolved_winner = Some(name);
                game.doc.draw = false;
            }
            Outcome::Draw => {
                game.winner = None;
                game.doc.resolved_winner = None;
                game.doc.draw = true;
            }
        }
        game.doc.settlement = receipt;
        game.status = GameStatus::Finished;
        self.store.update_game(game.clone()).await?;

        Ok(transferred)
    }

    fn emit_chess_state(&self, game: &Game) {
        if let Some(state) = game.doc.chess_state() {
            self.notifier.notify_game(
                game.id,
                GameEvent::ChessState {
                    status: game.status,
                    winner: game.winner.clone(),
                    chess: Box::new(state.clone()),
                },
            );
        }
    }

    fn emit_finish_events(&self, game: &Game, stake_transferred: u32) {
        self.notifier.notify_game(
            game.id,
            GameEvent::GameFinished {
                winner: game.winner.clone(),
                draw: game.doc.draw,
                stake_transferred,
            },
        );
    }

    async fn load(&self, game_id: Uuid) -> Result<Game, GameError> {
        self.store
            .fetch_game(game_id)
            .await?
            .ok_or_else(|| GameError::NotFound(format!("game `{game_id}` not found")))
    }
}

fn chess_payload_missing(game_id: Uuid) -> GameError {
    GameError::Internal(StorageError::corrupted(format!(
        "chess game `{game_id}` carries no chess payload"
    )))
}

fn score_payload_missing(game_id: Uuid) -> GameError {
    GameError::Internal(StorageError::corrupted(format!(
        "score game `{game_id}` carries no score payload"
    )))
}

fn finish_outcome(game: Game, already_finished: bool) -> FinishOutcome {
    FinishOutcome {
        winner: game.winner.clone(),
        draw: game.doc.draw,
        already_finished,
        stake_transferred: game.doc.settlement.stake_transferred,
        game: game.into(),
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::dao::game_store::memory::MemoryStore;
    use crate::dto::game::CheckIn;
    use crate::services::realtime::BroadcastHub;
    use crate::state::chess::DrawAction;
    use crate::state::game::{GameType, UserAccount};

    struct Fixture {
        service: GameSessions,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.seed_user(UserAccount {
            username: "Alice".into(),
            points: 500,
            wins: 0,
            games_played: 0,
        });
        store.seed_user(UserAccount {
            username: "Bob".into(),
            points: 200,
            wins: 0,
            games_played: 0,
        });
        let service = GameSessions::new(
            store.clone(),
            Arc::new(BroadcastHub::new(64)),
            EngineConfig::default(),
        );
        Fixture { service, store }
    }

    fn actor(name: &str, points: u32) -> Actor {
        Actor {
            username: name.into(),
            is_admin: false,
            points,
            check_in: Some(CheckIn {
                cafe_id: "cafe-1".into(),
                table: "TBL04".into(),
            }),
        }
    }

    fn admin() -> Actor {
        Actor {
            username: "Root".into(),
            is_admin: true,
            points: 0,
            check_in: None,
        }
    }

    fn create_request(game_type: GameType, points: u32) -> CreateGameRequest {
        CreateGameRequest {
            game_type,
            points,
            table: None,
            clock: None,
        }
    }

    fn chess_move(from: &str, to: &str) -> MovePayload {
        MovePayload::Chess(ChessMoveInput {
            from: from.into(),
            to: to.into(),
            promotion: None,
            seat: None,
        })
    }

    fn score(points: u32) -> MovePayload {
        MovePayload::Score(ScoreSubmissionInput {
            score: points,
            detail: None,
        })
    }

    fn assert_conflict(err: GameError, expected: &str) {
        match err {
            GameError::Conflict { code, .. } => assert_eq!(code, expected),
            other => panic!("expected conflict `{expected}`, got {other:?}"),
        }
    }

    async fn chess_table(fixture: &Fixture, stake: u32) -> Uuid {
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Chess, stake))
            .await
            .unwrap();
        fixture.service.join_game(&bob, created.id).await.unwrap();
        created.id
    }

    #[tokio::test]
    async fn create_rejects_a_second_open_game_with_context() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let first = fixture
            .service
            .create_game(&alice, create_request(GameType::Reflex, 50))
            .await
            .unwrap();

        let err = fixture
            .service
            .create_game(&alice, create_request(GameType::Trivia, 10))
            .await
            .unwrap_err();
        match err {
            GameError::Conflict { code, context, .. } => {
                assert_eq!(code, "duplicate_game");
                assert_eq!(context, ConflictContext::ExistingGame { id: first.id });
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_enforces_balance_ceiling_and_check_in() {
        let fixture = fixture();

        let err = fixture
            .service
            .create_game(&actor("Alice", 500), create_request(GameType::Reflex, 6000))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));

        let err = fixture
            .service
            .create_game(&actor("Bob", 200), create_request(GameType::Reflex, 300))
            .await
            .unwrap_err();
        assert_conflict(err, "stake_exceeds_balance");

        let mut no_check_in = actor("Alice", 500);
        no_check_in.check_in = None;
        let err = fixture
            .service
            .create_game(&no_check_in, create_request(GameType::Reflex, 50))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Authorization(_)));

        // Admins are exempt from both check-in and balance.
        fixture
            .service
            .create_game(&admin(), create_request(GameType::Reflex, 4000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn chess_scenario_enforces_turn_order() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);

        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Chess, 90))
            .await
            .unwrap();
        // The clock does not tick until the guest joins.
        assert!(created.state.chess_state().unwrap().clock.last_tick_at.is_none());

        let joined = fixture.service.join_game(&bob, created.id).await.unwrap();
        assert!(!joined.rejoined);
        assert!(
            joined
                .game
                .state
                .chess_state()
                .unwrap()
                .clock
                .is_running()
        );

        let outcome = fixture
            .service
            .make_move(&alice, created.id, chess_move("e2", "e4"))
            .await
            .unwrap();
        assert!(
            outcome
                .game
                .state
                .chess_state()
                .unwrap()
                .fen
                .contains(" b ")
        );
        assert_eq!(outcome.played.as_ref().unwrap().san, "e4");

        // White tries to move again out of turn.
        let err = fixture
            .service
            .make_move(&alice, created.id, chess_move("d2", "d4"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_your_turn");

        let outcome = fixture
            .service
            .make_move(&bob, created.id, chess_move("e7", "e5"))
            .await
            .unwrap();
        assert!(
            outcome
                .game
                .state
                .chess_state()
                .unwrap()
                .fen
                .contains(" w ")
        );
    }

    #[tokio::test]
    async fn join_guards_self_full_and_balance() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Chess, 90))
            .await
            .unwrap();

        let err = fixture.service.join_game(&alice, created.id).await.unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));

        let broke = actor("Carol", 10);
        let err = fixture.service.join_game(&broke, created.id).await.unwrap_err();
        assert_conflict(err, "stake_exceeds_balance");

        fixture.service.join_game(&bob, created.id).await.unwrap();

        // The seated guest reconnects idempotently; anyone else bounces.
        let rejoin = fixture.service.join_game(&bob, created.id).await.unwrap();
        assert!(rejoin.rejoined);
        let err = fixture
            .service
            .join_game(&actor("Carol", 300), created.id)
            .await
            .unwrap_err();
        assert_conflict(err, "game_full");
    }

    #[tokio::test]
    async fn score_flow_resolves_hint_then_finish_settles() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Reflex, 90))
            .await
            .unwrap();
        fixture.service.join_game(&bob, created.id).await.unwrap();

        let outcome = fixture
            .service
            .make_move(&alice, created.id, score(10))
            .await
            .unwrap();
        assert_eq!(outcome.resolved_winner, None);
        assert_eq!(outcome.waiting_for, vec!["Bob".to_owned()]);

        let outcome = fixture
            .service
            .make_move(&bob, created.id, score(5))
            .await
            .unwrap();
        // Hint surfaces without a status change.
        assert_eq!(outcome.resolved_winner.as_deref(), Some("Alice"));
        assert_eq!(outcome.game.status, GameStatus::Active);

        let finished = fixture
            .service
            .finish_game(&alice, created.id, None)
            .await
            .unwrap();
        assert_eq!(finished.winner.as_deref(), Some("Alice"));
        assert!(!finished.already_finished);
        assert_eq!(finished.stake_transferred, 90);

        let alice_account = fixture.store.fetch_user("Alice".into()).await.unwrap().unwrap();
        let bob_account = fixture.store.fetch_user("Bob".into()).await.unwrap().unwrap();
        assert_eq!(
            (alice_account.points, alice_account.wins, alice_account.games_played),
            (590, 1, 1)
        );
        assert_eq!(
            (bob_account.points, bob_account.wins, bob_account.games_played),
            (110, 0, 1)
        );
    }

    #[tokio::test]
    async fn finish_twice_is_idempotent_and_settles_once() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Trivia, 50))
            .await
            .unwrap();
        fixture.service.join_game(&bob, created.id).await.unwrap();
        fixture
            .service
            .make_move(&alice, created.id, score(8))
            .await
            .unwrap();
        fixture
            .service
            .make_move(&bob, created.id, score(3))
            .await
            .unwrap();

        let first = fixture
            .service
            .finish_game(&alice, created.id, None)
            .await
            .unwrap();
        let second = fixture
            .service
            .finish_game(&bob, created.id, None)
            .await
            .unwrap();

        assert!(!first.already_finished);
        assert!(second.already_finished);
        assert_eq!(second.winner, first.winner);
        assert_eq!(second.stake_transferred, 50);
        // The receipt records exactly one settlement.
        assert_eq!(
            second.game.state.settlement.settled_at,
            first.game.state.settlement.settled_at
        );

        let alice_account = fixture.store.fetch_user("Alice".into()).await.unwrap().unwrap();
        assert_eq!(alice_account.points, 550);
        assert_eq!(alice_account.games_played, 1);
    }

    #[tokio::test]
    async fn finish_against_a_different_stored_outcome_conflicts() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let id = chess_table(&fixture, 40).await;

        // Conclude as a draw agreement first.
        fixture
            .service
            .draw_offer(&alice, id, DrawAction::Offer)
            .await
            .unwrap();
        fixture
            .service
            .draw_offer(&bob, id, DrawAction::Accept)
            .await
            .unwrap();

        let err = fixture
            .service
            .finish_game(&bob, id, Some("Alice".into()))
            .await
            .unwrap_err();
        match err {
            GameError::Conflict { code, context, .. } => {
                assert_eq!(code, "finished_outcome_mismatch");
                assert_eq!(
                    context,
                    ConflictContext::WinnerMismatch {
                        requested: Some("Alice".into()),
                        stored: None,
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_admin_cannot_declare_themselves_winner() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Arena, 30))
            .await
            .unwrap();
        fixture.service.join_game(&bob, created.id).await.unwrap();

        let err = fixture
            .service
            .finish_game(&bob, created.id, Some("Bob".into()))
            .await
            .unwrap_err();
        assert_conflict(err, "self_declared_winner");

        // Naming the opponent is the allowed direction.
        let finished = fixture
            .service
            .finish_game(&bob, created.id, Some("Alice".into()))
            .await
            .unwrap();
        assert_eq!(finished.winner.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn checkmate_finishes_without_an_explicit_finish_call() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let id = chess_table(&fixture, 90).await;

        // Scholar's mate: white (the host) delivers Qxf7#.
        for (who, from, to) in [
            (&alice, "e2", "e4"),
            (&bob, "e7", "e5"),
            (&alice, "f1", "c4"),
            (&bob, "b8", "c6"),
            (&alice, "d1", "h5"),
            (&bob, "g8", "f6"),
        ] {
            fixture
                .service
                .make_move(who, id, chess_move(from, to))
                .await
                .unwrap();
        }
        let outcome = fixture
            .service
            .make_move(&alice, id, chess_move("h5", "f7"))
            .await
            .unwrap();

        assert_eq!(outcome.game.status, GameStatus::Finished);
        assert_eq!(outcome.game.winner.as_deref(), Some("Alice"));
        let chess = outcome.game.state.chess_state().unwrap();
        assert_eq!(chess.result, Some(ChessResult::Checkmate));
        assert!(outcome.game.state.settlement.applied);
        assert_eq!(outcome.game.state.settlement.stake_transferred, 90);

        let bob_account = fixture.store.fetch_user("Bob".into()).await.unwrap().unwrap();
        assert_eq!(bob_account.points, 110);
    }

    #[tokio::test]
    async fn draw_agreement_settles_once_with_no_transfer() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let id = chess_table(&fixture, 90).await;

        fixture
            .service
            .draw_offer(&alice, id, DrawAction::Offer)
            .await
            .unwrap();
        let outcome = fixture
            .service
            .draw_offer(&bob, id, DrawAction::Accept)
            .await
            .unwrap();

        assert_eq!(outcome.decision, DrawDecision::Accepted);
        assert_eq!(outcome.game.status, GameStatus::Finished);
        assert_eq!(outcome.game.winner, None);
        assert!(outcome.game.state.draw);
        assert!(outcome.game.state.settlement.applied);
        assert_eq!(outcome.game.state.settlement.stake_transferred, 0);

        for (name, expected_points) in [("Alice", 500u32), ("Bob", 200u32)] {
            let account = fixture.store.fetch_user(name.into()).await.unwrap().unwrap();
            assert_eq!(account.points, expected_points);
            assert_eq!(account.games_played, 1);
            assert_eq!(account.wins, 0);
        }
    }

    #[tokio::test]
    async fn expired_clock_settles_on_the_next_read() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let id = chess_table(&fixture, 60).await;

        // Rewind the tick so white (to move) is far past their base time.
        let mut stored = fixture.store.fetch_game(id).await.unwrap().unwrap();
        if let Some(chess) = stored.doc.chess_state_mut() {
            chess.clock.last_tick_at = Some(OffsetDateTime::now_utc() - Duration::minutes(10));
        }
        fixture.store.update_game(stored).await.unwrap();

        let summary = fixture.service.get_game_state(&alice, id).await.unwrap();
        assert_eq!(summary.status, GameStatus::Finished);
        assert_eq!(summary.winner.as_deref(), Some("Bob"));
        let chess = summary.state.chess_state().unwrap();
        assert_eq!(chess.result, Some(ChessResult::Timeout));
        assert_eq!(chess.timed_out, Some(ChessColor::White));
        assert_eq!(chess.clock.white_ms, 0);
        assert!(!chess.clock.is_running());
        assert!(summary.state.settlement.applied);
        let settled_at = summary.state.settlement.settled_at;

        // A second read is a plain read: no double settlement.
        let again = fixture.service.get_game_state(&alice, id).await.unwrap();
        assert_eq!(again.state.settlement.settled_at, settled_at);
        let bob_account = fixture.store.fetch_user("Bob".into()).await.unwrap().unwrap();
        assert_eq!(bob_account.points, 260);
        assert_eq!(bob_account.wins, 1);
        assert_eq!(bob_account.games_played, 1);
    }

    #[tokio::test]
    async fn resignation_declares_the_opponent_winner() {
        let fixture = fixture();
        let bob = actor("Bob", 200);
        let id = chess_table(&fixture, 40).await;

        let outcome = fixture.service.resign_game(&bob, id).await.unwrap();
        assert_eq!(outcome.winner.as_deref(), Some("Alice"));
        assert_eq!(outcome.stake_transferred, 40);
        let chess = outcome.game.state.chess_state().unwrap();
        assert_eq!(chess.result, Some(ChessResult::Resignation));
    }

    #[tokio::test]
    async fn reads_and_deletes_are_participant_scoped() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let stranger = actor("Mallory", 100);
        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Reflex, 10))
            .await
            .unwrap();

        let err = fixture
            .service
            .get_game_state(&stranger, created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Authorization(_)));
        let err = fixture
            .service
            .delete_game(&stranger, created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Authorization(_)));

        fixture.service.delete_game(&alice, created.id).await.unwrap();
        let err = fixture
            .service
            .get_game_state(&alice, created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NotFound(_)));
    }

    #[tokio::test]
    async fn merge_rejects_reserved_keys_and_extends_extras() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Trivia, 10))
            .await
            .unwrap();

        let mut bad = serde_json::Map::new();
        bad.insert("settlement".into(), serde_json::json!({"applied": true}));
        let err = fixture
            .service
            .make_move(&alice, created.id, MovePayload::Merge(bad))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));

        let mut ok = serde_json::Map::new();
        ok.insert("round".into(), serde_json::json!(2));
        let outcome = fixture
            .service
            .make_move(&alice, created.id, MovePayload::Merge(ok))
            .await
            .unwrap();
        assert_eq!(outcome.game.state.extras["round"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn lobby_is_scoped_by_check_in_table() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        fixture
            .service
            .create_game(&alice, create_request(GameType::Reflex, 10))
            .await
            .unwrap();

        // Same table sees it; another table does not; no check-in sees nothing.
        let same_table = fixture
            .service
            .list_waiting_games(&actor("Carol", 100), None)
            .await
            .unwrap();
        assert_eq!(same_table.len(), 1);

        let mut elsewhere = actor("Dave", 100);
        elsewhere.check_in = Some(CheckIn {
            cafe_id: "cafe-1".into(),
            table: "TBL09".into(),
        });
        assert!(
            fixture
                .service
                .list_waiting_games(&elsewhere, None)
                .await
                .unwrap()
                .is_empty()
        );

        let mut unchecked = actor("Eve", 100);
        unchecked.check_in = None;
        assert!(
            fixture
                .service
                .list_waiting_games(&unchecked, None)
                .await
                .unwrap()
                .is_empty()
        );

        // Admins may scope to any table.
        let admin_view = fixture
            .service
            .list_waiting_games(&admin(), Some("tbl04".into()))
            .await
            .unwrap();
        assert_eq!(admin_view.len(), 1);
    }

    #[tokio::test]
    async fn latest_active_game_lookup_follows_a_join() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let created = fixture
            .service
            .create_game(&alice, create_request(GameType::Rhythm, 20))
            .await
            .unwrap();

        assert!(
            fixture
                .service
                .latest_active_game_for_user("bob")
                .await
                .unwrap()
                .is_none()
        );
        fixture.service.join_game(&bob, created.id).await.unwrap();

        let found = fixture
            .service
            .latest_active_game_for_user("BOB")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.status, GameStatus::Active);
    }

    #[tokio::test]
    async fn moves_are_rejected_once_finished() {
        let fixture = fixture();
        let alice = actor("Alice", 500);
        let bob = actor("Bob", 200);
        let id = chess_table(&fixture, 40).await;
        fixture.service.resign_game(&bob, id).await.unwrap();

        let err = fixture
            .service
            .make_move(&alice, id, chess_move("e2", "e4"))
            .await
            .unwrap_err();
        assert_conflict(err, "already_finished");
    }
}
