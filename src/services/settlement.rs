//! Exactly-once economic settlement of a finished game.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;

use crate::dao::{
    game_store::{AccountDelta, GameStore},
    storage::StorageResult,
};
use crate::services::locks::LockRegistry;
use crate::state::game::{Game, SettlementReceipt, participant_key};

/// Resolved outcome handed to settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A decisive result for the named participant.
    Winner(String),
    /// No winner; stats only.
    Draw,
}

impl Outcome {
    /// Winner name for decisive outcomes.
    pub fn winner(&self) -> Option<&str> {
        match self {
            Self::Winner(name) => Some(name),
            Self::Draw => None,
        }
    }
}

/// Applies stake transfer and statistics updates for exactly one outcome per
/// game. The caller must hold the game's lock and must have checked the
/// receipt's `applied` flag; this engine serializes the two account records
/// underneath.
pub struct Settlement {
    store: Arc<dyn GameStore>,
    accounts: LockRegistry<String>,
}

impl Settlement {
    /// Engine over the given store.
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self {
            store,
            accounts: LockRegistry::new(),
        }
    }

    /// Compute and apply the transfer and win/games-played deltas.
    ///
    /// Decisive outcome: the winner gains and the loser loses
    /// `min(stake, loser_points)` — the loser can never go negative. Draw:
    /// both sides only record a played game. A participant whose account
    /// cannot be resolved is skipped, and no transfer happens.
    pub async fn settle(
        &self,
        game: &Game,
        outcome: &Outcome,
        now: OffsetDateTime,
    ) -> StorageResult<SettlementReceipt> {
        let participants = game.participants();

        // Both account locks, in sorted key order so two settlements touching
        // the same pair can never deadlock.
        let mut keys: Vec<String> = participants.iter().map(|name| participant_key(name)).collect();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.accounts.acquire(key).await);
        }

        let transferred = match outcome {
            Outcome::Draw => {
                for name in &participants {
                    self.bump_stats(name, 0).await?;
                }
                0
            }
            Outcome::Winner(winner_name) => {
                self.settle_decisive(game, winner_name, &participants).await?
            }
        };

        Ok(SettlementReceipt {
            applied: true,
            stake_transferred: transferred,
            settled_at: Some(now),
        })
    }

    async fn settle_decisive(
        &self,
        game: &Game,
        winner_name: &str,
        participants: &[&str],
    ) -> StorageResult<u32> {
        let winner_key = participant_key(winner_name);
        let loser_name = participants
            .iter()
            .find(|name| participant_key(name) != winner_key)
            .copied();

        let winner_account = self.store.fetch_user(winner_name.to_owned()).await?;
        let loser_account = match loser_name {
            Some(name) => self.store.fetch_user(name.to_owned()).await?,
            None => None,
        };

        // The transfer is capped at what the loser actually has, and only
        // happens when both accounts resolve.
        let transferable = match (&winner_account, &loser_account) {
            (Some(_), Some(loser)) => game.points.min(loser.points),
            _ => 0,
        };

        if winner_account.is_some() {
            self.store
                .apply_user_delta(
                    winner_name.to_owned(),
                    AccountDelta {
                        points: i64::from(transferable),
                        wins: 1,
                        games_played: 1,
                    },
                )
                .await?;
        } else {
            warn!(game_id = %game.id, winner = winner_name, "winner account missing; stats-only settlement");
        }

        if let Some(loser_name) = loser_name {
            if loser_account.is_some() {
                self.store
                    .apply_user_delta(
                        loser_name.to_owned(),
                        AccountDelta {
                            points: -i64::from(transferable),
                            wins: 0,
                            games_played: 1,
                        },
                    )
                    .await?;
            } else {
                warn!(game_id = %game.id, loser = loser_name, "loser account missing; no transfer");
            }
        }

        Ok(transferable)
    }

    async fn bump_stats(&self, name: &str, wins: u32) -> StorageResult<bool> {
        self.store
            .apply_user_delta(
                name.to_owned(),
                AccountDelta {
                    points: 0,
                    wins,
                    games_played: 1,
                },
            )
            .await
    }
}
