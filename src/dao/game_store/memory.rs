//! Transient in-memory backend: the non-persistent fallback mode.
//!
//! Records live in process-local concurrent maps. Every trait method mutates
//! its target record synchronously, with no await point between read and
//! write, so under the service's per-game lock the backend preserves the
//! same ordering guarantees as a durable store.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use super::{AccountDelta, GameStore, LobbyFilter};
use crate::dao::storage::StorageResult;
use crate::state::game::{Game, UserAccount, participant_key};
use crate::state::status::GameStatus;

/// In-memory store over dashmap tables. Cloning shares the tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryTables>,
}

#[derive(Default)]
struct MemoryTables {
    games: DashMap<Uuid, Game>,
    // Keyed by canonical (lowercased) username.
    users: DashMap<String, UserAccount>,
}

impl MemoryStore {
    /// Fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user account. Exposed for embedding applications
    /// and tests; the engine itself only touches accounts via settlement.
    pub fn seed_user(&self, account: UserAccount) {
        self.inner
            .users
            .insert(participant_key(&account.username), account);
    }

    fn seated(game: &Game, key: &str) -> bool {
        participant_key(&game.host_name) == key
            || game
                .guest_name
                .as_deref()
                .is_some_and(|guest| participant_key(guest) == key)
    }

    fn latest_by(&self, predicate: impl Fn(&Game) -> bool) -> Option<Game> {
        self.inner
            .games
            .iter()
            .filter(|entry| predicate(entry.value()))
            .max_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.value().clone())
    }
}

impl GameStore for MemoryStore {
    fn insert_game(&self, game: Game) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.games.insert(game.id, game);
            Ok(())
        })
    }

    fn fetch_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Game>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.games.get(&id).map(|entry| entry.clone())) })
    }

    fn update_game(&self, game: Game) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.games.insert(game.id, game);
            Ok(())
        })
    }

    fn delete_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.games.remove(&id).is_some()) })
    }

    fn list_waiting(&self, filter: LobbyFilter) -> BoxFuture<'static, StorageResult<Vec<Game>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut games: Vec<Game> = store
                .inner
                .games
                .iter()
                .filter(|entry| entry.value().status == GameStatus::Waiting)
                .filter(|entry| {
                    filter
                        .table
                        .as_deref()
                        .is_none_or(|table| entry.value().table == table)
                })
                .map(|entry| entry.value().clone())
                .collect();
            games.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(games)
        })
    }

    fn find_active_for_user(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<Game>>> {
        let store = self.clone();
        Box::pin(async move {
            let key = participant_key(&username);
            Ok(store
                .latest_by(|game| game.status == GameStatus::Active && Self::seated(game, &key)))
        })
    }

    fn find_open_for_user(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<Game>>> {
        let store = self.clone();
        Box::pin(async move {
            let key = participant_key(&username);
            Ok(store.latest_by(|game| {
                matches!(game.status, GameStatus::Waiting | GameStatus::Active)
                    && Self::seated(game, &key)
            }))
        })
    }

    fn fetch_user(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserAccount>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .users
                .get(&participant_key(&username))
                .map(|entry| entry.clone()))
        })
    }

    fn apply_user_delta(
        &self,
        username: String,
        delta: AccountDelta,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let Some(mut entry) = store.inner.users.get_mut(&participant_key(&username)) else {
                return Ok(false);
            };

            let balance = i64::from(entry.points) + delta.points;
            entry.points = u32::try_from(balance.max(0)).unwrap_or(u32::MAX);
            entry.wins += delta.wins;
            entry.games_played += delta.games_played;
            Ok(true)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::state::game::{GameDoc, GameType};

    fn waiting_game(host: &str, table: &str, at: time::OffsetDateTime) -> Game {
        Game::new_waiting(
            host.into(),
            GameType::Reflex,
            50,
            table.into(),
            GameDoc::score(),
            at,
        )
    }

    #[tokio::test]
    async fn lobby_listing_is_scoped_and_newest_first() {
        let store = MemoryStore::new();
        let older = waiting_game("Alice", "TBL01", datetime!(2025-06-01 11:00 UTC));
        let newer = waiting_game("Bob", "TBL01", datetime!(2025-06-01 12:00 UTC));
        let elsewhere = waiting_game("Carol", "TBL02", datetime!(2025-06-01 13:00 UTC));
        for game in [older.clone(), newer.clone(), elsewhere] {
            store.insert_game(game).await.unwrap();
        }

        let listed = store
            .list_waiting(LobbyFilter {
                table: Some("TBL01".into()),
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn open_game_guard_sees_waiting_and_active_seats() {
        let store = MemoryStore::new();
        let mut game = waiting_game("Alice", "TBL01", datetime!(2025-06-01 11:00 UTC));
        store.insert_game(game.clone()).await.unwrap();

        assert!(
            store
                .find_open_for_user("ALICE".into())
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .find_active_for_user("alice".into())
                .await
                .unwrap()
                .is_none()
        );

        game.status = GameStatus::Active;
        game.guest_name = Some("Bob".into());
        store.update_game(game).await.unwrap();

        assert!(
            store
                .find_active_for_user("bob".into())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn user_delta_saturates_at_zero() {
        let store = MemoryStore::new();
        store.seed_user(UserAccount {
            username: "Alice".into(),
            points: 30,
            wins: 0,
            games_played: 0,
        });

        let existed = store
            .apply_user_delta(
                "alice".into(),
                AccountDelta {
                    points: -50,
                    wins: 1,
                    games_played: 1,
                },
            )
            .await
            .unwrap();
        assert!(existed);

        let account = store.fetch_user("Alice".into()).await.unwrap().unwrap();
        assert_eq!(account.points, 0);
        assert_eq!(account.wins, 1);
        assert_eq!(account.games_played, 1);

        assert!(
            !store
                .apply_user_delta("ghost".into(), AccountDelta::default())
                .await
                .unwrap()
        );
    }
}
