//! Persistence abstraction for game records and the user accounts touched by
//! settlement.

pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::storage::StorageResult;
use crate::state::game::{Game, UserAccount};

/// Scope of a lobby listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyFilter {
    /// Restrict to one venue table, when set.
    pub table: Option<String>,
}

/// Counter deltas the settlement engine applies to a user account.
///
/// `points` may be negative; backends saturate the balance at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountDelta {
    /// Signed change to the points balance.
    pub points: i64,
    /// Wins to add.
    pub wins: u32,
    /// Games-played to add.
    pub games_played: u32,
}

/// Abstraction over the persistence layer for game sessions and the account
/// fields settlement owns.
///
/// Mutual exclusion is NOT the store's job: the session service serializes
/// all writers of a record through its per-entity lock registry, so these
/// methods only need to be individually atomic.
pub trait GameStore: Send + Sync {
    /// Persist a brand-new game record.
    fn insert_game(&self, game: Game) -> BoxFuture<'static, StorageResult<()>>;
    /// Load one game by id.
    fn fetch_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Game>>>;
    /// Replace the stored record for `game.id`.
    fn update_game(&self, game: Game) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a game; returns whether a record was deleted.
    fn delete_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    /// Waiting games visible to prospective joiners, newest first.
    fn list_waiting(&self, filter: LobbyFilter) -> BoxFuture<'static, StorageResult<Vec<Game>>>;
    /// Most recent `active` game a user is seated in.
    fn find_active_for_user(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<Game>>>;
    /// Most recent `waiting` or `active` game a user is seated in — the
    /// one-open-game-per-player guard behind `create_game`.
    fn find_open_for_user(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<Game>>>;
    /// Load a user account by (case-insensitive) username.
    fn fetch_user(&self, username: String)
    -> BoxFuture<'static, StorageResult<Option<UserAccount>>>;
    /// Apply settlement deltas to an account; returns whether it existed.
    fn apply_user_delta(
        &self,
        username: String,
        delta: AccountDelta,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
