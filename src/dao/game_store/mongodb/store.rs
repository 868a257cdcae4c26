//! `GameStore` implementation over MongoDB collections.

use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Client, Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoGameDocument, MongoUserDocument, doc_id},
};
use crate::dao::{
    game_store::{AccountDelta, GameStore, LobbyFilter},
    storage::{StorageError, StorageResult},
};
use crate::state::game::{Game, UserAccount, participant_key};

const GAME_COLLECTION_NAME: &str = "games";
const USER_COLLECTION_NAME: &str = "users";

/// Durable store over the `games` and `users` collections.
#[derive(Clone)]
pub struct MongoGameStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoGameStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Re-establish the connection after a dropout.
    pub async fn try_reconnect(&self) -> MongoResult<()> {
        self.inner.reconnect().await
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let games = self.games().await;

        // The lobby query filters waiting games by table.
        let lobby_index = IndexModel::builder()
            .keys(doc! {"status": 1, "table": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("game_lobby_idx".to_owned()))
                    .build(),
            )
            .build();
        games
            .create_index(lobby_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: GAME_COLLECTION_NAME,
                index: "status,table",
                source,
            })?;

        // Per-user open/active lookups filter on the lowercased name keys.
        for (name, keys) in [
            ("game_host_idx", doc! {"host_key": 1, "status": 1}),
            ("game_guest_idx", doc! {"guest_key": 1, "status": 1}),
        ] {
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(Some(name.to_owned())).build())
                .build();
            games
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: GAME_COLLECTION_NAME,
                    index: name,
                    source,
                })?;
        }

        Ok(())
    }

    async fn games(&self) -> Collection<MongoGameDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoGameDocument>(GAME_COLLECTION_NAME)
    }

    async fn users(&self) -> Collection<MongoUserDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoUserDocument>(USER_COLLECTION_NAME)
    }

    async fn save_game(&self, game: Game) -> StorageResult<()> {
        let id = game.id;
        let document: MongoGameDocument = game.into();
        self.games()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveGame { id, source })?;
        Ok(())
    }

    async fn find_game(&self, id: Uuid) -> StorageResult<Option<Game>> {
        let document = self
            .games()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadGame { id, source })?;

        document
            .map(|doc| Game::try_from(doc).map_err(StorageError::corrupted))
            .transpose()
    }

    async fn find_one_for_user(
        &self,
        username: String,
        statuses: &[&str],
    ) -> StorageResult<Option<Game>> {
        let key = participant_key(&username);
        let filter = doc! {
            "status": {"$in": statuses},
            "$or": [{"host_key": &key}, {"guest_key": &key}],
        };

        let document = self
            .games()
            .await
            .find_one(filter)
            .sort(doc! {"created_at": -1})
            .await
            .map_err(|source| MongoDaoError::FindForUser { username, source })?;

        document
            .map(|doc| Game::try_from(doc).map_err(StorageError::corrupted))
            .transpose()
    }
}

impl GameStore for MongoGameStore {
    fn insert_game(&self, game: Game) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_game(game).await })
    }

    fn fetch_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Game>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game(id).await })
    }

    fn update_game(&self, game: Game) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_game(game).await })
    }

    fn delete_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let result = store
                .games()
                .await
                .delete_one(doc_id(id))
                .await
                .map_err(|source| MongoDaoError::DeleteGame { id, source })?;
            Ok(result.deleted_count > 0)
        })
    }

    fn list_waiting(&self, filter: LobbyFilter) -> BoxFuture<'static, StorageResult<Vec<Game>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut query = doc! {"status": "waiting"};
            if let Some(table) = filter.table {
                query.insert("table", table);
            }

            let documents: Vec<MongoGameDocument> = store
                .games()
                .await
                .find(query)
                .sort(doc! {"created_at": -1})
                .await
                .map_err(|source| MongoDaoError::ListGames { source })?
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::ListGames { source })?;

            documents
                .into_iter()
                .map(|doc| Game::try_from(doc).map_err(StorageError::corrupted))
                .collect()
        })
    }

    fn find_active_for_user(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<Game>>> {
        let store = self.clone();
        Box::pin(async move { store.find_one_for_user(username, &["active"]).await })
    }

    fn find_open_for_user(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<Game>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one_for_user(username, &["waiting", "active"])
                .await
        })
    }

    fn fetch_user(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserAccount>>> {
        let store = self.clone();
        Box::pin(async move {
            let key = participant_key(&username);
            let document = store
                .users()
                .await
                .find_one(doc! {"_id": key})
                .await
                .map_err(|source| MongoDaoError::LoadUser { username, source })?;
            Ok(document.map(UserAccount::from))
        })
    }

    fn apply_user_delta(
        &self,
        username: String,
        delta: AccountDelta,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let key = participant_key(&username);
            // Pipeline update so the balance saturates at zero server-side.
            let pipeline = vec![doc! {"$set": {
                "points": {"$max": [0, {"$add": ["$points", delta.points]}]},
                "wins": {"$add": ["$wins", i64::from(delta.wins)]},
                "games_played": {"$add": ["$games_played", i64::from(delta.games_played)]},
            }}];

            let result = store
                .users()
                .await
                .update_one(doc! {"_id": key}, pipeline)
                .await
                .map_err(|source| MongoDaoError::UpdateUser { username, source })?;
            Ok(result.matched_count > 0)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }
}
