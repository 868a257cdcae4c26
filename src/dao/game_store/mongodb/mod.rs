//! MongoDB-backed game store, enabled by the `mongo-store` feature.

pub mod config;
mod connection;
mod error;
mod models;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoGameStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::Decode { message } => StorageError::corrupted(message),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
