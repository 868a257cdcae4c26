use mongodb::bson::{Binary, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::game::{Game, GameDoc, GameType, UserAccount, participant_key};
use crate::state::status::GameStatus;

/// Stored shape of a game record.
///
/// `host_key`/`guest_key` are lowercased copies of the display names so the
/// per-user queries can filter without collation tricks. `status` is kept as
/// a free-form string and re-validated through the state machine's
/// normalization on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    host_name: String,
    host_key: String,
    guest_name: Option<String>,
    guest_key: Option<String>,
    game_type: GameType,
    points: u32,
    table: String,
    status: String,
    winner: Option<String>,
    state: GameDoc,
    created_at: DateTime,
}

/// Stored shape of the account fields settlement owns, keyed by the
/// canonical username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    key: String,
    username: String,
    points: i64,
    wins: i64,
    games_played: i64,
}

impl From<Game> for MongoGameDocument {
    fn from(value: Game) -> Self {
        Self {
            id: value.id,
            host_key: participant_key(&value.host_name),
            host_name: value.host_name,
            guest_key: value.guest_name.as_deref().map(participant_key),
            guest_name: value.guest_name,
            game_type: value.game_type,
            points: value.points,
            table: value.table,
            status: value.status.as_str().to_owned(),
            winner: value.winner,
            state: value.doc,
            created_at: to_bson_datetime(value.created_at),
        }
    }
}

impl TryFrom<MongoGameDocument> for Game {
    type Error = String;

    fn try_from(value: MongoGameDocument) -> Result<Self, Self::Error> {
        let status = GameStatus::parse_normalized(&value.status).ok_or_else(|| {
            format!(
                "game `{}` carries unknown status `{}`",
                value.id, value.status
            )
        })?;

        Ok(Self {
            id: value.id,
            host_name: value.host_name,
            guest_name: value.guest_name,
            game_type: value.game_type,
            points: value.points,
            table: value.table,
            status,
            winner: value.winner,
            doc: value.state,
            created_at: from_bson_datetime(value.created_at),
        })
    }
}

impl From<MongoUserDocument> for UserAccount {
    fn from(value: MongoUserDocument) -> Self {
        Self {
            username: value.username,
            points: clamp_counter(value.points),
            wins: clamp_counter(value.wins),
            games_played: clamp_counter(value.games_played),
        }
    }
}

fn clamp_counter(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn to_bson_datetime(value: OffsetDateTime) -> DateTime {
    DateTime::from_millis((value.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn from_bson_datetime(value: DateTime) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value.timestamp_millis()) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}
