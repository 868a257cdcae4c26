//! Pure domain state: lifecycle machine, game records, chess sub-engine.

pub mod chess;
pub mod game;
pub mod status;

pub use self::game::{Game, GameDoc, GamePayload, GameType, SettlementReceipt, UserAccount};
pub use self::status::{GameStatus, Transition, TransitionCode, TransitionError};
