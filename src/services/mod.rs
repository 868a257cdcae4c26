/// Core session orchestration: the eight operations and lobby queries.
pub mod game_service;
/// Per-entity mutual-exclusion registry.
pub mod locks;
/// Realtime notifier trait and broadcast hub.
pub mod realtime;
/// Exactly-once stake settlement.
pub mod settlement;
