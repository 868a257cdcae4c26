//! Per-side countdown clock for chess games.
//!
//! The clock never ticks on its own: elapsed time is computed lazily from the
//! stored tick timestamp whenever a caller passes in `now`. A game whose
//! clock has run out therefore only "expires" when the next read or move
//! touches it.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::ChessColor;

/// Lower clamp for the base time, in seconds.
pub const MIN_BASE_SECS: u64 = 60;
/// Upper clamp for the base time, in seconds.
pub const MAX_BASE_SECS: u64 = 1800;
/// Upper clamp for the per-move increment, in seconds.
pub const MAX_INCREMENT_SECS: u64 = 30;
/// A side's remaining time never grows past this, increments included.
pub const MAX_REMAINING_MS: u64 = 3_600_000;

/// Requested clock configuration, clamped into the supported ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Base thinking time per side, in seconds.
    pub base_secs: u64,
    /// Increment added after each completed move, in seconds.
    pub increment_secs: u64,
}

impl ClockConfig {
    /// Clamp a raw request into `[60, 1800]` base and `[0, 30]` increment.
    pub fn clamped(base_secs: u64, increment_secs: u64) -> Self {
        Self {
            base_secs: base_secs.clamp(MIN_BASE_SECS, MAX_BASE_SECS),
            increment_secs: increment_secs.min(MAX_INCREMENT_SECS),
        }
    }

    /// Display label in the usual `minutes+increment` form, e.g. `3+2`.
    pub fn label(&self) -> String {
        format!("{}+{}", self.base_secs / 60, self.increment_secs)
    }
}

impl Default for ClockConfig {
    /// 3+2 blitz, the venue default.
    fn default() -> Self {
        Self {
            base_secs: 180,
            increment_secs: 2,
        }
    }
}

/// Stored clock state for one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChessClock {
    /// Configured base time in milliseconds.
    pub base_ms: u64,
    /// Configured increment in milliseconds.
    pub increment_ms: u64,
    /// White's remaining time in milliseconds.
    pub white_ms: u64,
    /// Black's remaining time in milliseconds.
    pub black_ms: u64,
    /// When the side to move started being on the clock. `None` while the
    /// game is waiting for a guest and once the clock is frozen.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_tick_at: Option<OffsetDateTime>,
    /// Human-readable time control label, e.g. `3+2`.
    pub label: String,
}

/// Outcome of charging elapsed wall time against the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockCharge {
    /// Milliseconds elapsed since the last tick.
    pub elapsed_ms: u64,
    /// Milliseconds the side to move has left after the charge.
    pub remaining_ms: u64,
}

impl ChessClock {
    /// Build an inactive clock from a (clamped) configuration.
    pub fn from_config(config: ClockConfig) -> Self {
        let base_ms = config.base_secs * 1000;
        Self {
            base_ms,
            increment_ms: config.increment_secs * 1000,
            white_ms: base_ms,
            black_ms: base_ms,
            last_tick_at: None,
            label: config.label(),
        }
    }

    /// Whether the clock has started ticking and has not been frozen.
    pub fn is_running(&self) -> bool {
        self.last_tick_at.is_some()
    }

    /// Start the clock. Called exactly once, when the guest joins.
    pub fn activate(&mut self, now: OffsetDateTime) {
        self.last_tick_at = Some(now);
    }

    /// Remaining time for one side.
    pub fn remaining_for(&self, color: ChessColor) -> u64 {
        match color {
            ChessColor::White => self.white_ms,
            ChessColor::Black => self.black_ms,
        }
    }

    fn remaining_mut(&mut self, color: ChessColor) -> &mut u64 {
        match color {
            ChessColor::White => &mut self.white_ms,
            ChessColor::Black => &mut self.black_ms,
        }
    }

    /// Compute how much time `color` has burnt since the last tick without
    /// mutating the clock. An inactive clock charges nothing.
    pub fn charge(&self, color: ChessColor, now: OffsetDateTime) -> ClockCharge {
        let stored = self.remaining_for(color);
        let elapsed_ms = match self.last_tick_at {
            Some(last) if now > last => {
                let millis = (now - last).whole_milliseconds();
                u64::try_from(millis).unwrap_or(u64::MAX)
            }
            _ => 0,
        };

        ClockCharge {
            elapsed_ms,
            remaining_ms: stored.saturating_sub(elapsed_ms),
        }
    }

    /// Commit a completed move: write back the mover's remaining time plus
    /// the increment (capped) and restart the tick for the opponent, or
    /// freeze the clock when the game just ended.
    pub fn commit_move(
        &mut self,
        mover: ChessColor,
        remaining_ms: u64,
        now: OffsetDateTime,
        game_over: bool,
    ) -> u64 {
        let credited = (remaining_ms + self.increment_ms).min(MAX_REMAINING_MS);
        *self.remaining_mut(mover) = credited;
        self.last_tick_at = if game_over { None } else { Some(now) };
        credited
    }

    /// Zero out the flagged side and stop the clock.
    pub fn freeze_expired(&mut self, flagged: ChessColor) {
        *self.remaining_mut(flagged) = 0;
        self.last_tick_at = None;
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn config_is_clamped_into_supported_ranges() {
        let config = ClockConfig::clamped(10, 90);
        assert_eq!(config.base_secs, 60);
        assert_eq!(config.increment_secs, 30);

        let config = ClockConfig::clamped(7200, 0);
        assert_eq!(config.base_secs, 1800);
        assert_eq!(config.increment_secs, 0);
    }

    #[test]
    fn label_reads_minutes_plus_increment() {
        assert_eq!(ClockConfig::default().label(), "3+2");
        assert_eq!(ClockConfig::clamped(600, 5).label(), "10+5");
    }

    #[test]
    fn fresh_clock_is_inactive_and_charges_nothing() {
        let clock = ChessClock::from_config(ClockConfig::default());
        assert!(!clock.is_running());

        let charge = clock.charge(ChessColor::White, datetime!(2025-06-01 12:00 UTC));
        assert_eq!(charge.elapsed_ms, 0);
        assert_eq!(charge.remaining_ms, 180_000);
    }

    #[test]
    fn charge_subtracts_elapsed_wall_time() {
        let mut clock = ChessClock::from_config(ClockConfig::default());
        clock.activate(datetime!(2025-06-01 12:00 UTC));

        let charge = clock.charge(ChessColor::White, datetime!(2025-06-01 12:00:30 UTC));
        assert_eq!(charge.elapsed_ms, 30_000);
        assert_eq!(charge.remaining_ms, 150_000);
    }

    #[test]
    fn charge_bottoms_out_at_zero() {
        let mut clock = ChessClock::from_config(ClockConfig::default());
        clock.activate(datetime!(2025-06-01 12:00 UTC));

        let charge = clock.charge(ChessColor::White, datetime!(2025-06-01 12:10 UTC));
        assert_eq!(charge.remaining_ms, 0);
    }

    #[test]
    fn commit_move_credits_increment_and_restarts_tick() {
        let mut clock = ChessClock::from_config(ClockConfig::default());
        clock.activate(datetime!(2025-06-01 12:00 UTC));

        let now = datetime!(2025-06-01 12:00:10 UTC);
        let credited = clock.commit_move(ChessColor::White, 170_000, now, false);
        assert_eq!(credited, 172_000);
        assert_eq!(clock.white_ms, 172_000);
        assert_eq!(clock.last_tick_at, Some(now));
    }

    #[test]
    fn commit_move_freezes_clock_on_game_over() {
        let mut clock = ChessClock::from_config(ClockConfig::default());
        clock.activate(datetime!(2025-06-01 12:00 UTC));

        clock.commit_move(ChessColor::Black, 5_000, datetime!(2025-06-01 12:01 UTC), true);
        assert!(!clock.is_running());
    }

    #[test]
    fn increment_cannot_push_remaining_past_an_hour() {
        let mut clock = ChessClock::from_config(ClockConfig::clamped(1800, 30));
        clock.activate(datetime!(2025-06-01 12:00 UTC));

        let credited = clock.commit_move(
            ChessColor::White,
            MAX_REMAINING_MS - 1_000,
            datetime!(2025-06-01 12:00:01 UTC),
            false,
        );
        assert_eq!(credited, MAX_REMAINING_MS);
    }

    #[test]
    fn freeze_expired_zeros_the_flagged_side() {
        let mut clock = ChessClock::from_config(ClockConfig::default());
        clock.activate(datetime!(2025-06-01 12:00 UTC));

        clock.freeze_expired(ChessColor::Black);
        assert_eq!(clock.black_ms, 0);
        assert_eq!(clock.white_ms, 180_000);
        assert!(!clock.is_running());
    }
}
