//! # Tick Loop
//!
//! Paces game ticks in wall-clock time and measures how long each took.
//!
//! ```text
//!   loop {
//!       while tick_loop.should_tick() {
//!           let start = tick_loop.begin_tick();   // game time += 1
//!           cell.tick(tick_loop.game_time(), &mut endpoint);
//!           tick_loop.end_tick(start);
//!       }
//!       tick_loop.wait_for_next_tick();
//!   }
//! ```
//!
//! The cell itself never reads the clock. It is driven with an explicit
//! game time, so tests and the simulation binary can run ticks as fast as
//! they like.

use std::time::{Duration, Instant};

use meridian_shared::GameTime;

/// Fixed-rate tick pacer.
pub struct TickLoop {
    tick_duration: Duration,
    last_poll: Instant,
    /// Wall-clock time owed to ticks not yet run.
    accumulator: Duration,
    game_time: GameTime,
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug)]
pub struct TickStats {
    /// Shortest tick, microseconds.
    pub min_tick_us: u64,
    /// Longest tick, microseconds.
    pub max_tick_us: u64,
    /// Rolling average, microseconds.
    pub avg_tick_us: u64,
    /// Ticks that overran their budget.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn new(tick_duration: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: micros(tick_duration),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl TickLoop {
    /// Creates a loop running `tick_rate` ticks per second.
    ///
    /// # Panics
    ///
    /// Panics if `tick_rate` is zero.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        assert!(tick_rate > 0, "tick rate must be positive");
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate));
        Self {
            tick_duration,
            last_poll: Instant::now(),
            accumulator: Duration::ZERO,
            game_time: 0,
            stats: TickStats::new(tick_duration),
        }
    }

    /// Starts counting from `game_time` instead of zero.
    #[must_use]
    pub const fn starting_at(mut self, game_time: GameTime) -> Self {
        self.game_time = game_time;
        self
    }

    /// Returns true if a tick is due. Call until it returns false.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_poll);
        self.last_poll = now;
        self.accumulator >= self.tick_duration
    }

    /// Starts a tick and advances game time.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.game_time += 1;
        Instant::now()
    }

    /// Ends a tick started at `start`.
    pub fn end_tick(&mut self, start: Instant) {
        let elapsed = start.elapsed();
        let us = micros(elapsed);

        let stats = &mut self.stats;
        stats.total_ticks += 1;
        stats.min_tick_us = stats.min_tick_us.min(us);
        stats.max_tick_us = stats.max_tick_us.max(us);
        stats.avg_tick_us = (stats.avg_tick_us * 15 + us) / 16;
        if elapsed > self.tick_duration {
            stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let since = self.last_poll.elapsed() + self.accumulator;
        if since < self.tick_duration {
            std::thread::sleep(self.tick_duration - since);
        }
    }

    /// Current game time.
    #[inline]
    #[must_use]
    pub const fn game_time(&self) -> GameTime {
        self.game_time
    }

    /// Tick statistics.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target tick duration.
    #[inline]
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Clears the statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::new(self.tick_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_duration() {
        let tick_loop = TickLoop::new(10);
        assert_eq!(tick_loop.game_time(), 0);
        assert_eq!(tick_loop.tick_duration(), Duration::from_millis(100));
        assert_eq!(TickLoop::new(4).starting_at(50).game_time(), 50);
    }

    #[test]
    fn test_ticks_advance_game_time() {
        let mut tick_loop = TickLoop::new(1000);
        std::thread::sleep(Duration::from_millis(5));
        assert!(tick_loop.should_tick());

        let start = tick_loop.begin_tick();
        tick_loop.end_tick(start);
        assert_eq!(tick_loop.game_time(), 1);
        assert_eq!(tick_loop.stats().total_ticks, 1);
    }

    #[test]
    fn test_stats() {
        let mut tick_loop = TickLoop::new(1000);
        for _ in 0..5 {
            std::thread::sleep(Duration::from_micros(1500));
            while tick_loop.should_tick() {
                let start = tick_loop.begin_tick();
                tick_loop.end_tick(start);
            }
        }
        let stats = *tick_loop.stats();
        assert!(stats.total_ticks > 0);
        assert!(stats.min_tick_us <= stats.max_tick_us);

        tick_loop.reset_stats();
        assert_eq!(tick_loop.stats().total_ticks, 0);
    }
}
