//! Pause-Compensated Tick Clock
//!
//! Both halves of the engine derive tick indices from a monotonic wall
//! clock rather than trusting caller cadence: the recorder stamps incoming
//! payloads with the tick the clock says it is, and the replayer compares
//! the tick it has delivered against the tick the clock says it should
//! have delivered (drift).
//!
//! The clock subtracts time spent paused, so:
//!
//! ```text
//! elapsed_ms = now − started_at − Σ paused_intervals
//! tick       = ⌊elapsed_ms × tick_rate / 1000⌋
//! ```
//!
//! While paused, `elapsed_ms` is frozen at the instant the pause began.
//! `raw_elapsed_ms` ignores pause compensation and measures the whole
//! session (that is what a recording's `totalDuration` reports).
//!
//! Time is read from `tokio::time::Instant`, so tests can drive the clock
//! deterministically under `#[tokio::test(start_paused = true)]`.

use tokio::time::{Duration, Instant};

/// Monotonic clock with pause compensation. One per recorder or replayer;
/// never shared.
#[derive(Debug, Clone)]
pub struct TickClock {
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl TickClock {
    /// A stopped clock. `elapsed_ms` is zero until [`TickClock::start`].
    pub fn new() -> Self {
        Self {
            started_at: None,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    /// Start (or restart) the clock at the current instant, clearing any
    /// accumulated pause time.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.paused_at = None;
        self.paused_total = Duration::ZERO;
    }

    /// Freeze the clock. No-op when already paused or not started.
    pub fn pause(&mut self) {
        if self.started_at.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    /// Unfreeze the clock, folding the pause span into the compensation
    /// total. No-op when not paused.
    pub fn resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += paused_at.elapsed();
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Pause-compensated elapsed milliseconds since `start`.
    pub fn elapsed_ms(&self) -> f64 {
        let Some(started_at) = self.started_at else {
            return 0.0;
        };
        let end = self.paused_at.unwrap_or_else(Instant::now);
        let running = end.saturating_duration_since(started_at);
        running.saturating_sub(self.paused_total).as_secs_f64() * 1000.0
    }

    /// Elapsed milliseconds since `start`, pauses included.
    pub fn raw_elapsed_ms(&self) -> f64 {
        match self.started_at {
            Some(started_at) => started_at.elapsed().as_secs_f64() * 1000.0,
            None => 0.0,
        }
    }

    /// The tick the clock currently points at, under `tick_rate`.
    pub fn tick_at(&self, tick_rate: u32) -> u64 {
        (self.elapsed_ms() * tick_rate as f64 / 1000.0).floor() as u64
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_unstarted_clock_reads_zero() {
        let clock = TickClock::new();
        assert!(!clock.is_running());
        assert_eq!(clock.elapsed_ms(), 0.0);
        assert_eq!(clock.raw_elapsed_ms(), 0.0);
        assert_eq!(clock.tick_at(30), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_tracks_time() {
        let mut clock = TickClock::new();
        clock.start();
        advance(Duration::from_millis(500)).await;
        assert_eq!(clock.elapsed_ms(), 500.0);
        assert_eq!(clock.tick_at(30), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_elapsed() {
        let mut clock = TickClock::new();
        clock.start();
        advance(Duration::from_millis(300)).await;
        clock.pause();
        advance(Duration::from_millis(1000)).await;
        assert!(clock.is_paused());
        assert_eq!(clock.elapsed_ms(), 300.0);
        assert_eq!(clock.raw_elapsed_ms(), 1300.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_excludes_paused_span() {
        let mut clock = TickClock::new();
        clock.start();
        advance(Duration::from_millis(500)).await;
        clock.pause();
        advance(Duration::from_millis(1000)).await;
        clock.resume();
        advance(Duration::from_millis(500)).await;

        assert_eq!(clock.elapsed_ms(), 1000.0);
        assert_eq!(clock.raw_elapsed_ms(), 2000.0);
        assert_eq!(clock.tick_at(30), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_pause_resume_cycles_accumulate() {
        let mut clock = TickClock::new();
        clock.start();
        for _ in 0..4 {
            advance(Duration::from_millis(250)).await;
            clock.pause();
            advance(Duration::from_millis(100)).await;
            clock.resume();
        }
        // 4 × 250ms running, 4 × 100ms paused
        assert_eq!(clock.elapsed_ms(), 1000.0);
        assert_eq!(clock.raw_elapsed_ms(), 1400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_pause_is_noop() {
        let mut clock = TickClock::new();
        clock.start();
        advance(Duration::from_millis(100)).await;
        clock.pause();
        advance(Duration::from_millis(50)).await;
        clock.pause();
        advance(Duration::from_millis(50)).await;
        clock.resume();
        assert_eq!(clock.elapsed_ms(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_without_pause_is_noop() {
        let mut clock = TickClock::new();
        clock.start();
        clock.resume();
        advance(Duration::from_millis(200)).await;
        assert_eq!(clock.elapsed_ms(), 200.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_clears_pause_state() {
        let mut clock = TickClock::new();
        clock.start();
        advance(Duration::from_millis(300)).await;
        clock.pause();
        clock.start();
        advance(Duration::from_millis(100)).await;
        assert!(!clock.is_paused());
        assert_eq!(clock.elapsed_ms(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_at_floors() {
        let mut clock = TickClock::new();
        clock.start();
        advance(Duration::from_millis(33)).await;
        assert_eq!(clock.tick_at(30), 0);
        advance(Duration::from_millis(1)).await;
        assert_eq!(clock.tick_at(30), 1);
    }
}
