//! Engine Configuration
//!
//! Explicit option records for the two halves of the engine. Nothing here
//! is ambient or global: the recorder persists its configuration into
//! `header.json`, so a replayer opening the same directory needs no
//! out-of-band agreement.
//!
//! ## Defaults
//!
//! | Option | Default | Effect |
//! |---|---:|---|
//! | `segment_size` | 1000 | Ticks per segment; larger = fewer files, larger memory per load |
//! | `tick_rate` | 30 | Ticks per second; fixes the `time ↔ tick` conversion |
//! | `speed` | 1.0 | Playback speed multiplier, clamped to [0.1, 10.0] |
//! | `cache_window` | 3 | Segments either side of the current one kept decoded |
//!
//! ## Usage
//!
//! ```ignore
//! let config = RecorderConfig {
//!     tick_rate: 64,
//!     ..Default::default()
//! };
//!
//! let options = ReplayOptions {
//!     speed: 2.0,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lowest accepted playback speed. Anything slower would starve the
/// drift catch-up path.
pub const MIN_SPEED: f64 = 0.1;

/// Highest accepted playback speed. Anything faster exceeds sensible
/// segment I/O rates.
pub const MAX_SPEED: f64 = 10.0;

/// Recorder-side configuration, captured into `header.json` on `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Ticks per segment file (default: 1000)
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,

    /// Ticks per second (default: 30)
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            segment_size: default_segment_size(),
            tick_rate: default_tick_rate(),
        }
    }
}

impl RecorderConfig {
    /// Both knobs must be positive; a zero tick rate or segment size
    /// would make the tick math degenerate.
    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(Error::InvalidArgs("segment_size must be positive".into()));
        }
        if self.tick_rate == 0 {
            return Err(Error::InvalidArgs("tick_rate must be positive".into()));
        }
        Ok(())
    }
}

/// Replayer-side options. Rate and segment size come from the recording's
/// header, not from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOptions {
    /// Playback speed multiplier (default: 1.0); clamped to
    /// [[`MIN_SPEED`], [`MAX_SPEED`]]
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Segments on either side of the current one retained in the
    /// decoded-segment cache (default: 3)
    #[serde(default = "default_cache_window")]
    pub cache_window: u64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            cache_window: default_cache_window(),
        }
    }
}

/// Clamp a requested playback speed into the supported band.
pub fn clamp_speed(speed: f64) -> f64 {
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

fn default_segment_size() -> u64 {
    1000
}

fn default_tick_rate() -> u32 {
    30
}

fn default_speed() -> f64 {
    1.0
}

fn default_cache_window() -> u64 {
    3
}
