//! tickreel Engine
//!
//! This crate implements the two halves of the tickreel replay engine:
//! recording a time-ordered stream of opaque per-tick payloads into a
//! segmented on-disk format, and replaying that format back under
//! wall-clock synchronization with VCR-style controls.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐
//! │  Game / App  │
//! └──────┬───────┘
//!        │ record(payload)
//!        ▼
//! ┌──────────────────┐
//! │ Recorder         │  tick := wall clock, pause-compensated
//! │ - pending buffer │
//! │ - flush triggers │
//! └────────┬─────────┘
//!          │ SegmentData
//!          ▼
//! ┌──────────────────┐     ┌─────────────┐
//! │ SegmentStore     │ ──▶ │ header.json │
//! │ segment_{k}.dat  │     │ HeaderStore │
//! └────────┬─────────┘     └─────────────┘
//!          │ SegmentData (cached, windowed eviction)
//!          ▼
//! ┌──────────────────┐
//! │ Replayer         │  single pending timer, drift catch-up
//! │ - playing loop   │
//! │ - seek/step/speed│
//! └────────┬─────────┘
//!          │ on_tick(payload, meta)
//!          ▼
//! ┌──────────────┐
//! │  Game / App  │
//! └──────────────┘
//! ```
//!
//! ## Main Components
//!
//! ### Recorder
//! Accepts payloads keyed by a wall-clock-derived tick, buffers them in
//! memory, and flushes whole segments atomically when a segment boundary
//! is crossed. Pause/resume freezes the tick clock without stopping the
//! wall clock, so paused time never lands in the recording.
//!
//! ### Replayer
//! Loads segments on demand, drives tick callbacks on a cooperative
//! scheduler (one pending timer, a 4 ms synchronous fast path), corrects
//! cumulative scheduling drift by seeking forward to the expected tick,
//! and supports seek-by-tick, seek-by-time, stepping, and speeds from
//! 0.1× to 10×.
//!
//! ### Range queries
//! Bulk extraction of any tick or time interval with optional
//! null-padding of gaps, independent of the playback clock.
//!
//! ## Usage
//!
//! ```ignore
//! use tickreel_core::JsonCodec;
//! use tickreel_engine::{Recorder, RecorderConfig, Replayer, ReplayCallbacks, ReplayOptions};
//!
//! // Record
//! let mut recorder = Recorder::new("match-001", RecorderConfig::default(), JsonCodec::default());
//! recorder.start().await?;
//! recorder.record(snapshot).await?;
//! let meta = recorder.stop().await?;
//!
//! // Replay
//! let mut replayer = Replayer::new(
//!     "match-001",
//!     ReplayOptions::default(),
//!     JsonCodec::default(),
//!     ReplayCallbacks::new(|snapshot, meta| apply(snapshot, meta))
//!         .on_end(|| println!("done")),
//! );
//! replayer.init().await?;
//! replayer.seek(1200).await?;
//! replayer.play()?;
//! ```
//!
//! ## Concurrency Model
//!
//! Single-threaded cooperative: the recorder suspends only inside flush
//! I/O, the replayer only at its one-shot timer and segment I/O. Control
//! operations are synchronous state changes guarded by a generation
//! counter — an in-flight segment load whose generation has moved on is
//! discarded. No retries happen anywhere in the engine; transient I/O
//! recovery belongs to the caller.

pub mod clock;
pub mod config;
pub mod error;
pub mod header;
pub mod range;
pub mod recorder;
pub mod replayer;
pub mod store;

pub use clock::TickClock;
pub use config::{clamp_speed, RecorderConfig, ReplayOptions, MAX_SPEED, MIN_SPEED};
pub use error::{Error, Result};
pub use header::{HeaderStore, HEADER_FILE};
pub use range::{RangeQuery, TickEntry};
pub use recorder::{Recorder, RecorderState};
pub use replayer::{
    ReplayCallbacks, ReplayState, Replayer, EventCallback, TickCallback, MIN_TIMER_DELAY_MS,
};
pub use store::SegmentStore;
