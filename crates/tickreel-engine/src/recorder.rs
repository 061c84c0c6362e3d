//! Recorder — the Write Path
//!
//! Accepts a stream of opaque payloads and persists them as tick-keyed
//! segment files plus a `header.json` metadata document.
//!
//! ## Tick Derivation
//!
//! The central decision: the tick a payload lands on is computed from the
//! recorder's own pause-compensated clock, never supplied by the caller.
//! Caller cadence is unreliable; deriving the tick from the clock makes
//! `record` idempotent within a tick window — a second payload in the
//! same window overwrites the same key, so duplicates collapse for free.
//!
//! While `Recording`:
//!
//! ```text
//! current_tick = max(1, ⌊(now − start − paused) × tick_rate / 1000⌋)
//! ```
//!
//! and `0` in any other state.
//!
//! ## Flush Flow
//!
//! ```text
//! record(data)
//!     ↓
//! pending[current_tick] = data      ← in-memory buffer
//!     ↓
//! boundary or span reached?
//!     ↓ YES
//! flush: group pending by segment   ← ⌊tick / segment_size⌋
//!     ↓
//! write each group atomically       ← temp file + rename
//!     ↓
//! drop flushed ticks from pending
//! ```
//!
//! A flush failure surfaces from the triggering `record` (or `stop`) as
//! an I/O error, but the pending buffer keeps every unflushed payload, so
//! the next successful flush recovers them. A boolean guard drops
//! re-entrant flush requests; the skipped data simply rides along to the
//! next trigger.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --start--> Recording --pause--> Paused --resume--> Recording
//!                     └────────── stop ──────────┘
//! ```
//!
//! `stop` from `Paused` folds the open pause span first, so the final
//! tick count excludes paused time while `totalDuration` includes it.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tickreel_core::{PayloadCodec, ReplayMeta, SegmentData};

use crate::clock::TickClock;
use crate::config::RecorderConfig;
use crate::error::{Error, Result};
use crate::header::HeaderStore;
use crate::store::SegmentStore;

/// Recorder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Paused,
}

impl RecorderState {
    fn as_str(self) -> &'static str {
        match self {
            RecorderState::Idle => "Idle",
            RecorderState::Recording => "Recording",
            RecorderState::Paused => "Paused",
        }
    }
}

/// Records a stream of per-tick payloads into a recording directory.
pub struct Recorder<T, C> {
    dir: PathBuf,
    config: RecorderConfig,
    state: RecorderState,
    clock: TickClock,
    store: SegmentStore<T, C>,
    header: HeaderStore,
    meta: Option<ReplayMeta>,

    pending: BTreeMap<u64, T>,
    last_flush_tick: u64,
    flushed_segments: HashSet<u64>,
    flushing: bool,
}

impl<T, C> Recorder<T, C>
where
    T: Clone,
    C: PayloadCodec<T>,
{
    pub fn new(dir: impl AsRef<Path>, config: RecorderConfig, codec: C) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            store: SegmentStore::new(&dir, codec),
            header: HeaderStore::new(&dir),
            dir,
            config,
            state: RecorderState::Idle,
            clock: TickClock::new(),
            meta: None,
            pending: BTreeMap::new(),
            last_flush_tick: 0,
            flushed_segments: HashSet::new(),
            flushing: false,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    /// The wall-clock-derived tick payloads are currently landing on.
    /// Zero unless `Recording`.
    pub fn current_tick(&self) -> u64 {
        match self.state {
            RecorderState::Recording => self.clock.tick_at(self.config.tick_rate).max(1),
            _ => 0,
        }
    }

    /// Initialize the recording directory, write the unfinalized header,
    /// and start the tick clock.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != RecorderState::Idle {
            return Err(Error::invalid_state("start", self.state.as_str()));
        }
        self.config.validate()?;

        tokio::fs::create_dir_all(&self.dir).await?;

        let meta = ReplayMeta::new(
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            self.config.tick_rate,
            self.config.segment_size,
        );
        self.header.write_meta(&meta).await?;
        self.meta = Some(meta);

        self.pending.clear();
        self.last_flush_tick = 0;
        self.flushed_segments.clear();
        self.flushing = false;
        self.clock.start();
        self.state = RecorderState::Recording;

        tracing::info!(
            dir = %self.dir.display(),
            tick_rate = self.config.tick_rate,
            segment_size = self.config.segment_size,
            "recording started"
        );
        Ok(())
    }

    /// Record a payload at the current tick. A second payload within the
    /// same tick window overwrites the first. When the tick crosses a
    /// segment boundary (or has drifted a whole segment past the last
    /// flush) the pending buffer is flushed to disk; that I/O failure, if
    /// any, surfaces here.
    pub async fn record(&mut self, data: T) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::invalid_state("record", self.state.as_str()));
        }

        let tick = self.current_tick();
        self.pending.insert(tick, data);

        if tick % self.config.segment_size == 0
            || tick - self.last_flush_tick >= self.config.segment_size
        {
            self.flush_pending().await?;
            self.last_flush_tick = tick;
        }
        Ok(())
    }

    /// Flush the pending buffer and freeze the tick clock.
    pub async fn pause(&mut self) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::invalid_state("pause", self.state.as_str()));
        }
        self.flush_pending().await?;
        self.clock.pause();
        self.state = RecorderState::Paused;
        tracing::info!(tick = self.clock.tick_at(self.config.tick_rate), "recording paused");
        Ok(())
    }

    /// Unfreeze the tick clock; the paused span is excluded from tick
    /// derivation from here on.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != RecorderState::Paused {
            return Err(Error::invalid_state("resume", self.state.as_str()));
        }
        self.clock.resume();
        self.state = RecorderState::Recording;
        tracing::info!("recording resumed");
        Ok(())
    }

    /// Flush outstanding payloads, finalize and persist the header, and
    /// return the finalized metadata.
    pub async fn stop(&mut self) -> Result<ReplayMeta> {
        if self.state == RecorderState::Idle {
            return Err(Error::invalid_state("stop", self.state.as_str()));
        }
        if self.state == RecorderState::Paused {
            self.clock.resume();
            self.state = RecorderState::Recording;
        }

        let total_ticks = self.current_tick();
        self.flush_pending().await?;

        let Some(mut meta) = self.meta.take() else {
            return Err(Error::invalid_state("stop", self.state.as_str()));
        };
        meta.total_ticks = total_ticks;
        meta.total_duration_ms = self.clock.raw_elapsed_ms();
        self.header.write_meta(&meta).await?;

        self.state = RecorderState::Idle;
        tracing::info!(
            total_ticks = meta.total_ticks,
            total_duration_ms = meta.total_duration_ms,
            "recording stopped"
        );
        Ok(meta)
    }

    /// Write everything pending, one segment file per covered segment
    /// index. A request that arrives while a flush is already in flight
    /// is dropped; its data stays pending for the next trigger.
    async fn flush_pending(&mut self) -> Result<()> {
        if self.flushing || self.pending.is_empty() {
            return Ok(());
        }
        self.flushing = true;
        let result = self.write_pending_groups().await;
        self.flushing = false;
        result
    }

    async fn write_pending_groups(&mut self) -> Result<()> {
        while let Some(first) = self.pending.keys().next().copied() {
            let index = first / self.config.segment_size;
            let upper = (index + 1) * self.config.segment_size;

            let group: BTreeMap<u64, T> = self
                .pending
                .range(first..upper)
                .map(|(tick, payload)| (*tick, payload.clone()))
                .collect();

            // A pause can flush a segment before its tick range is
            // exhausted; later ticks for the same segment must merge over
            // the previously written file rather than replace it.
            let mut data = if self.flushed_segments.contains(&index) {
                match self.store.try_load_segment(index).await? {
                    Some(existing) => existing.data.clone(),
                    None => BTreeMap::new(),
                }
            } else {
                BTreeMap::new()
            };
            let flushed_ticks: Vec<u64> = group.keys().copied().collect();
            data.extend(group);

            let segment = SegmentData::from_map(data);
            self.store.write_segment(index, &segment).await?;
            self.flushed_segments.insert(index);

            for tick in &flushed_ticks {
                self.pending.remove(tick);
            }
            tracing::debug!(
                segment = index,
                ticks = flushed_ticks.len(),
                "flushed pending ticks"
            );
        }
        Ok(())
    }
}
