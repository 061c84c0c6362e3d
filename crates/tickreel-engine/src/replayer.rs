//! Replayer — the Read Path
//!
//! Drives tick callbacks at the right wall-clock time and supports
//! random-access control: play, pause, resume, stop, seek by tick or
//! time, single-stepping, and variable speed.
//!
//! ## Clock Model
//!
//! The replayer anchors its clock whenever playback (re)starts:
//!
//! ```text
//! expected_tick = anchor_tick
//!              + ⌊(now − play_start − paused_duration) × tick_rate × speed / 1000⌋
//! ```
//!
//! `anchor_tick` is the cursor position at the moment `play` (or
//! `set_speed`) was called, so a preceding seek is treated as
//! instantaneous. `current_tick` is the tick most recently delivered via
//! the tick callback; the difference `expected − current` is the drift.
//!
//! ## The Playing Loop
//!
//! One spawned task per playback session:
//!
//! ```text
//! ┌─> fetch payload for current_tick ──absent──> Idle + on_end
//! │       ↓
//! │   on_tick(payload, meta)
//! │       ↓
//! │   expected_tick > current_tick?  ──yes──> seek forward (catch-up)
//! │       ↓
//! │   delay = (next_tick_time − playhead) / speed
//! │       ↓
//! └─ delay < 4ms ? continue synchronously : sleep once, re-enter
//! ```
//!
//! The 4 ms floor matches the host timer quantum: scheduling a timer for
//! a sub-quantum interval costs more than the interval itself, so short
//! gaps are processed synchronously. That keeps high-speed playback
//! accurate without spinning.
//!
//! Every control operation bumps a generation counter and cancels the
//! task; an in-flight segment load completes and its result is discarded
//! when the generation moved on. There is never more than one pending
//! timer per replayer.
//!
//! ## Termination
//!
//! Playback stops naturally when the payload for the cursor is absent —
//! the segment file does not exist, or the tick is missing within it.
//! This deliberately conflates "end of recording" with "gap in data";
//! callers that need to distinguish can consult `ReplayMeta::total_ticks`.
//! The one exception: before the first delivery after the cursor was
//! positioned (init or seek), the cursor snaps forward to the first
//! present tick in its segment, so recordings that begin at tick 1 play
//! from the top.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tickreel_core::{PayloadCodec, ReplayMeta, TickMeta};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use crate::config::{clamp_speed, ReplayOptions};
use crate::error::{Error, Result};
use crate::header::HeaderStore;
use crate::range::{self, RangeQuery, TickEntry};
use crate::store::SegmentStore;

/// Below this delay the loop keeps processing synchronously instead of
/// arming a timer.
pub const MIN_TIMER_DELAY_MS: f64 = 4.0;

/// Replayer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Playing,
    Paused,
}

impl ReplayState {
    fn as_str(self) -> &'static str {
        match self {
            ReplayState::Idle => "Idle",
            ReplayState::Playing => "Playing",
            ReplayState::Paused => "Paused",
        }
    }
}

/// Payload delivery callback: the recorded payload plus its computed meta.
pub type TickCallback<T> = Box<dyn FnMut(&T, TickMeta) + Send>;

/// Lifecycle notification callback.
pub type EventCallback = Box<dyn FnMut() + Send>;

/// Callbacks wired into a replayer at construction.
pub struct ReplayCallbacks<T> {
    pub on_start: Option<EventCallback>,
    pub on_tick: TickCallback<T>,
    pub on_end: Option<EventCallback>,
}

impl<T> ReplayCallbacks<T> {
    pub fn new(on_tick: impl FnMut(&T, TickMeta) + Send + 'static) -> Self {
        Self {
            on_start: None,
            on_tick: Box::new(on_tick),
            on_end: None,
        }
    }

    pub fn on_start(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_end(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }
}

/// Mutable playback state, guarded by a plain mutex and never held
/// across an await.
struct Control {
    state: ReplayState,
    current_tick: u64,
    speed: f64,
    /// Bumped by every control operation; a playing-loop task whose
    /// generation no longer matches must discard its work and exit.
    generation: u64,
    play_start: Option<Instant>,
    paused_total: Duration,
    pause_started: Option<Instant>,
    anchor_tick: u64,
    last_meta: Option<TickMeta>,
    /// The payload at `current_tick` has already been delivered (seek
    /// echo or a playing-loop delivery); the loop then fetches the
    /// following tick.
    cursor_delivered: bool,
    /// Anything has been delivered since the cursor was last positioned
    /// by `init` or `seek`; gates the snap-forward on first delivery.
    delivered_since_position: bool,
    task: Option<JoinHandle<()>>,
}

pub(crate) struct Shared<T, C> {
    pub(crate) meta: ReplayMeta,
    pub(crate) cache_window: u64,
    control: StdMutex<Control>,
    pub(crate) store: AsyncMutex<SegmentStore<T, C>>,
    callbacks: StdMutex<ReplayCallbacks<T>>,
}

fn lock<'a, X>(mutex: &'a StdMutex<X>) -> MutexGuard<'a, X> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replays a recording directory through user callbacks.
pub struct Replayer<T, C> {
    dir: PathBuf,
    options: ReplayOptions,
    codec: Option<C>,
    callbacks: Option<ReplayCallbacks<T>>,
    shared: Option<Arc<Shared<T, C>>>,
}

impl<T, C> Replayer<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: PayloadCodec<T> + 'static,
{
    pub fn new(
        dir: impl AsRef<Path>,
        options: ReplayOptions,
        codec: C,
        callbacks: ReplayCallbacks<T>,
    ) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            options,
            codec: Some(codec),
            callbacks: Some(callbacks),
            shared: None,
        }
    }

    /// Read the recording's header and prepare the segment store. Must be
    /// called once before any other operation; fails with
    /// [`Error::HeaderNotFound`] when the directory holds no recording.
    pub async fn init(&mut self) -> Result<()> {
        if self.shared.is_some() {
            return Err(Error::invalid_state("init", "initialized"));
        }
        let meta = HeaderStore::new(&self.dir).read_meta().await?;
        if meta.tick_rate == 0 || meta.segment_size == 0 {
            return Err(Error::Codec(tickreel_core::Error::Corrupt(
                "header has zero tickRate or segmentSize".to_string(),
            )));
        }
        let (Some(codec), Some(callbacks)) = (self.codec.take(), self.callbacks.take()) else {
            return Err(Error::invalid_state("init", "initialized"));
        };
        tracing::info!(
            dir = %self.dir.display(),
            tick_rate = meta.tick_rate,
            segment_size = meta.segment_size,
            total_ticks = meta.total_ticks,
            "replayer initialized"
        );

        self.shared = Some(Arc::new(Shared {
            meta,
            cache_window: self.options.cache_window,
            control: StdMutex::new(Control {
                state: ReplayState::Idle,
                current_tick: 0,
                speed: clamp_speed(self.options.speed),
                generation: 0,
                play_start: None,
                paused_total: Duration::ZERO,
                pause_started: None,
                anchor_tick: 0,
                last_meta: None,
                cursor_delivered: false,
                delivered_since_position: false,
                task: None,
            }),
            store: AsyncMutex::new(SegmentStore::new(&self.dir, codec)),
            callbacks: StdMutex::new(callbacks),
        }));
        Ok(())
    }

    fn shared(&self, op: &'static str) -> Result<&Arc<Shared<T, C>>> {
        self.shared
            .as_ref()
            .ok_or(Error::invalid_state(op, "uninitialized"))
    }

    /// Finalized recording metadata, available after `init`.
    pub fn meta(&self) -> Option<&ReplayMeta> {
        self.shared.as_ref().map(|shared| &shared.meta)
    }

    pub fn state(&self) -> ReplayState {
        match &self.shared {
            Some(shared) => lock(&shared.control).state,
            None => ReplayState::Idle,
        }
    }

    /// The tick most recently delivered (or positioned by seek).
    pub fn current_tick(&self) -> u64 {
        match &self.shared {
            Some(shared) => lock(&shared.control).current_tick,
            None => 0,
        }
    }

    /// Recording-timeline position of the cursor in milliseconds.
    pub fn current_time_ms(&self) -> f64 {
        match &self.shared {
            Some(shared) => shared.meta.time_for_tick(lock(&shared.control).current_tick),
            None => 0.0,
        }
    }

    pub fn speed(&self) -> f64 {
        match &self.shared {
            Some(shared) => lock(&shared.control).speed,
            None => clamp_speed(self.options.speed),
        }
    }

    /// Enter `Playing` from `Idle` or `Paused`. Playing while already
    /// playing is an error (it catches double-start bugs).
    pub fn play(&self) -> Result<()> {
        let shared = self.shared("play")?;
        let gen = {
            let mut ctl = lock(&shared.control);
            match ctl.state {
                ReplayState::Playing => {
                    return Err(Error::invalid_state("play", ctl.state.as_str()));
                }
                ReplayState::Idle => {
                    ctl.play_start = Some(Instant::now());
                    ctl.paused_total = Duration::ZERO;
                    ctl.pause_started = None;
                    ctl.anchor_tick = ctl.current_tick;
                }
                ReplayState::Paused => {
                    if let Some(paused_at) = ctl.pause_started.take() {
                        ctl.paused_total += paused_at.elapsed();
                    }
                }
            }
            let fire_start = ctl.state == ReplayState::Idle;
            ctl.state = ReplayState::Playing;
            ctl.generation += 1;
            let gen = ctl.generation;
            drop(ctl);

            if fire_start {
                // Invoke outside the callbacks lock so the handler may
                // call back into the replayer.
                let on_start = lock(&shared.callbacks).on_start.take();
                if let Some(mut on_start) = on_start {
                    on_start();
                    lock(&shared.callbacks).on_start = Some(on_start);
                }
            }
            gen
        };
        self.spawn_drive(gen);
        tracing::debug!(tick = self.current_tick(), "playback started");
        Ok(())
    }

    /// `Paused → Playing`; the explicit arm of `play` for symmetry with
    /// the recorder API.
    pub fn resume(&self) -> Result<()> {
        let shared = self.shared("resume")?;
        {
            let ctl = lock(&shared.control);
            if ctl.state != ReplayState::Paused {
                return Err(Error::invalid_state("resume", ctl.state.as_str()));
            }
        }
        self.play()
    }

    /// Freeze playback, cancelling the pending timer.
    pub fn pause(&self) -> Result<()> {
        let shared = self.shared("pause")?;
        let mut ctl = lock(&shared.control);
        if ctl.state != ReplayState::Playing {
            return Err(Error::invalid_state("pause", ctl.state.as_str()));
        }
        ctl.generation += 1;
        if let Some(task) = ctl.task.take() {
            task.abort();
        }
        ctl.pause_started = Some(Instant::now());
        ctl.state = ReplayState::Paused;
        tracing::debug!(tick = ctl.current_tick, "playback paused");
        Ok(())
    }

    /// Return to `Idle`, cancelling the pending timer. The cursor keeps
    /// its position.
    pub fn stop(&self) -> Result<()> {
        let shared = self.shared("stop")?;
        let mut ctl = lock(&shared.control);
        if ctl.state == ReplayState::Idle {
            return Err(Error::invalid_state("stop", ctl.state.as_str()));
        }
        ctl.generation += 1;
        if let Some(task) = ctl.task.take() {
            task.abort();
        }
        ctl.state = ReplayState::Idle;
        ctl.play_start = None;
        ctl.pause_started = None;
        ctl.paused_total = Duration::ZERO;
        tracing::debug!(tick = ctl.current_tick, "playback stopped");
        Ok(())
    }

    /// Move the cursor to `tick` (clamped to the recording), cancel any
    /// pending timer, and deliver the payload at the target once so the
    /// caller can reflect the new position. Does not enter `Playing`; if
    /// playback was running it continues from the new cursor. Unlike the
    /// playing loop, an unreadable or missing segment surfaces here.
    pub async fn seek(&self, tick: u64) -> Result<()> {
        let shared = self.shared("seek")?;
        let total_ticks = shared.meta.total_ticks;
        let target = match total_ticks {
            0 => 0,
            n => tick.min(n - 1),
        };

        let (gen, state) = {
            let mut ctl = lock(&shared.control);
            ctl.generation += 1;
            if let Some(task) = ctl.task.take() {
                task.abort();
            }
            let state = ctl.state;
            ctl.current_tick = target;
            ctl.cursor_delivered = false;
            ctl.delivered_since_position = false;
            ctl.last_meta = None;
            (ctl.generation, state)
        };

        let index = shared.meta.segment_index(target);
        let segment = {
            let mut store = shared.store.lock().await;
            match store.load_segment(index).await {
                Ok(segment) => {
                    store.evict_far_from(index, shared.cache_window);
                    segment
                }
                Err(e) => {
                    drop(store);
                    let mut ctl = lock(&shared.control);
                    if ctl.generation == gen && state == ReplayState::Playing {
                        // Playback cannot continue without the segment;
                        // park instead of leaving a timer-less Playing.
                        ctl.state = ReplayState::Paused;
                        ctl.pause_started = Some(Instant::now());
                    }
                    return Err(e);
                }
            }
        };

        if let Some(payload) = segment.get(target) {
            let meta = shared.meta.tick_meta(target);
            let payload = payload.clone();
            {
                let mut ctl = lock(&shared.control);
                if ctl.generation != gen {
                    return Ok(());
                }
                ctl.last_meta = Some(meta);
                ctl.cursor_delivered = true;
                ctl.delivered_since_position = true;
            }
            let mut callbacks = lock(&shared.callbacks);
            (callbacks.on_tick)(&payload, meta);
        }

        // The seek is instantaneous on the play clock: anchor the
        // timeline at the target. A paused session re-anchors too, so a
        // later resume paces from the target rather than computing a gap
        // back to the pre-seek position.
        match state {
            ReplayState::Playing => {
                let rearm = {
                    let mut ctl = lock(&shared.control);
                    if ctl.generation == gen {
                        ctl.anchor_tick = target;
                        ctl.play_start = Some(Instant::now());
                        ctl.paused_total = Duration::ZERO;
                        ctl.pause_started = None;
                        true
                    } else {
                        false
                    }
                };
                if rearm {
                    self.spawn_drive(gen);
                }
            }
            ReplayState::Paused => {
                let mut ctl = lock(&shared.control);
                if ctl.generation == gen {
                    ctl.anchor_tick = target;
                    ctl.play_start = Some(Instant::now());
                    ctl.paused_total = Duration::ZERO;
                    ctl.pause_started = Some(Instant::now());
                }
            }
            ReplayState::Idle => {}
        }
        tracing::debug!(tick = target, state = state.as_str(), "seek");
        Ok(())
    }

    /// Seek to the tick containing the recording-timeline position `ms`.
    pub async fn seek_to_time(&self, ms: f64) -> Result<()> {
        let shared = self.shared("seek_to_time")?;
        self.seek(shared.meta.tick_for_time(ms)).await
    }

    pub async fn step_forward(&self, n: u64) -> Result<()> {
        let current = self.current_tick();
        self.seek(current.saturating_add(n)).await
    }

    pub async fn step_backward(&self, n: u64) -> Result<()> {
        let current = self.current_tick();
        self.seek(current.saturating_sub(n)).await
    }

    /// Change playback speed, clamped to the supported band. Requires
    /// `Playing`; the pending timer is cancelled and rescheduled under
    /// the new speed from the last played tick.
    pub fn set_speed(&self, speed: f64) -> Result<()> {
        let shared = self.shared("set_speed")?;
        let clamped = clamp_speed(speed);
        let gen = {
            let mut ctl = lock(&shared.control);
            if ctl.state != ReplayState::Playing {
                return Err(Error::invalid_state("set_speed", ctl.state.as_str()));
            }
            ctl.generation += 1;
            if let Some(task) = ctl.task.take() {
                task.abort();
            }
            ctl.speed = clamped;
            ctl.anchor_tick = ctl
                .last_meta
                .map(|meta| meta.tick)
                .unwrap_or(ctl.current_tick);
            ctl.play_start = Some(Instant::now());
            ctl.paused_total = Duration::ZERO;
            ctl.generation
        };
        self.spawn_drive(gen);
        tracing::debug!(speed = clamped, "playback speed changed");
        Ok(())
    }

    /// Collect every recorded tick in a time or tick interval; see
    /// [`RangeQuery`].
    pub async fn get_range_data(&self, query: RangeQuery) -> Result<Vec<TickEntry<T>>> {
        let shared = self.shared("get_range_data")?;
        range::collect(&shared.store, &shared.meta, &query).await
    }

    fn spawn_drive(&self, gen: u64) {
        let Some(shared) = self.shared.as_ref() else {
            return;
        };
        let handle = tokio::spawn(drive(Arc::clone(shared), gen));
        let mut ctl = lock(&shared.control);
        if ctl.generation == gen {
            ctl.task = Some(handle);
        } else {
            handle.abort();
        }
    }
}

/// Ticks per elapsed play time, from the anchor.
fn expected_tick(ctl: &Control, tick_rate: u32) -> u64 {
    let Some(play_start) = ctl.play_start else {
        return ctl.current_tick;
    };
    let end = ctl.pause_started.unwrap_or_else(Instant::now);
    let elapsed = end
        .saturating_duration_since(play_start)
        .saturating_sub(ctl.paused_total);
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    ctl.anchor_tick + (elapsed_ms * tick_rate as f64 * ctl.speed / 1000.0).floor() as u64
}

/// Current position on the recording timeline, in milliseconds.
fn playhead_ms(ctl: &Control, tick_rate: u32) -> f64 {
    let Some(play_start) = ctl.play_start else {
        return tickreel_core::meta::tick_to_time_ms(ctl.current_tick, tick_rate);
    };
    let end = ctl.pause_started.unwrap_or_else(Instant::now);
    let elapsed = end
        .saturating_duration_since(play_start)
        .saturating_sub(ctl.paused_total);
    tickreel_core::meta::tick_to_time_ms(ctl.anchor_tick, tick_rate)
        + elapsed.as_secs_f64() * 1000.0 * ctl.speed
}

/// Wall-clock delay until the tick after the last played one is due.
fn next_delay_ms(ctl: &Control, tick_rate: u32) -> f64 {
    let Some(last_meta) = ctl.last_meta else {
        return 0.0;
    };
    let next_time = last_meta.time_ms + 1000.0 / tick_rate as f64;
    ((next_time - playhead_ms(ctl, tick_rate)) / ctl.speed).max(0.0)
}

enum Delivery {
    Delivered(u64),
    Missing,
    Superseded,
}

/// Fetch the payload at `tick` and pass it to the tick callback. With
/// `snap`, a missing tick falls forward to the first present tick in the
/// same segment (and re-anchors the clock there).
async fn deliver_tick<T, C>(
    shared: &Arc<Shared<T, C>>,
    gen: u64,
    tick: u64,
    snap: bool,
    last_segment: &mut Option<u64>,
) -> Delivery
where
    T: Clone + Send + Sync + 'static,
    C: PayloadCodec<T> + 'static,
{
    let index = shared.meta.segment_index(tick);
    let segment = {
        let mut store = shared.store.lock().await;
        match store.try_load_segment(index).await {
            Ok(segment) => {
                if *last_segment != Some(index) {
                    store.evict_far_from(index, shared.cache_window);
                    *last_segment = Some(index);
                }
                segment
            }
            Err(e) => {
                // An unreadable segment ends the stream for the playing
                // loop; explicit seeks and range queries surface it.
                tracing::warn!(segment = index, error = %e, "segment unreadable during playback");
                None
            }
        }
    };

    let Some(segment) = segment else {
        return Delivery::Missing;
    };

    let (target, payload) = match segment.get(tick) {
        Some(payload) => (tick, payload.clone()),
        None if snap => {
            let Some(first) = segment.first_tick_at_or_after(tick) else {
                return Delivery::Missing;
            };
            match segment.get(first) {
                Some(payload) => (first, payload.clone()),
                None => return Delivery::Missing,
            }
        }
        None => return Delivery::Missing,
    };

    let meta = shared.meta.tick_meta(target);
    {
        let mut ctl = lock(&shared.control);
        if ctl.generation != gen {
            return Delivery::Superseded;
        }
        if target != tick {
            // Snapped to the recording's first present tick; anchor the
            // clock there so pacing and drift measure from the snap.
            ctl.anchor_tick = target;
            ctl.play_start = Some(Instant::now());
            ctl.paused_total = Duration::ZERO;
        }
        ctl.current_tick = target;
        ctl.cursor_delivered = true;
        ctl.delivered_since_position = true;
        ctl.last_meta = Some(meta);
    }
    let mut callbacks = lock(&shared.callbacks);
    (callbacks.on_tick)(&payload, meta);
    Delivery::Delivered(target)
}

fn finish_playback<T, C>(shared: &Arc<Shared<T, C>>, gen: u64) {
    {
        let mut ctl = lock(&shared.control);
        if ctl.generation != gen {
            return;
        }
        ctl.state = ReplayState::Idle;
        ctl.play_start = None;
        ctl.pause_started = None;
        ctl.paused_total = Duration::ZERO;
        ctl.task = None;
        // The cursor was never advanced onto the missing tick, so the
        // observers keep reporting the last tick actually played.
    }
    tracing::info!("playback reached the end of the recording");
    // Invoke outside the callbacks lock so the handler may call back
    // into the replayer (e.g. loop the replay with a fresh play).
    let on_end = lock(&shared.callbacks).on_end.take();
    if let Some(mut on_end) = on_end {
        on_end();
        lock(&shared.callbacks).on_end = Some(on_end);
    }
}

/// The playing loop: one task, one pending timer.
async fn drive<T, C>(shared: Arc<Shared<T, C>>, gen: u64)
where
    T: Clone + Send + Sync + 'static,
    C: PayloadCodec<T> + 'static,
{
    let tick_rate = shared.meta.tick_rate;
    let mut last_segment: Option<u64> = None;

    loop {
        // Wait out the gap to the tick after the last played one. The
        // cursor keeps pointing at the delivered tick while sleeping, so
        // the observers report played content, never scheduled-ahead
        // content. A fresh session has no last meta and starts at once.
        let delay_ms = {
            let ctl = lock(&shared.control);
            if ctl.generation != gen {
                return;
            }
            next_delay_ms(&ctl, tick_rate)
        };
        if delay_ms >= MIN_TIMER_DELAY_MS {
            sleep(Duration::from_secs_f64(delay_ms / 1000.0)).await;
            if lock(&shared.control).generation != gen {
                return;
            }
        }
        // Sub-quantum gap: fall through and keep processing synchronously.

        // Fetch the tick after an already-delivered cursor (seek echo,
        // resume, or the previous iteration). The cursor itself moves
        // only inside the delivery commit, so it always names the tick
        // most recently played.
        let (fetch_tick, snap) = {
            let ctl = lock(&shared.control);
            if ctl.generation != gen {
                return;
            }
            let fetch_tick = if ctl.cursor_delivered {
                ctl.current_tick + 1
            } else {
                ctl.current_tick
            };
            (fetch_tick, !ctl.delivered_since_position)
        };

        let delivered = match deliver_tick(&shared, gen, fetch_tick, snap, &mut last_segment).await
        {
            Delivery::Delivered(tick) => tick,
            Delivery::Missing => {
                finish_playback(&shared, gen);
                return;
            }
            Delivery::Superseded => return,
        };

        // Drift correction: when the clock has moved past the tick just
        // played, jump straight to where it should be.
        let expected = {
            let ctl = lock(&shared.control);
            if ctl.generation != gen {
                return;
            }
            expected_tick(&ctl, tick_rate)
        };
        if expected > delivered {
            tracing::debug!(
                behind = expected - delivered,
                expected,
                "catching up to expected tick"
            );
            match deliver_tick(&shared, gen, expected, false, &mut last_segment).await {
                Delivery::Delivered(_) => {}
                Delivery::Missing => {
                    finish_playback(&shared, gen);
                    return;
                }
                Delivery::Superseded => return,
            }
        }
    }
}
