//! Replay Metadata and Tick Math
//!
//! This module defines the two metadata views of a recording:
//!
//! ## ReplayMeta
//! The per-recording header document, persisted as `header.json` in the
//! recording directory. It is the single point of agreement between the
//! recorder (which writes it) and any number of replayers (which read it):
//! both sides derive the `tick ↔ time ↔ segment` mapping from `tickRate`
//! and `segmentSize`, so no out-of-band configuration is needed.
//!
//! ## TickMeta
//! The computed (never persisted) view of a single tick:
//! - `time_ms = tick × 1000 / tick_rate`
//! - `segment_index = tick / segment_size`
//!
//! For any tick there is exactly one containing segment.
//!
//! ## Example
//! ```ignore
//! let meta = ReplayMeta::new("2024-11-02T10:00:00Z".to_string(), 30, 1000);
//! let tm = meta.tick_meta(1200);
//! assert_eq!(tm.segment_index, 1);
//! assert_eq!(tm.time_ms, 40_000.0);
//! ```

use serde::{Deserialize, Serialize};

/// Per-recording header document, stored as `header.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayMeta {
    /// Creation timestamp, ISO-8601
    pub created_at: String,

    /// Ticks per second, fixed for the lifetime of the recording
    pub tick_rate: u32,

    /// Ticks per segment file
    pub segment_size: u64,

    /// One past the highest recorded tick; zero until finalized
    pub total_ticks: u64,

    /// Wall-clock length of the recording session in milliseconds,
    /// pauses included
    #[serde(rename = "totalDuration")]
    pub total_duration_ms: f64,
}

impl ReplayMeta {
    /// Create an unfinalized header (zero ticks, zero duration).
    pub fn new(created_at: String, tick_rate: u32, segment_size: u64) -> Self {
        Self {
            created_at,
            tick_rate,
            segment_size,
            total_ticks: 0,
            total_duration_ms: 0.0,
        }
    }

    /// Compute the metadata for a single tick under this recording's
    /// rate and segment size.
    pub fn tick_meta(&self, tick: u64) -> TickMeta {
        TickMeta::new(tick, self.tick_rate, self.segment_size)
    }

    /// Segment index containing `tick`.
    pub fn segment_index(&self, tick: u64) -> u64 {
        tick / self.segment_size
    }

    /// Recording-timeline position of `tick` in milliseconds.
    pub fn time_for_tick(&self, tick: u64) -> f64 {
        tick_to_time_ms(tick, self.tick_rate)
    }

    /// Tick whose window contains the recording-timeline position `ms`.
    pub fn tick_for_time(&self, ms: f64) -> u64 {
        time_ms_to_tick(ms, self.tick_rate)
    }

    /// Milliseconds between consecutive ticks.
    pub fn tick_period_ms(&self) -> f64 {
        1000.0 / self.tick_rate as f64
    }
}

/// Computed view of a single tick. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickMeta {
    /// The tick index
    pub tick: u64,

    /// Recording-timeline position, `tick × 1000 / tick_rate` ms
    pub time_ms: f64,

    /// Index of the segment file holding this tick
    pub segment_index: u64,
}

impl TickMeta {
    pub fn new(tick: u64, tick_rate: u32, segment_size: u64) -> Self {
        Self {
            tick,
            time_ms: tick_to_time_ms(tick, tick_rate),
            segment_index: tick / segment_size,
        }
    }
}

/// `time[ms] = tick × 1000 / tick_rate`
pub fn tick_to_time_ms(tick: u64, tick_rate: u32) -> f64 {
    tick as f64 * 1000.0 / tick_rate as f64
}

/// Inverse of [`tick_to_time_ms`], flooring into the tick window.
pub fn time_ms_to_tick(ms: f64, tick_rate: u32) -> u64 {
    if ms <= 0.0 {
        return 0;
    }
    (ms * tick_rate as f64 / 1000.0).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> ReplayMeta {
        ReplayMeta {
            created_at: "2024-11-02T10:00:00.000Z".to_string(),
            tick_rate: 30,
            segment_size: 1000,
            total_ticks: 1500,
            total_duration_ms: 50_000.0,
        }
    }

    // ---------------------------------------------------------------
    // Tick math
    // ---------------------------------------------------------------

    #[test]
    fn test_tick_to_time() {
        assert_eq!(tick_to_time_ms(0, 30), 0.0);
        assert_eq!(tick_to_time_ms(30, 30), 1000.0);
        assert_eq!(tick_to_time_ms(1200, 30), 40_000.0);
        assert_eq!(tick_to_time_ms(1, 10), 100.0);
    }

    #[test]
    fn test_time_to_tick_floors() {
        assert_eq!(time_ms_to_tick(0.0, 30), 0);
        assert_eq!(time_ms_to_tick(33.0, 30), 0);
        assert_eq!(time_ms_to_tick(34.0, 30), 1);
        assert_eq!(time_ms_to_tick(1000.0, 30), 30);
        assert_eq!(time_ms_to_tick(999.9, 30), 29);
    }

    #[test]
    fn test_time_to_tick_negative_clamps_to_zero() {
        assert_eq!(time_ms_to_tick(-50.0, 30), 0);
    }

    #[test]
    fn test_tick_time_roundtrip() {
        for tick in [0u64, 1, 29, 30, 31, 999, 1000, 123_456] {
            let ms = tick_to_time_ms(tick, 30);
            assert_eq!(time_ms_to_tick(ms, 30), tick, "tick {}", tick);
        }
    }

    // ---------------------------------------------------------------
    // TickMeta
    // ---------------------------------------------------------------

    #[test]
    fn test_tick_meta_fields() {
        let tm = TickMeta::new(1200, 30, 1000);
        assert_eq!(tm.tick, 1200);
        assert_eq!(tm.time_ms, 40_000.0);
        assert_eq!(tm.segment_index, 1);
    }

    #[test]
    fn test_tick_meta_segment_boundaries() {
        assert_eq!(TickMeta::new(0, 30, 1000).segment_index, 0);
        assert_eq!(TickMeta::new(999, 30, 1000).segment_index, 0);
        assert_eq!(TickMeta::new(1000, 30, 1000).segment_index, 1);
        assert_eq!(TickMeta::new(1999, 30, 1000).segment_index, 1);
        assert_eq!(TickMeta::new(2000, 30, 1000).segment_index, 2);
    }

    #[test]
    fn test_meta_helpers_agree_with_tick_meta() {
        let meta = sample_meta();
        let tm = meta.tick_meta(777);
        assert_eq!(tm.segment_index, meta.segment_index(777));
        assert_eq!(tm.time_ms, meta.time_for_tick(777));
    }

    #[test]
    fn test_tick_period() {
        let meta = sample_meta();
        assert!((meta.tick_period_ms() - 33.333_333).abs() < 0.001);
    }

    // ---------------------------------------------------------------
    // ReplayMeta serde: the on-disk header.json contract
    // ---------------------------------------------------------------

    #[test]
    fn test_header_json_keys() {
        let meta = sample_meta();
        let val: serde_json::Value = serde_json::to_value(&meta).expect("to_value");
        assert_eq!(val["createdAt"], "2024-11-02T10:00:00.000Z");
        assert_eq!(val["tickRate"], 30);
        assert_eq!(val["segmentSize"], 1000);
        assert_eq!(val["totalTicks"], 1500);
        assert_eq!(val["totalDuration"], 50_000.0);

        let obj = val.as_object().unwrap();
        assert_eq!(obj.len(), 5, "header.json carries exactly five keys");
    }

    #[test]
    fn test_header_json_roundtrip() {
        let meta = sample_meta();
        let json = serde_json::to_string(&meta).expect("serialize");
        let back: ReplayMeta = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(meta, back);
    }

    #[test]
    fn test_header_json_parses_external_document() {
        let json = r#"{
            "createdAt": "2023-05-01T00:00:00Z",
            "tickRate": 64,
            "segmentSize": 500,
            "totalTicks": 0,
            "totalDuration": 0
        }"#;
        let meta: ReplayMeta = serde_json::from_str(json).expect("deserialize");
        assert_eq!(meta.tick_rate, 64);
        assert_eq!(meta.segment_size, 500);
        assert_eq!(meta.total_ticks, 0);
        assert_eq!(meta.total_duration_ms, 0.0);
    }

    #[test]
    fn test_header_json_rejects_missing_field() {
        let json = r#"{"createdAt":"x","tickRate":30}"#;
        assert!(serde_json::from_str::<ReplayMeta>(json).is_err());
    }

    #[test]
    fn test_new_starts_unfinalized() {
        let meta = ReplayMeta::new("now".to_string(), 30, 1000);
        assert_eq!(meta.total_ticks, 0);
        assert_eq!(meta.total_duration_ms, 0.0);
    }
}
