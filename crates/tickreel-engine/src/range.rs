//! Range Queries
//!
//! Bulk extraction of recorded ticks over a time or tick interval,
//! without driving the playback clock. Used for scrubbing previews,
//! exports, and analysis passes over a recording.
//!
//! ## Semantics
//!
//! - Exactly one of `tick_range` / `time_range` must be supplied.
//! - The interval is inclusive and clamped to `[0, total_ticks − 1]`.
//! - Segments covering the interval are preloaded with concurrent file
//!   reads, in waves bounded by `chunk_size` ticks when one is given.
//! - Output is ordered by tick. Missing ticks are skipped, or emitted as
//!   `data: None` placeholders when `include_partial_ticks` is set.

use serde::{Deserialize, Serialize};
use tickreel_core::{PayloadCodec, ReplayMeta, TickMeta};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::store::SegmentStore;

/// Options for [`crate::Replayer::get_range_data`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeQuery {
    /// Inclusive tick interval. Mutually exclusive with `time_range`.
    pub tick_range: Option<(u64, u64)>,

    /// Inclusive interval on the recording timeline, in milliseconds.
    /// Mutually exclusive with `tick_range`.
    pub time_range: Option<(f64, f64)>,

    /// Emit a `data: None` placeholder for every missing tick instead of
    /// skipping it (default: false).
    #[serde(default)]
    pub include_partial_ticks: bool,

    /// Advisory wave size, in ticks, for memory-bounded preloading. The
    /// whole interval is processed at once when omitted.
    pub chunk_size: Option<u64>,
}

impl RangeQuery {
    pub fn ticks(start: u64, end: u64) -> Self {
        Self {
            tick_range: Some((start, end)),
            ..Default::default()
        }
    }

    pub fn time_ms(start: f64, end: f64) -> Self {
        Self {
            time_range: Some((start, end)),
            ..Default::default()
        }
    }
}

/// One emitted tick: the payload (absent for placeholder entries) and
/// its computed meta.
#[derive(Debug, Clone)]
pub struct TickEntry<T> {
    pub data: Option<T>,
    pub meta: TickMeta,
}

/// Normalize a query to an inclusive tick interval. `None` when the
/// clamped interval is empty.
fn normalize(query: &RangeQuery, meta: &ReplayMeta) -> Result<Option<(u64, u64)>> {
    let (start, end) = match (&query.tick_range, &query.time_range) {
        (Some(_), Some(_)) => {
            return Err(Error::InvalidArgs(
                "tick_range and time_range are mutually exclusive".to_string(),
            ));
        }
        (None, None) => {
            return Err(Error::InvalidArgs(
                "one of tick_range or time_range is required".to_string(),
            ));
        }
        (Some((start, end)), None) => (*start, *end),
        (None, Some((start_ms, end_ms))) => {
            (meta.tick_for_time(*start_ms), meta.tick_for_time(*end_ms))
        }
    };

    if meta.total_ticks == 0 {
        return Ok(None);
    }
    let max_tick = meta.total_ticks - 1;
    let start = start.min(max_tick);
    let end = end.min(max_tick);
    if start > end {
        return Ok(None);
    }
    Ok(Some((start, end)))
}

pub(crate) async fn collect<T, C>(
    store: &AsyncMutex<SegmentStore<T, C>>,
    meta: &ReplayMeta,
    query: &RangeQuery,
) -> Result<Vec<TickEntry<T>>>
where
    T: Clone,
    C: PayloadCodec<T>,
{
    let Some((start, end)) = normalize(query, meta)? else {
        return Ok(Vec::new());
    };

    tracing::debug!(start, end, "range query");

    let mut entries = Vec::new();
    let mut wave_start = start;
    while wave_start <= end {
        let wave_end = match query.chunk_size {
            Some(chunk) if chunk > 0 => end.min(wave_start.saturating_add(chunk - 1)),
            _ => end,
        };

        let first_segment = meta.segment_index(wave_start);
        let last_segment = meta.segment_index(wave_end);
        let indices: Vec<u64> = (first_segment..=last_segment).collect();

        let mut guard = store.lock().await;
        guard.load_segments(&indices).await?;

        for index in first_segment..=last_segment {
            let segment = guard.try_load_segment(index).await?;
            let seg_start = wave_start.max(index * meta.segment_size);
            let seg_end = wave_end.min((index + 1) * meta.segment_size - 1);

            for tick in seg_start..=seg_end {
                let data = segment.as_ref().and_then(|s| s.get(tick).cloned());
                match data {
                    Some(payload) => entries.push(TickEntry {
                        data: Some(payload),
                        meta: meta.tick_meta(tick),
                    }),
                    None if query.include_partial_ticks => entries.push(TickEntry {
                        data: None,
                        meta: meta.tick_meta(tick),
                    }),
                    None => {}
                }
            }
        }
        drop(guard);

        if wave_end == u64::MAX {
            break;
        }
        wave_start = wave_end + 1;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ReplayMeta {
        ReplayMeta {
            created_at: "2024-11-02T10:00:00Z".to_string(),
            tick_rate: 30,
            segment_size: 1000,
            total_ticks: 1500,
            total_duration_ms: 50_000.0,
        }
    }

    // ---------------------------------------------------------------
    // normalize
    // ---------------------------------------------------------------

    #[test]
    fn test_normalize_requires_exactly_one_range() {
        let neither = RangeQuery::default();
        assert!(matches!(
            normalize(&neither, &meta()),
            Err(Error::InvalidArgs(_))
        ));

        let both = RangeQuery {
            tick_range: Some((0, 10)),
            time_range: Some((0.0, 100.0)),
            ..Default::default()
        };
        assert!(matches!(normalize(&both, &meta()), Err(Error::InvalidArgs(_))));
    }

    #[test]
    fn test_normalize_tick_range_passthrough() {
        let query = RangeQuery::ticks(10, 20);
        assert_eq!(normalize(&query, &meta()).unwrap(), Some((10, 20)));
    }

    #[test]
    fn test_normalize_time_range_converts_to_ticks() {
        let query = RangeQuery::time_ms(1000.0, 2000.0);
        assert_eq!(normalize(&query, &meta()).unwrap(), Some((30, 60)));
    }

    #[test]
    fn test_normalize_clamps_to_recording() {
        let query = RangeQuery::ticks(1400, 99_999);
        assert_eq!(normalize(&query, &meta()).unwrap(), Some((1400, 1499)));
    }

    #[test]
    fn test_normalize_empty_recording_yields_none() {
        let mut empty = meta();
        empty.total_ticks = 0;
        assert_eq!(normalize(&RangeQuery::ticks(0, 10), &empty).unwrap(), None);
    }

    #[test]
    fn test_normalize_inverted_range_yields_none() {
        assert_eq!(normalize(&RangeQuery::ticks(20, 10), &meta()).unwrap(), None);
    }
}
