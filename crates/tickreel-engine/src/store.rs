//! Segment Store
//!
//! Translates `segment index ↔ file` on a recording directory and caches
//! decoded segments.
//!
//! ## Layout
//!
//! One recording per directory:
//!
//! ```text
//! <dir>/header.json
//! <dir>/segment_0.dat
//! <dir>/segment_1.dat
//! ...
//! ```
//!
//! Segment `k` holds the ticks in `[k·segment_size, (k+1)·segment_size)`.
//!
//! ## Atomic Writes
//!
//! `write_segment` encodes to `segment_{k}.dat.tmp` and renames into
//! place, so a reader can never observe a partially written segment file.
//!
//! ## Caching Policy
//!
//! The cache maps segment index → decoded segment. Entries are dropped by
//! distance, not recency: `evict_far_from(k, window)` removes everything
//! more than `window` segments away from the cursor's segment. Playback
//! is overwhelmingly sequential with occasional seeks, so "near the
//! cursor" is the entire working set; each segment is decoded at most
//! once per eviction cycle.
//!
//! The store is owned by a single recorder or replayer instance; there is
//! no cross-instance locking. Multiple replayers may share a directory
//! read-only, each with their own store.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tickreel_core::{PayloadCodec, SegmentData};

use crate::error::{Error, Result};

/// Segment file store with a decoded-segment cache.
pub struct SegmentStore<T, C> {
    dir: PathBuf,
    codec: C,
    cache: HashMap<u64, Arc<SegmentData<T>>>,
}

impl<T, C> SegmentStore<T, C>
where
    T: Clone,
    C: PayloadCodec<T>,
{
    /// Create a store over `dir`. The directory itself is created by the
    /// recorder on `start`; replayers expect it to exist.
    pub fn new(dir: impl AsRef<Path>, codec: C) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            codec,
            cache: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// On-disk path for segment `k`.
    pub fn segment_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("segment_{}.dat", index))
    }

    /// Atomically replace segment file `k` with the given segment. The
    /// newly written segment also lands in the cache.
    pub async fn write_segment(&mut self, index: u64, segment: &SegmentData<T>) -> Result<()> {
        let bytes = self.codec.encode(segment)?;

        let path = self.segment_path(index);
        let tmp = self.dir.join(format!("segment_{}.dat.tmp", index));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(
            segment = index,
            ticks = segment.len(),
            bytes = bytes.len(),
            "wrote segment"
        );

        self.cache.insert(index, Arc::new(segment.clone()));
        Ok(())
    }

    /// Load segment `k`, from cache when present. Fails with
    /// [`Error::SegmentNotFound`] when the file does not exist.
    pub async fn load_segment(&mut self, index: u64) -> Result<Arc<SegmentData<T>>> {
        self.try_load_segment(index)
            .await?
            .ok_or(Error::SegmentNotFound(index))
    }

    /// Like [`SegmentStore::load_segment`], but a missing file is
    /// `Ok(None)` instead of an error. Read or decode failures still
    /// surface.
    pub async fn try_load_segment(&mut self, index: u64) -> Result<Option<Arc<SegmentData<T>>>> {
        if let Some(segment) = self.cache.get(&index) {
            return Ok(Some(segment.clone()));
        }

        let path = self.segment_path(index);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let segment = Arc::new(self.codec.decode(&bytes)?);
        tracing::debug!(
            segment = index,
            ticks = segment.len(),
            "loaded and decoded segment"
        );
        self.cache.insert(index, segment.clone());
        Ok(Some(segment))
    }

    /// Load every listed segment, reading missing files concurrently.
    /// Indices whose file does not exist are skipped; other failures
    /// surface.
    pub async fn load_segments(&mut self, indices: &[u64]) -> Result<()> {
        let missing: Vec<u64> = indices
            .iter()
            .copied()
            .filter(|index| !self.cache.contains_key(index))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let paths: Vec<(u64, PathBuf)> = missing
            .iter()
            .map(|&index| (index, self.segment_path(index)))
            .collect();
        let reads = paths
            .into_iter()
            .map(|(index, path)| async move { (index, tokio::fs::read(path).await) });
        let results = futures::future::join_all(reads).await;

        for (index, read) in results {
            match read {
                Ok(bytes) => {
                    let segment = Arc::new(self.codec.decode(&bytes)?);
                    self.cache.insert(index, segment);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Drop cached segments whose index differs from `center` by more
    /// than `window`.
    pub fn evict_far_from(&mut self, center: u64, window: u64) {
        let before = self.cache.len();
        self.cache.retain(|&index, _| index.abs_diff(center) <= window);
        let evicted = before - self.cache.len();
        if evicted > 0 {
            tracing::debug!(center, window, evicted, "evicted distant segments");
        }
    }

    pub fn is_cached(&self, index: u64) -> bool {
        self.cache.contains_key(&index)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tickreel_core::{Compression, JsonCodec};

    fn store_in(dir: &Path) -> SegmentStore<i64, JsonCodec> {
        SegmentStore::new(dir, JsonCodec::new(Compression::Lz4))
    }

    fn segment_of(ticks: impl IntoIterator<Item = u64>) -> SegmentData<i64> {
        let data: BTreeMap<u64, i64> = ticks.into_iter().map(|t| (t, t as i64 * 10)).collect();
        SegmentData::from_map(data)
    }

    // ---------------------------------------------------------------
    // Write / load
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_write_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        let segment = segment_of(0..5);
        store.write_segment(0, &segment).await.unwrap();

        assert!(dir.path().join("segment_0.dat").exists());
        let loaded = store.load_segment(0).await.unwrap();
        assert_eq!(*loaded, segment);
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.write_segment(3, &segment_of(3000..3004)).await.unwrap();

        assert!(dir.path().join("segment_3.dat").exists());
        assert!(!dir.path().join("segment_3.dat.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.write_segment(0, &segment_of(0..3)).await.unwrap();
        let replacement = segment_of(0..7);
        store.write_segment(0, &replacement).await.unwrap();

        // Bypass the cache to prove the file itself was replaced.
        let mut fresh = store_in(dir.path());
        let loaded = fresh.load_segment(0).await.unwrap();
        assert_eq!(*loaded, replacement);
    }

    #[tokio::test]
    async fn test_load_missing_segment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        let err = store.load_segment(42).await.unwrap_err();
        assert!(matches!(err, Error::SegmentNotFound(42)));
    }

    #[tokio::test]
    async fn test_try_load_missing_segment_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        assert!(store.try_load_segment(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_segment_fails() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("segment_0.dat"), b"not a segment frame")
            .await
            .unwrap();

        let mut store = store_in(dir.path());
        let err = store.load_segment(0).await.unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    // ---------------------------------------------------------------
    // Caching
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_load_hits_cache_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.write_segment(0, &segment_of(0..3)).await.unwrap();

        let first = store.load_segment(0).await.unwrap();

        // Remove the file; the cached copy must still serve.
        tokio::fs::remove_file(dir.path().join("segment_0.dat"))
            .await
            .unwrap();
        let second = store.load_segment(0).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_write_populates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.write_segment(5, &segment_of(5000..5002)).await.unwrap();
        assert!(store.is_cached(5));
    }

    #[tokio::test]
    async fn test_evict_far_from_keeps_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        for k in 0..10u64 {
            store.write_segment(k, &segment_of(k * 10..k * 10 + 2)).await.unwrap();
        }
        assert_eq!(store.cached_count(), 10);

        store.evict_far_from(5, 3);

        for k in 2..=8u64 {
            assert!(store.is_cached(k), "segment {} should be retained", k);
        }
        for k in [0u64, 1, 9] {
            assert!(!store.is_cached(k), "segment {} should be evicted", k);
        }
    }

    #[tokio::test]
    async fn test_evict_near_zero_does_not_underflow() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        for k in 0..6u64 {
            store.write_segment(k, &segment_of(k..k + 1)).await.unwrap();
        }
        store.evict_far_from(0, 3);
        assert!(store.is_cached(0));
        assert!(store.is_cached(3));
        assert!(!store.is_cached(4));
    }

    #[tokio::test]
    async fn test_evicted_segment_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        let segment = segment_of(0..4);
        store.write_segment(0, &segment).await.unwrap();

        store.evict_far_from(100, 3);
        assert!(!store.is_cached(0));

        let loaded = store.load_segment(0).await.unwrap();
        assert_eq!(*loaded, segment);
    }

    // ---------------------------------------------------------------
    // Bulk preload
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_load_segments_caches_existing_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.write_segment(0, &segment_of(0..2)).await.unwrap();
        store.write_segment(2, &segment_of(2000..2002)).await.unwrap();
        store.evict_far_from(u64::MAX, 0);

        store.load_segments(&[0, 1, 2]).await.unwrap();
        assert!(store.is_cached(0));
        assert!(!store.is_cached(1));
        assert!(store.is_cached(2));
    }
}
