//! Header Store
//!
//! Persists the per-recording metadata document as `header.json` inside
//! the recording directory. The recorder writes it twice — once on
//! `start` (unfinalized, zero ticks) and once on `stop` (final tick count
//! and duration) — and replayers read it during `init` to learn the
//! recording's `tickRate` and `segmentSize`.
//!
//! Writes go through a temp file, are fsynced, and are renamed into
//! place, so a successful `write_meta` is durable and a reader never sees
//! a torn document.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tickreel_core::ReplayMeta;

use crate::error::{Error, Result};

/// On-disk name of the metadata document.
pub const HEADER_FILE: &str = "header.json";

/// Reads and writes `header.json` for one recording directory.
#[derive(Debug, Clone)]
pub struct HeaderStore {
    path: PathBuf,
}

impl HeaderStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(HEADER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Durably overwrite the metadata document.
    pub async fn write_meta(&self, meta: &ReplayMeta) -> Result<()> {
        let json = serde_json::to_vec_pretty(meta).map_err(tickreel_core::Error::Json)?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            total_ticks = meta.total_ticks,
            "wrote replay header"
        );
        Ok(())
    }

    /// Read the metadata document. Fails with [`Error::HeaderNotFound`]
    /// when the file is absent and a codec error when it does not parse.
    pub async fn read_meta(&self) -> Result<ReplayMeta> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::HeaderNotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let meta =
            serde_json::from_slice(&bytes).map_err(tickreel_core::Error::Json)?;
        Ok(meta)
    }
}
