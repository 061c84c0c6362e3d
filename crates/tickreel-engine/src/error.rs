//! Engine Error Types
//!
//! Errors that can occur while recording or replaying.
//!
//! ## Error Categories
//!
//! ### Caller Bugs
//! - `InvalidState`: an operation was invoked in the wrong state machine
//!   state (e.g. `record` before `start`, `play` while already playing)
//! - `InvalidArgs`: missing or contradictory options
//!
//! ### Storage Errors
//! - `Io`: filesystem read/write failure
//! - `Codec`: the segment frame failed to decode (treated like I/O for
//!   propagation: the data on disk is unusable)
//! - `SegmentNotFound` / `HeaderNotFound`: an expected file is absent
//!
//! No retries happen inside the engine; transient I/O retry is the
//! caller's responsibility. A missing payload during playback is not an
//! error at all — it marks the end of a finite recording.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} is not valid in state {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] tickreel_core::Error),

    #[error("segment {0} not found")]
    SegmentNotFound(u64),

    #[error("replay header not found at {}", .0.display())]
    HeaderNotFound(PathBuf),
}

impl Error {
    pub(crate) fn invalid_state(op: &'static str, state: &'static str) -> Self {
        Self::InvalidState { op, state }
    }
}
