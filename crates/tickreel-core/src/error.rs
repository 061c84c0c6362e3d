//! Error Types for the tickreel data format
//!
//! This module defines the errors that can occur while encoding or decoding
//! segment files and the replay header document.
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `InvalidMagic`: segment frame doesn't start with the expected magic bytes ("TKSG")
//! - `CrcMismatch`: corruption detected via checksum
//! - `Corrupt`: malformed segment body
//!
//! ### Version/Compatibility Errors
//! - `UnsupportedVersion`: segment was framed by a newer codec we don't support
//! - `InvalidCompression`: unknown compression type id
//!
//! ## Usage
//! All fallible functions in this crate return `Result<T>`, aliased to
//! `Result<T, Error>`, so callers can propagate with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported segment version: {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(u16),

    #[error("CRC mismatch")]
    CrcMismatch,

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt segment: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;
