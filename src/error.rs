//! Error types for the mapping store and the translator

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or saving the mapping file
#[derive(Debug, Error)]
pub enum MappingError {
    /// The file exists but does not hold a valid address→channel object
    #[error("mapping file {path} is corrupt: {reason}")]
    MappingFileCorrupt { path: PathBuf, reason: String },

    /// The file could not be read or written
    #[error("mapping file {path}: {source}")]
    MappingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Every controller number in the pool is taken
#[derive(Debug, Error)]
#[error("no free controller numbers left for {address}")]
pub struct PoolExhausted {
    pub address: String,
}

/// Why a translation produced no MIDI output
#[derive(Debug, Error)]
pub enum TranslateError {
    /// Unknown address and learning is disabled
    #[error("no mapping for {address} and learning is disabled")]
    NotMapped { address: String },

    /// Unknown address and the pool is empty
    #[error("no free controller numbers left for {address}")]
    PoolExhausted { address: String },

    /// The MIDI sink rejected the message
    #[error("failed to send MIDI for {address}")]
    Sink {
        address: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TranslateError {
    /// True for policy outcomes where the event was dropped on purpose
    pub fn is_suppressed(&self) -> bool {
        matches!(
            self,
            TranslateError::NotMapped { .. } | TranslateError::PoolExhausted { .. }
        )
    }
}
