//! Error type definitions for the tuner-relay engine
//!
//! One enum covers the whole lifecycle surface: every start/stop/restore
//! operation returns these variants, so callers can branch on the condition
//! rather than parsing messages.

use thiserror::Error;

/// Top-level engine error type
#[derive(Error, Debug)]
pub enum RelayError {
    /// The requested channel id is not present in the catalog
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// The named transcoding profile does not exist
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// UDP destination allocation scanned past the port ceiling
    #[error("No free UDP port on {ip} starting from {base}")]
    PortRangeExhausted { ip: String, base: u16 },

    /// FFmpeg could not be spawned
    #[error("Failed to spawn ffmpeg: {0}")]
    ProcessSpawnFailed(String),

    /// The encoder failed at runtime and no untried fallback remains
    #[error("Encoder {encoder} failed for channel {channel_id} with no fallback left")]
    EncoderFallbackExhausted { channel_id: String, encoder: String },

    /// A persisted stream record could not be replayed (non-fatal; skipped)
    #[error("Invalid restore record: {0}")]
    RestoreRecordInvalid(String),

    /// Built-in profiles cannot be removed
    #[error("Profile {0} is built in and cannot be removed")]
    ProfileProtected(String),

    /// Filesystem errors (output directories, snapshot file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization/deserialization failures
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
