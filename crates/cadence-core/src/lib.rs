//! Cadence Core - Foundation types for buffer-queue audio streaming
//!
//! This crate provides the types shared by the engine and its hosts:
//! - Stream configuration and buffer-count derivation (StreamConfig)
//! - Device source state and the caller-facing playback state
//! - The unified error type

pub mod config;
pub mod error;
pub mod state;

pub use config::StreamConfig;
pub use error::{CadenceError, Result};
pub use state::{PlaybackState, SourceState};

/// Limits applied when validating a [`StreamConfig`].
pub mod limits {
    /// Smallest block the producer may be asked to fill, in sample-frames.
    pub const MIN_BLOCK_FRAMES: usize = 8;

    /// Minimum number of queued buffers (double-buffering).
    pub const MIN_BUFFER_COUNT: usize = 2;

    /// Largest supported channel count (stereo).
    pub const MAX_CHANNELS: u16 = 2;
}
