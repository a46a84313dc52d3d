//! Stream configuration.
//!
//! A [`StreamConfig`] is fixed for the lifetime of an engine. The number of
//! device buffers is derived from it so that the queued audio covers the
//! requested latency, with at least double-buffering.

use crate::error::{CadenceError, Result};
use crate::limits::{MAX_CHANNELS, MIN_BLOCK_FRAMES, MIN_BUFFER_COUNT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Construction-time parameters of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count (1 or 2).
    pub channels: u16,
    /// Target latency in milliseconds.
    pub latency_ms: u32,
    /// Frames per block handed to the producer.
    pub block_frames: usize,
}

impl StreamConfig {
    /// Create and validate a configuration.
    pub fn new(sample_rate: u32, channels: u16, latency_ms: u32, block_frames: usize) -> Result<Self> {
        let config = Self {
            sample_rate,
            channels,
            latency_ms,
            block_frames,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every field against the supported ranges.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CadenceError::Configuration(
                "sample rate must be positive".to_string(),
            ));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(CadenceError::Configuration(format!(
                "channel count must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.latency_ms == 0 {
            return Err(CadenceError::Configuration(
                "latency must be positive".to_string(),
            ));
        }
        if self.block_frames < MIN_BLOCK_FRAMES {
            return Err(CadenceError::Configuration(format!(
                "block length must be at least {} frames, got {}",
                MIN_BLOCK_FRAMES, self.block_frames
            )));
        }
        Ok(())
    }

    /// Number of device buffers: `max(2, ceil(rate * latency / (1000 * block)))`.
    pub fn buffer_count(&self) -> usize {
        let wanted = self.sample_rate as u64 * self.latency_ms as u64;
        let per_buffer = 1000 * self.block_frames as u64;
        let count = wanted.div_ceil(per_buffer);
        (count as usize).max(MIN_BUFFER_COUNT)
    }

    /// Interleaved samples per block.
    #[inline]
    pub fn block_samples(&self) -> usize {
        self.channels as usize * self.block_frames
    }

    /// Playback time covered by one block.
    pub fn block_duration(&self) -> Duration {
        frames_to_duration(self.block_frames, self.sample_rate)
    }

    /// Target latency as a duration.
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms as u64)
    }

    /// Playback time covered by the whole buffer ring.
    pub fn queued_duration(&self) -> Duration {
        self.block_duration() * self.buffer_count() as u32
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            latency_ms: 200,
            block_frames: 2048,
        }
    }
}

/// Convert a frame count at `sample_rate` into a duration.
pub fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}
