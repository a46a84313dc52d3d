//! Cadence Audio - Streaming engine
//!
//! Keeps a buffer-queue output device continuously fed from a pull-based
//! producer.
//!
//! Architecture:
//! - `BufferRing`: device buffers plus the staging block used to refill them
//! - `FillScheduler`: background loop that recycles processed buffers and
//!   restarts playback after an underrun
//! - `StreamEngine`: start/stop/replace/dispose lifecycle, one session at a time
//! - `AudioDevice`: the backend seam (`VirtualDevice` in-process,
//!   `CpalDevice` behind the `cpal` feature)

pub mod buffer_ring;
pub mod device;
pub mod engine;
pub mod producer;
pub mod scheduler;
pub mod stats;
pub mod virtual_device;

#[cfg(feature = "cpal")]
pub mod cpal_device;

pub use buffer_ring::BufferRing;
pub use device::{AudioDevice, BufferHandle, SourceHandle};
pub use engine::{EngineOptions, StreamEngine};
pub use producer::{Producer, Silence};
pub use scheduler::{CancelToken, FillTrigger, DEFAULT_IDLE};
pub use stats::StreamStats;
pub use virtual_device::{ClockMode, DeviceCounters, VirtualDevice};

#[cfg(feature = "cpal")]
pub use cpal_device::CpalDevice;
