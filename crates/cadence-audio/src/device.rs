//! Buffer-queue device interface.
//!
//! The engine talks to the output backend only through [`AudioDevice`]. The
//! model is the one shared by most queue-based audio APIs: the backend owns
//! a set of buffer handles and one source whose playback queue consumes
//! them in FIFO order. Consumed ("processed") buffers must be unqueued
//! before their memory can be reused.
//!
//! Backends are responsible for their own initialization; by the time a
//! device reaches the engine it is open and ready to allocate handles.

use cadence_core::{Result, SourceState};
use crossbeam_channel::Receiver;
use std::fmt;

/// Opaque reference to a device-managed sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Opaque reference to a device source (voice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceHandle(pub u32);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Synchronous buffer-queue output device.
///
/// Every call either succeeds or returns an error; none of them block on
/// playback. Allocation failures should be reported as
/// `CadenceError::DeviceResource`, everything else as `CadenceError::Device`
/// or `CadenceError::DeviceState`.
pub trait AudioDevice: Send + 'static {
    // === Handles ===

    /// Allocate one buffer handle.
    fn create_buffer(&mut self) -> Result<BufferHandle>;

    /// Release a buffer handle. The buffer must not be queued.
    fn release_buffer(&mut self, buffer: BufferHandle) -> Result<()>;

    /// Allocate the playback source.
    fn create_source(&mut self) -> Result<SourceHandle>;

    /// Release the playback source.
    fn release_source(&mut self, source: SourceHandle) -> Result<()>;

    // === Data transfer ===

    /// Copy interleaved PCM into a buffer the device does not currently own.
    fn upload(
        &mut self,
        buffer: BufferHandle,
        samples: &[f32],
        channels: u16,
        sample_rate: u32,
    ) -> Result<()>;

    /// Append a buffer to the source's playback queue.
    fn queue(&mut self, source: SourceHandle, buffer: BufferHandle) -> Result<()>;

    /// Remove the oldest processed buffer from the source's queue.
    fn unqueue(&mut self, source: SourceHandle) -> Result<BufferHandle>;

    // === Queries ===

    /// Number of buffers fully consumed and eligible for unqueue.
    fn processed(&mut self, source: SourceHandle) -> Result<usize>;

    /// Current playback state of the source.
    fn source_state(&mut self, source: SourceHandle) -> Result<SourceState>;

    // === Commands ===

    fn play(&mut self, source: SourceHandle) -> Result<()>;

    /// Halt playback. Every buffer still queued becomes processed.
    fn stop(&mut self, source: SourceHandle) -> Result<()>;

    // === Events ===

    /// Channel that receives a message each time a buffer is processed.
    ///
    /// Devices that can push completion events return `Some`, which lets
    /// the fill scheduler wait for work instead of polling on a timer.
    fn processed_events(&self) -> Option<Receiver<()>> {
        None
    }

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}
