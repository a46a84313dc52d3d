//! Fixed set of device buffers plus the staging block used to refill them.
//!
//! The ring owns every device handle the engine uses: one source and
//! `buffer_count` buffers, allocated once at construction and released once
//! at teardown. All refills go through a single staging array, so steady
//! state streaming never allocates.

use crate::device::{AudioDevice, BufferHandle, SourceHandle};
use crate::producer::Producer;
use cadence_core::{CadenceError, Result, StreamConfig};
use tracing::{debug, trace, warn};

/// Device handles and staging memory for one engine.
pub struct BufferRing {
    source: SourceHandle,
    buffers: Vec<BufferHandle>,
    staging: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    torn_down: bool,
}

impl BufferRing {
    /// Allocate the source and `config.buffer_count()` buffers.
    ///
    /// If any allocation fails, everything allocated so far is released
    /// before the error is returned.
    pub fn initialize<D: AudioDevice>(device: &mut D, config: &StreamConfig) -> Result<Self> {
        let source = device.create_source()?;
        let mut pending = PendingHandles {
            device,
            source,
            buffers: Vec::with_capacity(config.buffer_count()),
            armed: true,
        };
        for _ in 0..config.buffer_count() {
            let buffer = pending.device.create_buffer()?;
            pending.buffers.push(buffer);
        }
        let (source, buffers) = pending.commit();

        debug!(
            "Allocated {} buffers of {} samples on {}",
            buffers.len(),
            config.block_samples(),
            source
        );

        Ok(Self {
            source,
            buffers,
            staging: vec![0.0; config.block_samples()],
            channels: config.channels,
            sample_rate: config.sample_rate,
            torn_down: false,
        })
    }

    /// The playback source.
    pub fn source(&self) -> SourceHandle {
        self.source
    }

    /// Buffer handles in allocation order.
    pub fn buffers(&self) -> &[BufferHandle] {
        &self.buffers
    }

    /// Samples per block (the staging length).
    pub fn block_samples(&self) -> usize {
        self.staging.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Fill every buffer in order and queue it, establishing the initial
    /// buffered depth. Returns the number of buffers queued.
    pub fn prime_and_queue<D: AudioDevice>(
        &mut self,
        device: &mut D,
        producer: &mut dyn Producer,
    ) -> Result<usize> {
        self.ensure_live()?;
        for index in 0..self.buffers.len() {
            let buffer = self.buffers[index];
            self.fill(producer);
            device.upload(buffer, &self.staging, self.channels, self.sample_rate)?;
            device.queue(self.source, buffer)?;
        }
        trace!("Primed {} buffers", self.buffers.len());
        Ok(self.buffers.len())
    }

    /// Let the producer overwrite the staging block.
    pub fn fill(&mut self, producer: &mut dyn Producer) {
        producer.fill(&mut self.staging);
    }

    /// Unqueue the oldest processed buffer, upload the staged block into it
    /// and queue it again.
    pub fn recycle_staged<D: AudioDevice>(&self, device: &mut D) -> Result<BufferHandle> {
        let buffer = device.unqueue(self.source)?;
        debug_assert!(self.buffers.contains(&buffer), "foreign {buffer} unqueued");
        device.upload(buffer, &self.staging, self.channels, self.sample_rate)?;
        device.queue(self.source, buffer)?;
        Ok(buffer)
    }

    /// Unqueue every processed buffer without refilling it.
    pub fn drain_processed<D: AudioDevice>(&self, device: &mut D) -> Result<usize> {
        let processed = device.processed(self.source)?;
        for _ in 0..processed {
            device.unqueue(self.source)?;
        }
        Ok(processed)
    }

    /// Stop the source and release every handle. Calling this again is a
    /// no-op.
    ///
    /// Release continues past individual failures; the first error is
    /// returned once everything has been attempted.
    pub fn teardown<D: AudioDevice>(&mut self, device: &mut D) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let mut first_error: Option<CadenceError> = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                warn!("Teardown step failed: {}", e);
                first_error.get_or_insert(e);
            }
        };

        record(device.stop(self.source));
        record(self.drain_processed(device).map(|_| ()));
        for buffer in self.buffers.drain(..) {
            record(device.release_buffer(buffer));
        }
        record(device.release_source(self.source));

        debug!("Buffer ring released on {}", device.name());
        first_error.map_or(Ok(()), Err)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.torn_down {
            Err(CadenceError::Disposed)
        } else {
            Ok(())
        }
    }
}

/// Handles allocated during `initialize` that have not been committed yet.
/// Dropping an armed value releases them.
struct PendingHandles<'a, D: AudioDevice> {
    device: &'a mut D,
    source: SourceHandle,
    buffers: Vec<BufferHandle>,
    armed: bool,
}

impl<D: AudioDevice> PendingHandles<'_, D> {
    fn commit(mut self) -> (SourceHandle, Vec<BufferHandle>) {
        self.armed = false;
        (self.source, std::mem::take(&mut self.buffers))
    }
}

impl<D: AudioDevice> Drop for PendingHandles<'_, D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for buffer in self.buffers.drain(..).rev() {
            if let Err(e) = self.device.release_buffer(buffer) {
                warn!("Failed to release {} after aborted allocation: {}", buffer, e);
            }
        }
        if let Err(e) = self.device.release_source(self.source) {
            warn!("Failed to release {} after aborted allocation: {}", self.source, e);
        }
    }
}
