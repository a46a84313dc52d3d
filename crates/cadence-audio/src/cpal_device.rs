//! Buffer-queue device on top of a cpal output stream.
//!
//! cpal pulls audio through a callback. This module presents it as a
//! buffer queue so the same fill scheduler drives real hardware: queued
//! buffers move into a shared FIFO that the callback drains, and exhausted
//! buffers move to a processed list until the engine unqueues them.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a small host thread
//! for as long as the device exists.

use crate::device::{AudioDevice, BufferHandle, SourceHandle};
use cadence_core::{CadenceError, Result, SourceState, StreamConfig};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Capacity of the processed-buffer event channel.
const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct PlaybackQueue {
    queue: VecDeque<(BufferHandle, Vec<f32>)>,
    processed: VecDeque<(BufferHandle, Vec<f32>)>,
    /// Read position inside the head of `queue`.
    cursor: usize,
    playing: bool,
    started: bool,
}

impl PlaybackQueue {
    fn state(&self) -> SourceState {
        match (self.playing, self.started) {
            (true, _) => SourceState::Playing,
            (false, true) => SourceState::Stopped,
            (false, false) => SourceState::Initial,
        }
    }

    /// Audio callback body: copy queued samples into `out`.
    fn render(&mut self, out: &mut [f32], events: &Sender<()>) {
        let mut written = 0;
        if self.playing {
            let Self {
                queue,
                processed,
                cursor,
                ..
            } = &mut *self;
            while written < out.len() {
                let Some((_, data)) = queue.front() else {
                    break;
                };
                let remaining = &data[*cursor..];
                let n = remaining.len().min(out.len() - written);
                out[written..written + n].copy_from_slice(&remaining[..n]);
                written += n;
                *cursor += n;
                if *cursor >= data.len() {
                    if let Some(done) = queue.pop_front() {
                        processed.push_back(done);
                    }
                    *cursor = 0;
                    let _ = events.try_send(());
                }
            }
            if queue.is_empty() {
                self.playing = false;
            }
        }
        out[written..].fill(0.0);
    }
}

/// Default output device driven as a buffer queue.
pub struct CpalDevice {
    sample_rate: u32,
    channels: u16,
    next_id: u32,
    /// `None` while the buffer's samples sit in the playback queue.
    buffers: HashMap<BufferHandle, Option<Vec<f32>>>,
    source: Option<SourceHandle>,
    shared: Arc<Mutex<PlaybackQueue>>,
    events: Receiver<()>,
    shutdown: Option<Sender<()>>,
    host_thread: Option<JoinHandle<()>>,
}

impl CpalDevice {
    /// Open the default output device with the format of `config`.
    pub fn open(config: &StreamConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Mutex::new(PlaybackQueue::default()));
        let (event_tx, event_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let stream_shared = Arc::clone(&shared);
        let stream_config = *config;
        let host_thread = thread::Builder::new()
            .name("cadence-cpal-host".to_string())
            .spawn(move || {
                let stream = match build_stream(&stream_config, stream_shared, event_tx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until the device is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| CadenceError::DeviceResource(format!("failed to spawn cpal host: {e}")))?;

        let name = ready_rx
            .recv()
            .map_err(|_| CadenceError::DeviceResource("cpal host exited during open".to_string()))??;
        info!("Opened output device '{}'", name);

        Ok(Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            next_id: 1,
            buffers: HashMap::new(),
            source: None,
            shared,
            events: event_rx,
            shutdown: Some(shutdown_tx),
            host_thread: Some(host_thread),
        })
    }

    fn check_source(&self, source: SourceHandle) -> Result<()> {
        if self.source == Some(source) {
            Ok(())
        } else {
            Err(CadenceError::device("source", format!("unknown {source}")))
        }
    }
}

fn build_stream(
    config: &StreamConfig,
    shared: Arc<Mutex<PlaybackQueue>>,
    events: Sender<()>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| CadenceError::DeviceResource("no default output device".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &stream_config,
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| match shared.try_lock() {
                Some(mut queue) => queue.render(out, &events),
                // Engine is mid-update; a silent period beats blocking here.
                None => out.fill(0.0),
            },
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| CadenceError::DeviceResource(format!("failed to build output stream: {e}")))?;
    stream
        .play()
        .map_err(|e| CadenceError::DeviceResource(format!("failed to start output stream: {e}")))?;
    Ok((stream, name))
}

impl AudioDevice for CpalDevice {
    fn create_buffer(&mut self) -> Result<BufferHandle> {
        let handle = BufferHandle(self.next_id);
        self.next_id += 1;
        self.buffers.insert(handle, Some(Vec::new()));
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        match self.buffers.get(&buffer) {
            Some(Some(_)) => {
                self.buffers.remove(&buffer);
                Ok(())
            }
            Some(None) => Err(CadenceError::device(
                "release_buffer",
                format!("{buffer} is still queued"),
            )),
            None => Err(CadenceError::device("release_buffer", format!("unknown {buffer}"))),
        }
    }

    fn create_source(&mut self) -> Result<SourceHandle> {
        if self.source.is_some() {
            return Err(CadenceError::DeviceResource(
                "output stream supports a single source".to_string(),
            ));
        }
        let handle = SourceHandle(self.next_id);
        self.next_id += 1;
        self.source = Some(handle);
        Ok(handle)
    }

    fn release_source(&mut self, source: SourceHandle) -> Result<()> {
        self.check_source(source)?;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        shared.playing = false;
        shared.cursor = 0;
        let detached: Vec<(BufferHandle, Vec<f32>)> =
            shared.queue.drain(..).chain(shared.processed.drain(..)).collect();
        drop(guard);
        for (handle, data) in detached {
            self.buffers.insert(handle, Some(data));
        }
        self.source = None;
        Ok(())
    }

    fn upload(
        &mut self,
        buffer: BufferHandle,
        samples: &[f32],
        channels: u16,
        sample_rate: u32,
    ) -> Result<()> {
        if channels != self.channels || sample_rate != self.sample_rate {
            return Err(CadenceError::device(
                "upload",
                format!(
                    "format {}ch/{}Hz does not match stream {}ch/{}Hz",
                    channels, sample_rate, self.channels, self.sample_rate
                ),
            ));
        }
        match self.buffers.get_mut(&buffer) {
            Some(Some(data)) => {
                data.clear();
                data.extend_from_slice(samples);
                Ok(())
            }
            Some(None) => Err(CadenceError::device(
                "upload",
                format!("{buffer} is owned by the playback queue"),
            )),
            None => Err(CadenceError::device("upload", format!("unknown {buffer}"))),
        }
    }

    fn queue(&mut self, source: SourceHandle, buffer: BufferHandle) -> Result<()> {
        self.check_source(source)?;
        let slot = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| CadenceError::device("queue", format!("unknown {buffer}")))?;
        match slot {
            Some(data) if !data.is_empty() => {}
            Some(_) => {
                return Err(CadenceError::device("queue", format!("{buffer} has no data")));
            }
            None => {
                return Err(CadenceError::device(
                    "queue",
                    format!("{buffer} is already queued"),
                ));
            }
        }
        if let Some(data) = slot.take() {
            self.shared.lock().queue.push_back((buffer, data));
        }
        Ok(())
    }

    fn unqueue(&mut self, source: SourceHandle) -> Result<BufferHandle> {
        self.check_source(source)?;
        let (handle, data) = self
            .shared
            .lock()
            .processed
            .pop_front()
            .ok_or_else(|| CadenceError::device("unqueue", "no processed buffers"))?;
        self.buffers.insert(handle, Some(data));
        Ok(handle)
    }

    fn processed(&mut self, source: SourceHandle) -> Result<usize> {
        self.check_source(source)?;
        Ok(self.shared.lock().processed.len())
    }

    fn source_state(&mut self, source: SourceHandle) -> Result<SourceState> {
        self.check_source(source)?;
        Ok(self.shared.lock().state())
    }

    fn play(&mut self, source: SourceHandle) -> Result<()> {
        self.check_source(source)?;
        let mut shared = self.shared.lock();
        shared.started = true;
        shared.playing = !shared.queue.is_empty();
        Ok(())
    }

    fn stop(&mut self, source: SourceHandle) -> Result<()> {
        self.check_source(source)?;
        let mut shared = self.shared.lock();
        shared.playing = false;
        shared.started = true;
        shared.cursor = 0;
        let pending: Vec<(BufferHandle, Vec<f32>)> = shared.queue.drain(..).collect();
        shared.processed.extend(pending);
        Ok(())
    }

    fn processed_events(&self) -> Option<Receiver<()>> {
        Some(self.events.clone())
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.host_thread.take() {
            if thread.join().is_err() {
                warn!("cpal host thread panicked");
            }
        }
    }
}
