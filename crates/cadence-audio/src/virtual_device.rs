//! In-process buffer-queue device.
//!
//! `VirtualDevice` implements [`AudioDevice`] without touching any hardware.
//! It follows the usual buffer-queue rules (FIFO consumption, processed
//! buffers stay attached until unqueued, stopping marks the whole queue
//! processed, an empty queue stops the source) and keeps enough
//! bookkeeping to check handle leaks and consumption order from outside.
//!
//! The device is a cheap cloneable handle: give one clone to the engine and
//! keep another to inspect or drive it.

use crate::device::{AudioDevice, BufferHandle, SourceHandle};
use cadence_core::config::frames_to_duration;
use cadence_core::{CadenceError, Result, SourceState, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maximum entries kept in the consumed-block log.
const CONSUMED_LOG_CAPACITY: usize = 4096;

/// Capacity of the processed-buffer event channel.
const EVENT_CAPACITY: usize = 256;

/// How queued buffers are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Consume buffers as wall-clock time passes, like a real device.
    Realtime,
    /// Consume buffers only through [`VirtualDevice::advance`].
    Manual,
}

/// Allocation and command counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCounters {
    pub buffers_created: usize,
    pub buffers_released: usize,
    pub sources_created: usize,
    pub sources_released: usize,
    pub uploads: usize,
    pub plays: usize,
    pub stops: usize,
}

struct VirtualSource {
    queue: VecDeque<BufferHandle>,
    processed: VecDeque<BufferHandle>,
    state: SourceState,
    /// Playback time already spent on the head of the queue.
    elapsed_in_head: Duration,
    last_tick: Instant,
}

impl VirtualSource {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            processed: VecDeque::new(),
            state: SourceState::Initial,
            elapsed_in_head: Duration::ZERO,
            last_tick: Instant::now(),
        }
    }

    fn holds(&self, buffer: BufferHandle) -> bool {
        self.queue.contains(&buffer) || self.processed.contains(&buffer)
    }
}

struct VirtualState {
    sample_rate: u32,
    channels: u16,
    clock: ClockMode,
    next_id: u32,
    buffers: HashMap<BufferHandle, Vec<f32>>,
    sources: HashMap<SourceHandle, VirtualSource>,
    counters: DeviceCounters,
    fail_buffers_after: Option<usize>,
    fail_source: bool,
    /// Successful uploads left before one fails.
    fail_upload_in: Option<usize>,
    fail_next_processed: bool,
    forced_state: Option<SourceState>,
    consumed_total: u64,
    consumed_log: VecDeque<f32>,
    events: Option<(Sender<()>, Receiver<()>)>,
}

impl VirtualState {
    fn block_duration(&self, buffer: BufferHandle) -> Duration {
        let samples = self.buffers.get(&buffer).map_or(0, Vec::len);
        frames_to_duration(samples / self.channels.max(1) as usize, self.sample_rate)
    }

    fn is_queued(&self, buffer: BufferHandle) -> bool {
        self.sources.values().any(|s| s.holds(buffer))
    }

    /// Move the head of `source`'s queue to its processed list.
    fn consume_head(&mut self, source: SourceHandle) -> bool {
        let Some(src) = self.sources.get_mut(&source) else {
            return false;
        };
        let Some(head) = src.queue.pop_front() else {
            return false;
        };
        src.processed.push_back(head);
        src.elapsed_in_head = Duration::ZERO;
        if src.queue.is_empty() {
            // Ran dry while playing: underrun.
            src.state = SourceState::Stopped;
        }

        let first = self
            .buffers
            .get(&head)
            .and_then(|data| data.first().copied())
            .unwrap_or(0.0);
        if self.consumed_log.len() == CONSUMED_LOG_CAPACITY {
            self.consumed_log.pop_front();
        }
        self.consumed_log.push_back(first);
        self.consumed_total += 1;

        if let Some((tx, _)) = &self.events {
            // Nobody drains the channel under polling; drop once full.
            let _ = tx.try_send(());
        }
        true
    }

    /// Consume whatever wall-clock time has paid for since the last tick.
    fn tick(&mut self) {
        if self.clock != ClockMode::Realtime {
            return;
        }
        let now = Instant::now();
        let handles: Vec<SourceHandle> = self.sources.keys().copied().collect();
        for handle in handles {
            let Some(src) = self.sources.get_mut(&handle) else {
                continue;
            };
            if src.state != SourceState::Playing {
                src.last_tick = now;
                continue;
            }
            let mut budget = src.elapsed_in_head + now.duration_since(src.last_tick);
            src.last_tick = now;

            loop {
                let Some(head) = self.sources.get(&handle).and_then(|s| s.queue.front().copied())
                else {
                    break;
                };
                let needed = self.block_duration(head);
                if budget < needed {
                    break;
                }
                budget -= needed;
                self.consume_head(handle);
            }

            if let Some(src) = self.sources.get_mut(&handle) {
                src.elapsed_in_head = if src.state == SourceState::Playing {
                    budget
                } else {
                    Duration::ZERO
                };
            }
        }
    }

    fn source_mut(&mut self, source: SourceHandle) -> Result<&mut VirtualSource> {
        self.sources
            .get_mut(&source)
            .ok_or_else(|| CadenceError::device("source", format!("unknown {source}")))
    }
}

/// Cloneable in-memory device; see the module docs.
#[derive(Clone)]
pub struct VirtualDevice {
    inner: Arc<Mutex<VirtualState>>,
}

impl VirtualDevice {
    /// Create a device that consumes buffers in real time.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self::with_clock(sample_rate, channels, ClockMode::Realtime)
    }

    /// Create a device that only consumes buffers when told to.
    pub fn manual(sample_rate: u32, channels: u16) -> Self {
        Self::with_clock(sample_rate, channels, ClockMode::Manual)
    }

    /// Create a device matching a stream configuration.
    pub fn for_config(config: &StreamConfig, clock: ClockMode) -> Self {
        Self::with_clock(config.sample_rate, config.channels, clock)
    }

    pub fn with_clock(sample_rate: u32, channels: u16, clock: ClockMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualState {
                sample_rate,
                channels,
                clock,
                next_id: 1,
                buffers: HashMap::new(),
                sources: HashMap::new(),
                counters: DeviceCounters::default(),
                fail_buffers_after: None,
                fail_source: false,
                fail_upload_in: None,
                fail_next_processed: false,
                forced_state: None,
                consumed_total: 0,
                consumed_log: VecDeque::new(),
                events: None,
            })),
        }
    }

    /// Publish a message on [`AudioDevice::processed_events`] for every
    /// consumed buffer, up to a bounded backlog.
    pub fn with_events(self) -> Self {
        self.inner.lock().events = Some(crossbeam_channel::bounded(EVENT_CAPACITY));
        self
    }

    // === Driving ===

    /// Consume up to `blocks` queued buffers on every playing source.
    /// Returns how many buffers were consumed in total.
    pub fn advance(&self, blocks: usize) -> usize {
        let mut state = self.inner.lock();
        let handles: Vec<SourceHandle> = state.sources.keys().copied().collect();
        let mut consumed = 0;
        for handle in handles {
            for _ in 0..blocks {
                let playing = state
                    .sources
                    .get(&handle)
                    .is_some_and(|s| s.state == SourceState::Playing);
                if !playing || !state.consume_head(handle) {
                    break;
                }
                consumed += 1;
            }
        }
        consumed
    }

    // === Fault injection ===

    /// Fail buffer allocation once `successes` buffers have been created.
    pub fn fail_buffer_allocation_after(&self, successes: usize) {
        self.inner.lock().fail_buffers_after = Some(successes);
    }

    /// Fail every source allocation.
    pub fn fail_source_allocation(&self) {
        self.inner.lock().fail_source = true;
    }

    /// Let `successes` more uploads through, then fail the next one. The
    /// fault fires once.
    pub fn fail_upload_after(&self, successes: usize) {
        self.inner.lock().fail_upload_in = Some(successes);
    }

    /// Fail the next processed-count query.
    pub fn fail_next_processed_query(&self) {
        self.inner.lock().fail_next_processed = true;
    }

    /// Override the state reported for every source (`None` clears it).
    pub fn force_state(&self, state: Option<SourceState>) {
        self.inner.lock().forced_state = state;
    }

    // === Inspection ===

    pub fn counters(&self) -> DeviceCounters {
        self.inner.lock().counters
    }

    /// Buffer handles allocated and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.inner.lock().buffers.len()
    }

    /// Source handles allocated and not yet released.
    pub fn live_sources(&self) -> usize {
        self.inner.lock().sources.len()
    }

    /// Buffers waiting to be played, across all sources.
    pub fn queued(&self) -> usize {
        let mut state = self.inner.lock();
        state.tick();
        state.sources.values().map(|s| s.queue.len()).sum()
    }

    /// Buffers consumed but not yet unqueued, across all sources.
    pub fn pending_processed(&self) -> usize {
        let mut state = self.inner.lock();
        state.tick();
        state.sources.values().map(|s| s.processed.len()).sum()
    }

    /// Total number of buffers consumed since creation.
    pub fn consumed_total(&self) -> u64 {
        let mut state = self.inner.lock();
        state.tick();
        state.consumed_total
    }

    /// First sample of each consumed buffer, oldest first (bounded).
    pub fn consumed_log(&self) -> Vec<f32> {
        let mut state = self.inner.lock();
        state.tick();
        state.consumed_log.iter().copied().collect()
    }

    /// Raw state of the only source, if one exists.
    pub fn raw_state(&self) -> Option<SourceState> {
        let mut state = self.inner.lock();
        state.tick();
        let forced = state.forced_state;
        state.sources.values().next().map(|s| forced.unwrap_or(s.state))
    }
}

impl AudioDevice for VirtualDevice {
    fn create_buffer(&mut self) -> Result<BufferHandle> {
        let mut state = self.inner.lock();
        if let Some(limit) = state.fail_buffers_after {
            if state.counters.buffers_created >= limit {
                return Err(CadenceError::DeviceResource(format!(
                    "buffer pool exhausted after {limit} buffers"
                )));
            }
        }
        let handle = BufferHandle(state.next_id);
        state.next_id += 1;
        state.buffers.insert(handle, Vec::new());
        state.counters.buffers_created += 1;
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        let mut state = self.inner.lock();
        if state.is_queued(buffer) {
            return Err(CadenceError::device(
                "release_buffer",
                format!("{buffer} is still queued"),
            ));
        }
        if state.buffers.remove(&buffer).is_none() {
            return Err(CadenceError::device(
                "release_buffer",
                format!("unknown {buffer}"),
            ));
        }
        state.counters.buffers_released += 1;
        Ok(())
    }

    fn create_source(&mut self) -> Result<SourceHandle> {
        let mut state = self.inner.lock();
        if state.fail_source {
            return Err(CadenceError::DeviceResource(
                "no free sources".to_string(),
            ));
        }
        let handle = SourceHandle(state.next_id);
        state.next_id += 1;
        state.sources.insert(handle, VirtualSource::new());
        state.counters.sources_created += 1;
        Ok(handle)
    }

    fn release_source(&mut self, source: SourceHandle) -> Result<()> {
        let mut state = self.inner.lock();
        if state.sources.remove(&source).is_none() {
            return Err(CadenceError::device(
                "release_source",
                format!("unknown {source}"),
            ));
        }
        state.counters.sources_released += 1;
        Ok(())
    }

    fn upload(
        &mut self,
        buffer: BufferHandle,
        samples: &[f32],
        channels: u16,
        sample_rate: u32,
    ) -> Result<()> {
        let mut state = self.inner.lock();
        if channels != state.channels || sample_rate != state.sample_rate {
            return Err(CadenceError::device(
                "upload",
                format!(
                    "format {}ch/{}Hz does not match device {}ch/{}Hz",
                    channels, sample_rate, state.channels, state.sample_rate
                ),
            ));
        }
        let fail_upload_in = state.fail_upload_in;
        match fail_upload_in {
            Some(0) => {
                state.fail_upload_in = None;
                return Err(CadenceError::device("upload", "device rejected upload"));
            }
            Some(left) => state.fail_upload_in = Some(left - 1),
            None => {}
        }
        if samples.is_empty() || samples.len() % channels as usize != 0 {
            return Err(CadenceError::device(
                "upload",
                format!("{} samples is not a whole number of frames", samples.len()),
            ));
        }
        if state.is_queued(buffer) {
            return Err(CadenceError::device(
                "upload",
                format!("{buffer} is owned by the playback queue"),
            ));
        }
        let data = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| CadenceError::device("upload", format!("unknown {buffer}")))?;
        data.clear();
        data.extend_from_slice(samples);
        state.counters.uploads += 1;
        Ok(())
    }

    fn queue(&mut self, source: SourceHandle, buffer: BufferHandle) -> Result<()> {
        let mut state = self.inner.lock();
        state.tick();
        match state.buffers.get(&buffer) {
            None => {
                return Err(CadenceError::device("queue", format!("unknown {buffer}")));
            }
            Some(data) if data.is_empty() => {
                return Err(CadenceError::device(
                    "queue",
                    format!("{buffer} has no data"),
                ));
            }
            Some(_) => {}
        }
        if state.is_queued(buffer) {
            return Err(CadenceError::device(
                "queue",
                format!("{buffer} is already queued"),
            ));
        }
        state.source_mut(source)?.queue.push_back(buffer);
        Ok(())
    }

    fn unqueue(&mut self, source: SourceHandle) -> Result<BufferHandle> {
        let mut state = self.inner.lock();
        state.tick();
        state
            .source_mut(source)?
            .processed
            .pop_front()
            .ok_or_else(|| CadenceError::device("unqueue", "no processed buffers"))
    }

    fn processed(&mut self, source: SourceHandle) -> Result<usize> {
        let mut state = self.inner.lock();
        if state.fail_next_processed {
            state.fail_next_processed = false;
            return Err(CadenceError::device("processed", "device lost"));
        }
        state.tick();
        Ok(state.source_mut(source)?.processed.len())
    }

    fn source_state(&mut self, source: SourceHandle) -> Result<SourceState> {
        let mut state = self.inner.lock();
        state.tick();
        let forced = state.forced_state;
        let actual = state.source_mut(source)?.state;
        Ok(forced.unwrap_or(actual))
    }

    fn play(&mut self, source: SourceHandle) -> Result<()> {
        let mut state = self.inner.lock();
        state.tick();
        state.counters.plays += 1;
        let src = state.source_mut(source)?;
        if src.state == SourceState::Playing {
            return Ok(());
        }
        if src.queue.is_empty() {
            src.state = SourceState::Stopped;
        } else {
            src.state = SourceState::Playing;
            src.elapsed_in_head = Duration::ZERO;
            src.last_tick = Instant::now();
        }
        Ok(())
    }

    fn stop(&mut self, source: SourceHandle) -> Result<()> {
        let mut state = self.inner.lock();
        state.tick();
        state.counters.stops += 1;
        let src = state.source_mut(source)?;
        src.state = SourceState::Stopped;
        src.elapsed_in_head = Duration::ZERO;
        let drained: Vec<BufferHandle> = src.queue.drain(..).collect();
        src.processed.extend(drained);
        Ok(())
    }

    fn processed_events(&self) -> Option<Receiver<()>> {
        self.inner.lock().events.as_ref().map(|(_, rx)| rx.clone())
    }

    fn name(&self) -> &'static str {
        "virtual"
    }
}
