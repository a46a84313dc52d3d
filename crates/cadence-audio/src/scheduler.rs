//! Fill scheduler: keeps the device queue topped up for one session.
//!
//! Each iteration unqueues every buffer the device reports as processed,
//! refills it from the producer and queues it again, then restarts playback
//! if the device ran dry. Between iterations the thread idles, either for a
//! fixed interval or until the device signals a processed buffer.
//!
//! Cancellation is checked once per iteration, so a refill that has started
//! always finishes before the loop exits. On exit the source is stopped and
//! the queue drained, ready for the next session to prime it.

use crate::buffer_ring::BufferRing;
use crate::device::{AudioDevice, SourceHandle};
use crate::producer::Producer;
use crate::stats::StreamCounters;
use cadence_core::{CadenceError, PlaybackState, Result};
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Idle time between fill iterations.
pub const DEFAULT_IDLE: Duration = Duration::from_millis(1);

/// Name given to fill threads.
pub const FILL_THREAD_NAME: &str = "cadence-fill";

/// What wakes the fill loop between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillTrigger {
    /// Sleep for `interval`, then poll the device.
    Poll { interval: Duration },
    /// Wait for a processed-buffer event from the device, at most `fallback`.
    Notify { fallback: Duration },
}

impl Default for FillTrigger {
    fn default() -> Self {
        Self::Poll {
            interval: DEFAULT_IDLE,
        }
    }
}

/// Handle for cancelling a running fill loop.
///
/// Besides setting the flag, `cancel` wakes a loop that is idling so that
/// stopping never waits out a full idle interval.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CancelToken {
    /// Create a new token.
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Block for at most `timeout`, returning early on cancellation.
    pub fn wait_timeout(&self, timeout: Duration) {
        let _ = self.wake_rx.recv_timeout(timeout);
    }

    fn wake_signal(&self) -> &Receiver<()> {
        &self.wake_rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by the controller and the fill thread.
///
/// Lock order is `ring` before `device`. The controller only takes `ring`
/// while no fill thread is running.
pub struct StreamCore<D: AudioDevice> {
    pub device: Mutex<D>,
    pub ring: Mutex<BufferRing>,
    pub counters: StreamCounters,
}

impl<D: AudioDevice> StreamCore<D> {
    pub fn new(device: D, ring: BufferRing) -> Self {
        Self {
            device: Mutex::new(device),
            ring: Mutex::new(ring),
            counters: StreamCounters::default(),
        }
    }

    /// Stop the source and unqueue everything it has processed.
    pub fn halt_and_drain(&self) -> Result<usize> {
        let ring = self.ring.lock();
        let mut device = self.device.lock();
        device.stop(ring.source())?;
        ring.drain_processed(&mut *device)
    }
}

enum Idle {
    Sleep(Duration),
    Events {
        events: Receiver<()>,
        fallback: Duration,
    },
}

impl Idle {
    fn wait(&self, cancel: &CancelToken) {
        match self {
            Self::Sleep(interval) => cancel.wait_timeout(*interval),
            Self::Events { events, fallback } => select! {
                recv(events) -> event => match event {
                    // Each iteration handles every processed buffer, so extra
                    // queued events carry no information.
                    Ok(()) => while events.try_recv().is_ok() {},
                    Err(_) => cancel.wait_timeout(*fallback),
                },
                recv(cancel.wake_signal()) -> _ => {}
                default(*fallback) => {}
            },
        }
    }
}

/// One session's fill loop.
pub struct FillScheduler<D: AudioDevice> {
    core: Arc<StreamCore<D>>,
    source: SourceHandle,
    producer: Box<dyn Producer>,
    cancel: CancelToken,
    trigger: FillTrigger,
}

impl<D: AudioDevice> FillScheduler<D> {
    pub fn new(
        core: Arc<StreamCore<D>>,
        source: SourceHandle,
        producer: Box<dyn Producer>,
        cancel: CancelToken,
        trigger: FillTrigger,
    ) -> Self {
        Self {
            core,
            source,
            producer,
            cancel,
            trigger,
        }
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name(FILL_THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(|e| CadenceError::DeviceResource(format!("failed to spawn fill thread: {e}")))
    }

    /// Run the loop on the current thread until cancelled or a device
    /// operation fails.
    pub fn run(mut self) -> Result<()> {
        let idle = self.idle();
        let outcome = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }
            if let Err(e) = self.iterate() {
                break Err(e);
            }
            idle.wait(&self.cancel);
        };

        match outcome {
            Ok(()) => {
                let drained = self.core.halt_and_drain()?;
                debug!("Fill loop cancelled, drained {} buffers", drained);
                Ok(())
            }
            Err(e) => {
                error!("Fill loop failed, ending session: {}", e);
                if let Err(cleanup) = self.core.halt_and_drain() {
                    warn!("Cleanup after failed session also failed: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// One pass: refill processed buffers, then recover from underrun.
    fn iterate(&mut self) -> Result<()> {
        let counters = &self.core.counters;
        counters.iteration();

        let processed = self.core.device.lock().processed(self.source)?;
        if processed > 0 {
            let mut ring = self.core.ring.lock();
            for _ in 0..processed {
                ring.fill(&mut *self.producer);
                counters.producer_called();
                let mut device = self.core.device.lock();
                ring.recycle_staged(&mut *device)?;
                counters.refilled();
            }
        }

        let mut device = self.core.device.lock();
        let state = device.source_state(self.source)?;
        // Rejects states the backend could not classify.
        PlaybackState::try_from(state)?;
        if state.is_halted() && !self.cancel.is_cancelled() {
            device.play(self.source)?;
            counters.underrun_recovered();
            warn!("Device queue ran dry on {}, playback restarted", device.name());
        }
        Ok(())
    }

    fn idle(&self) -> Idle {
        match self.trigger {
            FillTrigger::Poll { interval } => Idle::Sleep(interval),
            FillTrigger::Notify { fallback } => match self.core.device.lock().processed_events() {
                Some(events) => Idle::Events { events, fallback },
                None => {
                    warn!("Device has no processed-buffer events, polling instead");
                    Idle::Sleep(fallback)
                }
            },
        }
    }
}
