//! Lifecycle controller.
//!
//! `StreamEngine` owns the device and the buffer ring for its whole life
//! and runs at most one streaming session at a time:
//!
//! ```text
//! Stopped --start--> Playing --stop--> Stopped
//! Playing --start--> Playing   (old session joined before the new one primes)
//! any     --dispose-> Disposed (terminal)
//! ```
//!
//! Stopping joins the fill thread before returning, so once `stop` returns
//! the producer is not running and will not be called again.

use crate::buffer_ring::BufferRing;
use crate::device::{AudioDevice, SourceHandle};
use crate::producer::Producer;
use crate::scheduler::{CancelToken, FillScheduler, FillTrigger, StreamCore};
use crate::stats::StreamStats;
use cadence_core::{CadenceError, PlaybackState, Result, StreamConfig};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Engine tuning that does not affect the audio format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// How the fill thread waits between iterations.
    pub trigger: FillTrigger,
}

struct Session {
    id: u64,
    cancel: CancelToken,
    handle: JoinHandle<Result<()>>,
}

/// Streams audio from a [`Producer`] into an [`AudioDevice`].
pub struct StreamEngine<D: AudioDevice> {
    config: StreamConfig,
    options: EngineOptions,
    core: Arc<StreamCore<D>>,
    source: SourceHandle,
    session: Option<Session>,
    displaced_error: Option<CadenceError>,
    sessions_started: u64,
    disposed: bool,
}

impl<D: AudioDevice> StreamEngine<D> {
    /// Create an engine with default options.
    pub fn new(device: D, config: StreamConfig) -> Result<Self> {
        Self::with_options(device, config, EngineOptions::default())
    }

    /// Validate `config` and allocate the buffer ring on `device`.
    ///
    /// Nothing is allocated if the configuration is invalid, and a failed
    /// allocation releases whatever it had already obtained.
    pub fn with_options(mut device: D, config: StreamConfig, options: EngineOptions) -> Result<Self> {
        config.validate()?;
        let ring = BufferRing::initialize(&mut device, &config)?;
        let source = ring.source();

        info!(
            "Stream engine ready on {}: {} Hz, {} ch, {} buffers x {} frames",
            device.name(),
            config.sample_rate,
            config.channels,
            config.buffer_count(),
            config.block_frames
        );

        Ok(Self {
            config,
            options,
            core: Arc::new(StreamCore::new(device, ring)),
            source,
            session: None,
            displaced_error: None,
            sessions_started: 0,
            disposed: false,
        })
    }

    /// Start streaming from `producer`, replacing any running session.
    ///
    /// A running session is cancelled and joined first; if it had failed,
    /// its error is kept for [`take_session_error`](Self::take_session_error).
    /// Returns once playback has been issued.
    pub fn start<P: Producer>(&mut self, producer: P) -> Result<()> {
        self.start_boxed(Box::new(producer))
    }

    /// [`start`](Self::start) for an already boxed producer.
    pub fn start_boxed(&mut self, mut producer: Box<dyn Producer>) -> Result<()> {
        self.ensure_live()?;
        if let Err(e) = self.end_session() {
            warn!("Replaced session had failed: {}", e);
            self.displaced_error = Some(e);
        }

        // Priming runs the producer on this thread; a panic there must not
        // leave buffers queued for the next start.
        let primed = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut ring = self.core.ring.lock();
            let mut device = self.core.device.lock();
            ring.prime_and_queue(&mut *device, &mut *producer)
                .and_then(|primed| device.play(self.source).map(|()| primed))
        }))
        .unwrap_or_else(|payload| {
            Err(CadenceError::SessionPanicked(panic_message(payload.as_ref())))
        });
        let primed = match primed {
            Ok(primed) => primed,
            Err(e) => {
                self.abandon_priming();
                return Err(e);
            }
        };
        self.core.counters.producer_called_times(primed as u64);

        let cancel = CancelToken::new();
        let scheduler = FillScheduler::new(
            Arc::clone(&self.core),
            self.source,
            producer,
            cancel.clone(),
            self.options.trigger,
        );
        let handle = match scheduler.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                self.abandon_priming();
                return Err(e);
            }
        };

        self.sessions_started += 1;
        self.core.counters.session_started();
        let id = self.sessions_started;
        self.session = Some(Session { id, cancel, handle });
        info!("Session {} started with {} primed buffers", id, primed);
        Ok(())
    }

    /// Stop the running session, if any, and wait for its fill thread.
    ///
    /// Returns the error that ended the session if the fill thread failed.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.end_session()
    }

    /// Stop, then release every device handle. Further calls are no-ops;
    /// every other operation fails with `CadenceError::Disposed` afterwards.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let session = self.end_session();
        let teardown = {
            let mut ring = self.core.ring.lock();
            let mut device = self.core.device.lock();
            ring.teardown(&mut *device)
        };
        info!("Stream engine disposed");
        session.and(teardown)
    }

    /// Playback state as reported by the device.
    pub fn state(&self) -> Result<PlaybackState> {
        self.ensure_live()?;
        let raw = self.core.device.lock().source_state(self.source)?;
        PlaybackState::try_from(raw)
    }

    /// Whether a session is running (or ended on its own and not yet stopped).
    pub fn is_session_active(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the current session's fill thread has already exited, which
    /// only happens when it failed. `stop` returns the failure.
    pub fn session_finished(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.handle.is_finished())
    }

    /// Error of a failed session that was replaced by `start`.
    pub fn take_session_error(&mut self) -> Option<CadenceError> {
        self.displaced_error.take()
    }

    pub fn stats(&self) -> StreamStats {
        self.core.counters.snapshot()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn buffer_count(&self) -> usize {
        self.config.buffer_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(CadenceError::Disposed)
        } else {
            Ok(())
        }
    }

    fn end_session(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session.cancel.cancel();
        let outcome = match session.handle.join() {
            Ok(result) => result,
            Err(payload) => {
                // The thread unwound without running its own shutdown.
                if let Err(e) = self.core.halt_and_drain() {
                    warn!("Cleanup after fill thread panic failed: {}", e);
                }
                Err(CadenceError::SessionPanicked(panic_message(payload.as_ref())))
            }
        };
        info!("Session {} stopped", session.id);
        outcome
    }

    /// Undo a partially primed start so the queue is empty again.
    fn abandon_priming(&self) {
        match self.core.halt_and_drain() {
            Ok(drained) => debug!("Abandoned start, drained {} buffers", drained),
            Err(e) => warn!("Failed to drain queue after aborted start: {}", e),
        }
    }
}

impl<D: AudioDevice> Drop for StreamEngine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!("Error while dropping stream engine: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
