//! Shared helpers for the integration tests.

use cadence_audio::Producer;
use cadence_core::StreamConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 48 kHz stereo, 10 ms blocks, 40 ms latency: four buffers.
pub fn small_config() -> StreamConfig {
    StreamConfig::new(48000, 2, 40, 480).unwrap()
}

/// One recorded producer invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub tag: char,
    pub at: Instant,
    pub thread: Option<String>,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Producer that logs each call and fills the block with its sequence
/// number, so consumed blocks can be matched to calls.
pub struct Recorder {
    tag: char,
    log: CallLog,
    sequence: u32,
    stall: Option<(u32, Duration)>,
}

impl Recorder {
    pub fn new(tag: char, log: &CallLog) -> Self {
        Self {
            tag,
            log: Arc::clone(log),
            sequence: 0,
            stall: None,
        }
    }

    /// Sleep for `duration` inside call number `call` (zero-based), once.
    pub fn stall_on(mut self, call: u32, duration: Duration) -> Self {
        self.stall = Some((call, duration));
        self
    }
}

impl Producer for Recorder {
    fn fill(&mut self, out: &mut [f32]) {
        self.log.lock().push(Call {
            tag: self.tag,
            at: Instant::now(),
            thread: std::thread::current().name().map(str::to_string),
        });
        if let Some((call, duration)) = self.stall {
            if call == self.sequence {
                std::thread::sleep(duration);
            }
        }
        out.fill(self.sequence as f32);
        self.sequence += 1;
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
