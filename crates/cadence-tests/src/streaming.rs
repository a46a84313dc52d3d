//! Steady-state streaming against the virtual device.

use crate::support::{call_log, small_config, wait_until, Recorder};
use cadence_audio::{ClockMode, EngineOptions, FillTrigger, StreamEngine, VirtualDevice};
use cadence_core::{PlaybackState, StreamConfig};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);

#[test]
fn priming_queues_buffer_count_blocks() {
    let config = StreamConfig::new(44100, 2, 200, 2048).unwrap();
    let device = VirtualDevice::for_config(&config, ClockMode::Manual);
    let log = call_log();
    let mut engine = StreamEngine::new(device.clone(), config).unwrap();
    assert_eq!(engine.buffer_count(), 5);

    engine.start(Recorder::new('a', &log)).unwrap();

    assert_eq!(device.queued(), 5);
    assert_eq!(log.lock().len(), 5);
    assert_eq!(engine.stats().producer_calls, 5);
    assert_eq!(device.counters().uploads, 5);
    assert_eq!(device.counters().plays, 1);
    assert_eq!(engine.state().unwrap(), PlaybackState::Playing);
    // Priming runs on the caller's thread, before the fill thread exists.
    let caller = std::thread::current().name().map(str::to_string);
    assert!(log.lock().iter().all(|call| call.thread == caller));
}

#[test]
fn consumed_blocks_are_refilled_in_order() {
    let device = VirtualDevice::manual(48000, 2);
    let log = call_log();
    let mut engine = StreamEngine::new(device.clone(), small_config()).unwrap();
    engine.start(Recorder::new('a', &log)).unwrap();

    for _ in 0..12 {
        assert_eq!(device.advance(1), 1);
        assert!(wait_until(TIMEOUT, || device.queued() == 4));
    }
    engine.stop().unwrap();

    let expected: Vec<f32> = (0..12).map(|i| i as f32).collect();
    assert_eq!(device.consumed_log(), expected);
    assert_eq!(engine.stats().refills, 12);
    assert_eq!(engine.stats().underrun_recoveries, 0);
    assert_eq!(device.counters().uploads, 16);
    assert_eq!(device.counters().plays, 1);

    // Every refill ran on the fill thread.
    let log = log.lock();
    assert_eq!(log.len(), 16);
    assert!(log[4..]
        .iter()
        .all(|call| call.thread.as_deref() == Some("cadence-fill")));
}

#[test]
fn realtime_stream_keeps_device_fed() {
    let config = small_config();
    let device = VirtualDevice::for_config(&config, ClockMode::Realtime);
    let mut engine = StreamEngine::new(device.clone(), config).unwrap();
    engine.start(cadence_audio::Silence).unwrap();

    assert!(wait_until(TIMEOUT, || engine.stats().refills >= 10));
    engine.stop().unwrap();

    let stats = engine.stats();
    assert_eq!(stats.producer_calls, 4 + stats.refills);
    // Only consumed buffers are ever refilled.
    assert!(device.consumed_total() >= stats.refills);
    assert_eq!(device.queued(), 0);
    assert_eq!(device.pending_processed(), 0);
}

#[test]
fn stalled_producer_recovers_from_underrun() {
    let config = small_config();
    let device = VirtualDevice::for_config(&config, ClockMode::Realtime);
    let log = call_log();
    let mut engine = StreamEngine::new(device.clone(), config).unwrap();

    // 120 ms stall against 40 ms of queued audio empties the queue.
    engine
        .start(Recorder::new('a', &log).stall_on(6, Duration::from_millis(120)))
        .unwrap();

    assert!(wait_until(TIMEOUT, || engine.stats().underrun_recoveries >= 1));
    // Initial play plus one per recovery.
    let recoveries = engine.stats().underrun_recoveries;
    assert!(device.counters().plays as u64 >= 1 + recoveries);
    let refills_after_recovery = engine.stats().refills;
    assert!(wait_until(TIMEOUT, || {
        engine.stats().refills >= refills_after_recovery + 10
    }));
    assert!(wait_until(TIMEOUT, || {
        engine.state().ok() == Some(PlaybackState::Playing)
    }));
    assert!(!engine.session_finished());

    engine.stop().unwrap();
}

#[test]
fn notify_trigger_refills_on_device_events() {
    let device = VirtualDevice::manual(48000, 2).with_events();
    let options = EngineOptions {
        // Long fallback: a prompt refill can only come from the event.
        trigger: FillTrigger::Notify {
            fallback: Duration::from_secs(5),
        },
    };
    let mut engine = StreamEngine::with_options(device.clone(), small_config(), options).unwrap();
    engine.start(cadence_audio::Silence).unwrap();
    // Let the first iteration run and park on the channel.
    assert!(wait_until(TIMEOUT, || engine.stats().iterations >= 1));

    device.advance(2);
    assert!(wait_until(Duration::from_secs(1), || device.queued() == 4));
    assert_eq!(engine.stats().refills, 2);

    // Stopping wakes the parked loop instead of waiting out the fallback.
    let started = Instant::now();
    engine.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(device.queued(), 0);
}

#[test]
fn notify_trigger_without_events_falls_back_to_polling() {
    let device = VirtualDevice::manual(48000, 2);
    let options = EngineOptions {
        trigger: FillTrigger::Notify {
            fallback: Duration::from_millis(1),
        },
    };
    let mut engine = StreamEngine::with_options(device.clone(), small_config(), options).unwrap();
    engine.start(cadence_audio::Silence).unwrap();

    device.advance(3);
    assert!(wait_until(TIMEOUT, || device.queued() == 4));
    engine.stop().unwrap();
}
