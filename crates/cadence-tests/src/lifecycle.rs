//! Start/stop/replace/dispose behaviour of the stream engine.

use crate::support::{call_log, small_config, wait_until, Recorder};
use cadence_audio::{ClockMode, Silence, StreamEngine, VirtualDevice};
use cadence_core::{CadenceError, PlaybackState, SourceState, StreamConfig};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);

fn realtime() -> (VirtualDevice, StreamEngine<VirtualDevice>) {
    let config = small_config();
    let device = VirtualDevice::for_config(&config, ClockMode::Realtime);
    let engine = StreamEngine::new(device.clone(), config).unwrap();
    (device, engine)
}

#[test]
fn no_producer_call_after_stop_returns() {
    let (device, mut engine) = realtime();
    let log = call_log();
    engine.start(Recorder::new('a', &log)).unwrap();
    assert!(wait_until(TIMEOUT, || log.lock().len() >= 8));

    engine.stop().unwrap();
    let stopped_at = Instant::now();
    let calls_at_stop = log.lock().len();

    std::thread::sleep(Duration::from_millis(30));
    let log = log.lock();
    assert_eq!(log.len(), calls_at_stop);
    assert!(log.iter().all(|call| call.at < stopped_at));
    assert_eq!(engine.state().unwrap(), PlaybackState::Stopped);
    assert_eq!(device.queued(), 0);
    assert_eq!(device.pending_processed(), 0);
}

#[test]
fn replacing_producer_never_interleaves() {
    let (_device, mut engine) = realtime();
    let log = call_log();

    engine.start(Recorder::new('a', &log)).unwrap();
    assert!(wait_until(TIMEOUT, || log.lock().len() >= 8));
    engine.start(Recorder::new('b', &log)).unwrap();
    assert!(wait_until(TIMEOUT, || {
        log.lock().iter().filter(|call| call.tag == 'b').count() >= 8
    }));
    engine.stop().unwrap();

    let log = log.lock();
    let first_b = log.iter().position(|call| call.tag == 'b').unwrap();
    assert!(first_b >= 8);
    assert!(log[first_b..].iter().all(|call| call.tag == 'b'));
    assert_eq!(engine.stats().sessions, 2);
}

#[test]
fn replacement_primes_a_fresh_queue() {
    let device = VirtualDevice::manual(48000, 2);
    let mut engine = StreamEngine::new(device.clone(), small_config()).unwrap();
    let log = call_log();

    engine.start(Recorder::new('a', &log)).unwrap();
    device.advance(2);
    assert!(wait_until(TIMEOUT, || device.queued() == 4));

    engine.start(Recorder::new('b', &log)).unwrap();
    // Old queue fully drained, new one primed with exactly buffer_count blocks.
    assert_eq!(device.queued(), 4);
    assert_eq!(device.pending_processed(), 0);
    assert_eq!(log.lock().iter().filter(|call| call.tag == 'b').count(), 4);
    engine.stop().unwrap();
}

#[test]
fn restart_after_stop() {
    let device = VirtualDevice::manual(48000, 2);
    let mut engine = StreamEngine::new(device.clone(), small_config()).unwrap();

    engine.start(Silence).unwrap();
    engine.stop().unwrap();
    engine.start(Silence).unwrap();

    assert_eq!(device.queued(), 4);
    assert_eq!(engine.state().unwrap(), PlaybackState::Playing);
    assert_eq!(engine.stats().producer_calls, 8);
    engine.stop().unwrap();
}

#[test]
fn dispose_twice_releases_everything_once() {
    let (device, mut engine) = realtime();
    engine.start(Silence).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    engine.dispose().unwrap();
    engine.dispose().unwrap();
    drop(engine);

    let counters = device.counters();
    assert_eq!(counters.buffers_created, 4);
    assert_eq!(counters.buffers_released, 4);
    assert_eq!(counters.sources_created, 1);
    assert_eq!(counters.sources_released, 1);
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_sources(), 0);
}

#[test]
fn stop_on_never_started_engine_is_noop() {
    let device = VirtualDevice::manual(48000, 2);
    let mut engine = StreamEngine::new(device.clone(), small_config()).unwrap();
    engine.stop().unwrap();
    engine.stop().unwrap();
    assert_eq!(engine.state().unwrap(), PlaybackState::Stopped);
    assert_eq!(device.counters().stops, 0);
}

#[test]
fn disposed_engine_rejects_operations() {
    let device = VirtualDevice::manual(48000, 2);
    let mut engine = StreamEngine::new(device, small_config()).unwrap();
    engine.dispose().unwrap();

    assert!(engine.is_disposed());
    assert_eq!(engine.start(Silence), Err(CadenceError::Disposed));
    assert_eq!(engine.stop(), Err(CadenceError::Disposed));
    assert_eq!(engine.state(), Err(CadenceError::Disposed));
}

#[test]
fn invalid_configurations_allocate_nothing() {
    let valid = small_config();
    let invalid = [
        StreamConfig { channels: 3, ..valid },
        StreamConfig { block_frames: 4, ..valid },
        StreamConfig { sample_rate: 0, ..valid },
        StreamConfig { latency_ms: 0, ..valid },
    ];
    for config in invalid {
        let device = VirtualDevice::manual(48000, 2);
        let err = StreamEngine::new(device.clone(), config).err().unwrap();
        assert!(err.is_configuration(), "{config:?} gave {err}");
        assert_eq!(device.counters().buffers_created, 0);
        assert_eq!(device.counters().sources_created, 0);
    }
}

#[test]
fn failed_allocation_releases_partial_ring() {
    let device = VirtualDevice::manual(48000, 2);
    device.fail_buffer_allocation_after(3);
    let err = StreamEngine::new(device.clone(), small_config()).err().unwrap();
    assert!(matches!(err, CadenceError::DeviceResource(_)));
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_sources(), 0);
    assert_eq!(device.counters().buffers_released, 3);

    let device = VirtualDevice::manual(48000, 2);
    device.fail_source_allocation();
    let err = StreamEngine::new(device.clone(), small_config()).err().unwrap();
    assert!(matches!(err, CadenceError::DeviceResource(_)));
    assert_eq!(device.counters().buffers_created, 0);
}

#[test]
fn device_failure_ends_session_and_surfaces_on_stop() {
    let device = VirtualDevice::manual(48000, 2);
    let mut engine = StreamEngine::new(device.clone(), small_config()).unwrap();
    engine.start(Silence).unwrap();

    device.fail_next_processed_query();
    assert!(wait_until(TIMEOUT, || engine.session_finished()));
    // The failed session already stopped the device and drained its queue.
    assert_eq!(device.queued(), 0);
    assert_eq!(device.pending_processed(), 0);

    let err = engine.stop().unwrap_err();
    assert!(matches!(err, CadenceError::Device { op: "processed", .. }));
    assert!(!engine.is_session_active());

    // The engine is still usable.
    engine.start(Silence).unwrap();
    assert_eq!(engine.state().unwrap(), PlaybackState::Playing);
    engine.stop().unwrap();
}

#[test]
fn replacing_failed_session_keeps_its_error() {
    let device = VirtualDevice::manual(48000, 2);
    let mut engine = StreamEngine::new(device.clone(), small_config()).unwrap();
    engine.start(Silence).unwrap();

    device.fail_next_processed_query();
    assert!(wait_until(TIMEOUT, || engine.session_finished()));

    engine.start(Silence).unwrap();
    let displaced = engine.take_session_error();
    assert!(matches!(displaced, Some(CadenceError::Device { .. })));
    assert!(engine.take_session_error().is_none());
    engine.stop().unwrap();
}

#[test]
fn unrecognized_device_state_is_an_error() {
    let device = VirtualDevice::manual(48000, 2);
    let engine = StreamEngine::new(device.clone(), small_config()).unwrap();
    device.force_state(Some(SourceState::Unknown(0x4242)));

    let err = engine.state().unwrap_err();
    assert!(matches!(err, CadenceError::DeviceState(_)));

    device.force_state(Some(SourceState::Paused));
    assert_eq!(engine.state().unwrap(), PlaybackState::Paused);
}

#[test]
fn producer_panic_during_priming_leaves_engine_usable() {
    let device = VirtualDevice::manual(48000, 2);
    let mut engine = StreamEngine::new(device.clone(), small_config()).unwrap();
    let mut calls = 0;
    let err = engine
        .start(move |out: &mut [f32]| {
            calls += 1;
            if calls == 3 {
                panic!("synth failed to load");
            }
            out.fill(0.0);
        })
        .unwrap_err();

    assert_eq!(err, CadenceError::SessionPanicked("synth failed to load".to_string()));
    assert!(!engine.is_session_active());
    assert_eq!(device.queued(), 0);
    assert_eq!(device.pending_processed(), 0);

    engine.start(Silence).unwrap();
    assert_eq!(device.queued(), 4);
    assert_eq!(engine.state().unwrap(), PlaybackState::Playing);
    engine.stop().unwrap();
}

#[test]
fn failed_priming_drains_queue_and_engine_restarts() {
    let device = VirtualDevice::manual(48000, 2);
    let mut engine = StreamEngine::new(device.clone(), small_config()).unwrap();
    device.fail_upload_after(2);

    let err = engine.start(Silence).unwrap_err();
    assert!(matches!(err, CadenceError::Device { op: "upload", .. }));
    assert!(!engine.is_session_active());
    assert_eq!(device.queued(), 0);
    assert_eq!(device.pending_processed(), 0);
    assert_eq!(device.counters().plays, 0);
    assert_eq!(engine.stats().sessions, 0);

    engine.start(Silence).unwrap();
    assert_eq!(device.queued(), 4);
    assert_eq!(engine.state().unwrap(), PlaybackState::Playing);
    assert_eq!(engine.stats().sessions, 1);
    engine.stop().unwrap();
}
