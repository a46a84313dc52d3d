//! Cadence - tone streaming demo
//!
//! Usage: `cadence [seconds] [frequency-hz]`
//!
//! Streams a sine tone through the engine, switching to a fifth above
//! halfway through. Without the `cpal` feature the output goes to an
//! in-process device that consumes audio in real time.

mod tone;

use anyhow::{Context, Result};
use cadence_audio::{EngineOptions, FillTrigger, StreamEngine};
use cadence_core::StreamConfig;
use std::time::Duration;
use tone::Tone;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let seconds: f64 = match args.next() {
        Some(arg) => arg.parse().context("seconds must be a number")?,
        None => 4.0,
    };
    let frequency: f32 = match args.next() {
        Some(arg) => arg.parse().context("frequency must be a number")?,
        None => 440.0,
    };

    let config = StreamConfig::default();
    info!(
        "Cadence starting: {:.1}s of {} Hz, {} buffers ({:?} queued)",
        seconds,
        frequency,
        config.buffer_count(),
        config.queued_duration()
    );

    let half = Duration::from_secs_f64(seconds.max(0.0) / 2.0);

    #[cfg(feature = "cpal")]
    let stats = {
        let device = cadence_audio::CpalDevice::open(&config)?;
        let options = EngineOptions {
            trigger: FillTrigger::Notify {
                fallback: Duration::from_millis(5),
            },
        };
        run(StreamEngine::with_options(device, config, options)?, &config, frequency, half)?
    };

    #[cfg(not(feature = "cpal"))]
    let stats = {
        let device =
            cadence_audio::VirtualDevice::for_config(&config, cadence_audio::ClockMode::Realtime);
        let options = EngineOptions {
            trigger: FillTrigger::default(),
        };
        run(StreamEngine::with_options(device, config, options)?, &config, frequency, half)?
    };

    info!(
        "Done: {} sessions, {} producer calls, {} refills, {} underrun recoveries",
        stats.sessions, stats.producer_calls, stats.refills, stats.underrun_recoveries
    );
    Ok(())
}

fn run<D: cadence_audio::AudioDevice>(
    mut engine: StreamEngine<D>,
    config: &StreamConfig,
    frequency: f32,
    half: Duration,
) -> Result<cadence_audio::StreamStats> {
    engine.start(Tone::new(frequency, 0.2, config.sample_rate, config.channels))?;
    std::thread::sleep(half);

    // Perfect fifth above the first tone.
    engine.start(Tone::new(frequency * 1.5, 0.2, config.sample_rate, config.channels))?;
    std::thread::sleep(half);

    engine.stop()?;
    let stats = engine.stats();
    engine.dispose()?;
    Ok(stats)
}
