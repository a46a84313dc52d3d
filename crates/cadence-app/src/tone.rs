//! Sine tone producer.

use cadence_audio::Producer;
use std::f32::consts::TAU;

/// Writes the same sine wave to every channel.
pub struct Tone {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    channels: usize,
    phase: f32,
}

impl Tone {
    pub fn new(frequency: f32, amplitude: f32, sample_rate: u32, channels: u16) -> Self {
        Self {
            frequency,
            amplitude,
            sample_rate,
            channels: channels.max(1) as usize,
            phase: 0.0,
        }
    }
}

impl Producer for Tone {
    fn fill(&mut self, out: &mut [f32]) {
        let step = TAU * self.frequency / self.sample_rate as f32;
        for frame in out.chunks_mut(self.channels) {
            frame.fill(self.phase.sin() * self.amplitude);
            self.phase = (self.phase + step) % TAU;
        }
    }
}
