//! Synthetic capture backend for running without hardware.
//!
//! A paced generator thread stands in for the host stream: every half
//! buffer it delivers a chunk of a sine tone through the same callback path
//! the cpal backend uses, so the whole pipeline runs as it would on a real
//! device.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::driver::{CaptureBackend, DriverFlags, StreamControl, StreamIntake};
use crate::audio::pipeline::CaptureStage;
use crate::config::SessionConfig;
use crate::error::AudioError;

/// Sine tone generator
#[derive(Debug, Clone)]
pub struct SineTone {
    sample_rate: u32,
    frequency: f64,
    amplitude: f64,
    position: u64,
}

impl SineTone {
    pub fn new(sample_rate: u32, frequency: f64, amplitude: f64) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            position: 0,
        }
    }

    /// Next `count` samples of the tone, continuing where the last call ended.
    pub fn next_chunk(&mut self, count: usize) -> Vec<i16> {
        let sample_rate = f64::from(self.sample_rate);
        let chunk = (0..count as u64)
            .map(|i| {
                let t = (self.position + i) as f64 / sample_rate;
                let value = (2.0 * std::f64::consts::PI * self.frequency * t).sin();
                (value * self.amplitude * 32767.0) as i16
            })
            .collect();
        self.position += count as u64;
        chunk
    }
}

/// Capture backend that produces a tone in real time
pub struct SyntheticBackend {
    frequency: f64,
    amplitude: f64,
    prepared: Option<(SessionConfig, Arc<DriverFlags>)>,
}

impl SyntheticBackend {
    pub fn new(frequency: f64, amplitude: f64) -> Self {
        Self {
            frequency,
            amplitude,
            prepared: None,
        }
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(440.0, 0.25)
    }
}

impl CaptureBackend for SyntheticBackend {
    type Intake = StreamIntake;
    type Control = StreamControl;

    fn open(&mut self, config: &SessionConfig) -> Result<(StreamIntake, StreamControl), AudioError> {
        let flags = Arc::new(DriverFlags::default());
        self.prepared = Some((config.clone(), flags.clone()));

        tracing::info!(
            "Opened synthetic input ({:.0} Hz tone, {} Hz mono)",
            self.frequency,
            config.sample_rate
        );

        Ok((StreamIntake::new(flags.clone()), StreamControl::new(flags)))
    }

    fn attach(
        &mut self,
        mut stage: CaptureStage<StreamIntake>,
        control: &mut StreamControl,
    ) -> Result<(), AudioError> {
        let (config, flags) = self
            .prepared
            .take()
            .ok_or_else(|| AudioError::StreamError("synthetic input was not opened".into()))?;

        let mut tone = SineTone::new(config.sample_rate, self.frequency, self.amplitude);
        let chunk_frames = (config.frames_per_buffer / 2).max(1);
        let chunk_period = config.buffer_duration() / 2;

        let handle = thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let mut next = Instant::now() + chunk_period;
                while flags.is_alive() {
                    let now = Instant::now();
                    if now < next {
                        thread::sleep((next - now).min(Duration::from_millis(10)));
                        continue;
                    }
                    next += chunk_period;
                    flags.feed(&mut stage, tone.next_chunk(chunk_frames));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        control.set_thread(handle);
        Ok(())
    }
}
