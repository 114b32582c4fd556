//! Microphone capture through cpal
//!
//! The host stream lives on its own thread for the life of the session. Its
//! data callback is the completion context: it copies samples into the buffer
//! at the head of PendingQ and completes each buffer as it fills.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::device::find_input_device;
use crate::audio::driver::{CaptureBackend, DriverFlags, StreamControl, StreamIntake};
use crate::audio::pipeline::CaptureStage;
use crate::config::SessionConfig;
use crate::error::AudioError;

/// Device resolved by `open`, consumed by `attach`
struct OpenedDevice {
    device: cpal::Device,
    config: StreamConfig,
    format: SampleFormat,
    flags: Arc<DriverFlags>,
}

/// Capture backend for the host's input devices
pub struct CpalBackend {
    device_id: Option<String>,
    opened: Option<OpenedDevice>,
}

impl CpalBackend {
    /// Capture from the device with this id, or the default input.
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            device_id,
            opened: None,
        }
    }
}

impl CaptureBackend for CpalBackend {
    type Intake = StreamIntake;
    type Control = StreamControl;

    fn open(&mut self, config: &SessionConfig) -> Result<(StreamIntake, StreamControl), AudioError> {
        let device = find_input_device(self.device_id.as_deref())?;
        let format = device.default_input_config()?.sample_format();

        if !matches!(format, SampleFormat::I16 | SampleFormat::F32) {
            return Err(AudioError::UnsupportedFormat(format!("{:?}", format)));
        }

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        tracing::info!(
            "Opened input device {} ({:?}, {} Hz mono)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            format,
            config.sample_rate
        );

        let flags = Arc::new(DriverFlags::default());
        self.opened = Some(OpenedDevice {
            device,
            config: stream_config,
            format,
            flags: flags.clone(),
        });

        Ok((StreamIntake::new(flags.clone()), StreamControl::new(flags)))
    }

    fn attach(
        &mut self,
        stage: CaptureStage<StreamIntake>,
        control: &mut StreamControl,
    ) -> Result<(), AudioError> {
        let OpenedDevice {
            device,
            config,
            format,
            flags,
        } = self
            .opened
            .take()
            .ok_or_else(|| AudioError::StreamError("capture device was not opened".into()))?;

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match build_stream(&device, &config, format, stage, flags.clone()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while the session holds the control
                while flags.is_alive() {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let started = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("capture thread exited during setup".into()));

        match started {
            Ok(Ok(())) => {
                control.set_thread(handle);
                Ok(())
            }
            Ok(Err(e)) | Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    mut stage: CaptureStage<StreamIntake>,
    flags: Arc<DriverFlags>,
) -> Result<cpal::Stream, AudioError> {
    let error_flags = flags.clone();
    let on_error = move |err: cpal::StreamError| {
        tracing::error!("Capture stream error: {}", err);
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            error_flags.mark_disconnected();
        }
    };

    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                flags.feed(&mut stage, data.iter().copied());
            },
            on_error,
            None,
        )?,
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                flags.feed(&mut stage, data.iter().map(|&s| f32_to_i16(s)));
            },
            on_error,
            None,
        )?,
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };

    Ok(stream)
}

/// Convert a float sample in `[-1.0, 1.0]` to signed 16-bit, clamping.
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
