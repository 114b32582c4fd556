//! Capture driver seams
//!
//! The platform audio driver is consumed through three small traits:
//!
//! - [`BufferIntake`]: accepts empty buffers for filling. Called from the
//!   realtime completion context (and once per buffer during kickstart), so
//!   implementations must not block.
//! - [`RecordControl`]: starts/stops recording and flushes the driver queue.
//!   Owned by the network thread.
//! - [`CaptureBackend`]: acquires the device and, once the pipeline is
//!   kickstarted, takes over the [`CaptureStage`] and drives
//!   [`CaptureStage::complete`] from its own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::pipeline::CaptureStage;
use crate::config::SessionConfig;
use crate::error::{AudioError, DriverError};

/// Recorder state as understood by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Stopped,
    Recording,
}

/// Intake side of a capture driver.
pub trait BufferIntake: Send {
    /// Queue the pool buffer at `index` for capture. Must not block.
    fn enqueue(&mut self, index: usize) -> Result<(), DriverError>;
}

/// Record-state control of a capture driver.
pub trait RecordControl: Send {
    fn set_record_state(&mut self, state: RecordState) -> Result<(), DriverError>;

    /// Drop every buffer the driver has queued but not yet completed.
    fn clear(&mut self) -> Result<(), DriverError>;
}

/// A platform capture backend.
pub trait CaptureBackend {
    type Intake: BufferIntake + 'static;
    type Control: RecordControl + 'static;

    /// Acquire the capture device for a session.
    fn open(&mut self, config: &SessionConfig)
        -> Result<(Self::Intake, Self::Control), AudioError>;

    /// Hand the completion side of a kickstarted pipeline to the driver.
    ///
    /// From here on the backend owns `stage` and calls
    /// [`CaptureStage::complete`] (usually through
    /// [`CaptureStage::write_samples`]) whenever a submitted buffer is full.
    /// Recording does not begin until `control` is switched to
    /// [`RecordState::Recording`].
    fn attach(
        &mut self,
        stage: CaptureStage<Self::Intake>,
        control: &mut Self::Control,
    ) -> Result<(), AudioError>;
}

/// Flags shared between a stream thread and the session.
///
/// Backends that receive samples from a host callback (rather than owning a
/// real buffer queue) use these to emulate intake, record state and clear.
#[derive(Debug)]
pub struct DriverFlags {
    recording: AtomicBool,
    clear_requested: AtomicBool,
    alive: AtomicBool,
    disconnected: AtomicBool,
}

impl Default for DriverFlags {
    fn default() -> Self {
        Self {
            recording: AtomicBool::new(false),
            clear_requested: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
        }
    }
}

impl DriverFlags {
    /// Deliver host samples to the pipeline, honouring record state and
    /// pending clears. Called from the realtime callback.
    pub fn feed(
        &self,
        stage: &mut CaptureStage<StreamIntake>,
        samples: impl IntoIterator<Item = i16>,
    ) {
        if self.clear_requested.swap(false, Ordering::AcqRel) {
            stage.reset_fill();
        }
        if !self.recording.load(Ordering::Acquire) {
            return;
        }
        stage.write_samples(samples);
    }

    /// Whether the stream thread should keep its stream open.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the underlying stream as lost; later driver calls fail.
    pub fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }
}

/// Intake for stream-fed backends.
///
/// The stream always fills the buffer at the head of PendingQ, so accepting
/// a buffer only requires the stream to still be there.
pub struct StreamIntake {
    flags: Arc<DriverFlags>,
}

impl StreamIntake {
    pub fn new(flags: Arc<DriverFlags>) -> Self {
        Self { flags }
    }
}

impl BufferIntake for StreamIntake {
    fn enqueue(&mut self, _index: usize) -> Result<(), DriverError> {
        if self.flags.is_disconnected() {
            return Err(DriverError::Disconnected);
        }
        Ok(())
    }
}

/// Record control for stream-fed backends; owns the stream thread.
pub struct StreamControl {
    flags: Arc<DriverFlags>,
    thread: Option<JoinHandle<()>>,
}

impl StreamControl {
    pub fn new(flags: Arc<DriverFlags>) -> Self {
        Self {
            flags,
            thread: None,
        }
    }

    /// Adopt the thread that keeps the host stream alive.
    pub fn set_thread(&mut self, thread: JoinHandle<()>) {
        self.thread = Some(thread);
    }
}

impl RecordControl for StreamControl {
    fn set_record_state(&mut self, state: RecordState) -> Result<(), DriverError> {
        let recording = state == RecordState::Recording;
        if recording && self.flags.is_disconnected() {
            return Err(DriverError::RecordState("capture stream is gone".into()));
        }
        self.flags.recording.store(recording, Ordering::Release);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DriverError> {
        if self.flags.is_disconnected() {
            return Err(DriverError::Clear("capture stream is gone".into()));
        }
        self.flags.clear_requested.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for StreamControl {
    fn drop(&mut self) {
        self.flags.recording.store(false, Ordering::Release);
        self.flags.alive.store(false, Ordering::Release);

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("Capture stream thread panicked");
            }
        }
    }
}
