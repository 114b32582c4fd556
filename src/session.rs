//! Capture session lifecycle
//!
//! A session wires a [`CaptureBackend`] to the buffer pipeline and a network
//! thread. Setup runs in a fixed order (validate, open the device, kickstart,
//! bind the socket, attach, start recording, spawn the network thread) and a
//! failure at any step releases what the earlier steps acquired.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::driver::{CaptureBackend, RecordControl, RecordState};
use crate::audio::pipeline::{kickstart, NetworkStage};
use crate::config::SessionConfig;
use crate::error::{AudioError, Error, NetworkError, Result};
use crate::network::sender::StreamSender;
use crate::network::udp;

/// Counters shared by the capture callback and the network thread
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub buffers_captured: AtomicU64,
    pub buffers_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// Ready buffers returned unsent because no client is known yet
    pub buffers_dropped: AtomicU64,
    pub submit_failures: AtomicU64,
    /// Samples discarded because no buffer was pending
    pub overrun_samples: AtomicU64,
    /// Completions with an empty PendingQ
    pub spurious_completions: AtomicU64,
}

impl SessionCounters {
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            buffers_captured: self.buffers_captured.load(Ordering::Relaxed),
            buffers_sent: self.buffers_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            buffers_dropped: self.buffers_dropped.load(Ordering::Relaxed),
            submit_failures: self.submit_failures.load(Ordering::Relaxed),
            overrun_samples: self.overrun_samples.load(Ordering::Relaxed),
            spurious_completions: self.spurious_completions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionCounters`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub buffers_captured: u64,
    pub buffers_sent: u64,
    pub bytes_sent: u64,
    pub buffers_dropped: u64,
    pub submit_failures: u64,
    pub overrun_samples: u64,
    pub spurious_completions: u64,
}

/// A running capture-and-send session
pub struct CaptureSession {
    running: Arc<AtomicBool>,
    network_thread: Option<JoinHandle<std::result::Result<(), NetworkError>>>,
    counters: Arc<SessionCounters>,
    local_addr: SocketAddr,
}

impl CaptureSession {
    /// Start capturing with `backend` and streaming per `config`.
    pub fn start<B: CaptureBackend>(config: &SessionConfig, backend: &mut B) -> Result<Self> {
        config.validate()?;

        let (intake, mut control) = backend.open(config)?;
        let counters = Arc::new(SessionCounters::default());

        let prepared = (|| -> Result<(NetworkStage, UdpSocket, SocketAddr)> {
            let (capture, network) = kickstart(
                config.buffer_count,
                config.buffer_size(),
                config.kickstart_count,
                intake,
                counters.clone(),
            )
            .map_err(AudioError::from)?;

            let socket = udp::bind_sender(config)?;
            let local_addr = socket.local_addr()?;
            backend.attach(capture, &mut control)?;
            control
                .set_record_state(RecordState::Recording)
                .map_err(AudioError::from)?;

            Ok((network, socket, local_addr))
        })();

        let (network, socket, local_addr) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("Capture session setup failed: {}", e);
                release_driver(&mut control);
                return Err(e);
            }
        };

        let running = Arc::new(AtomicBool::new(true));

        let sender = StreamSender::new(
            socket,
            config.destination,
            network,
            control,
            running.clone(),
            counters.clone(),
            config.stall_timeout(),
        );
        let network_thread = sender.spawn()?;

        tracing::info!(
            "Capture session started: {} Hz, {} frames/buffer, {} buffers ({} in flight), socket {}, destination {:?}",
            config.sample_rate,
            config.frames_per_buffer,
            config.buffer_count,
            config.kickstart_count,
            local_addr,
            config.destination
        );

        Ok(Self {
            running,
            network_thread: Some(network_thread),
            counters,
            local_addr,
        })
    }

    /// Stop the session and wait for the network thread.
    ///
    /// Returns the error that ended the network loop, if any. Later calls
    /// are no-ops.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.network_thread.take() else {
            return Ok(());
        };

        self.running.store(false, Ordering::Release);
        let outcome = handle.join().map_err(|_| Error::WorkerPanicked)?;

        let stats = self.stats();
        tracing::info!(
            "Capture session stopped: {} captured, {} sent ({:.1} KB), {} dropped",
            stats.buffers_captured,
            stats.buffers_sent,
            stats.bytes_sent as f64 / 1024.0,
            stats.buffers_dropped
        );

        outcome.map_err(Error::from)
    }

    /// Whether the network loop is still streaming.
    pub fn is_running(&self) -> bool {
        self.network_thread.is_some() && self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Address of the sender socket (where discovery probes go).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Capture session ended with error: {}", e);
        }
    }
}

/// Best-effort rollback of a driver that never started streaming.
fn release_driver(control: &mut impl RecordControl) {
    if let Err(e) = control.set_record_state(RecordState::Stopped) {
        tracing::warn!("Failed to stop recording: {}", e);
    }
    if let Err(e) = control.clear() {
        tracing::warn!("Failed to clear driver queue: {}", e);
    }
}
