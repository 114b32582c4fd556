//! Network thread of a capture session
//!
//! Takes completed buffers off ReadyQ, sends each as one datagram and hands
//! it back to FreeQ. The destination is either latched from the first
//! discovery probe or a fixed broadcast address.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::driver::{RecordControl, RecordState};
use crate::audio::pipeline::NetworkStage;
use crate::audio::pool::BufferHandle;
use crate::config::Destination;
use crate::error::NetworkError;
use crate::session::SessionCounters;

/// Probes are never inspected, only their source address
const PROBE_SCRATCH_SIZE: usize = 64;

/// Decides where each buffer goes
pub struct EndpointResolver {
    destination: Destination,
    latched: Option<SocketAddr>,
    scratch: Box<[u8]>,
}

impl EndpointResolver {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            latched: None,
            scratch: vec![0u8; PROBE_SCRATCH_SIZE].into_boxed_slice(),
        }
    }

    /// Current destination, draining pending discovery probes first.
    ///
    /// In discovery mode the first probe's source address is latched for the
    /// rest of the session; `None` means nobody has probed yet.
    pub fn resolve(&mut self, socket: &UdpSocket) -> Result<Option<SocketAddr>, NetworkError> {
        match self.destination {
            Destination::Broadcast { address } => Ok(Some(address)),
            Destination::Discovery => {
                self.drain_probes(socket)?;
                Ok(self.latched)
            }
        }
    }

    /// Latch `from` unless a client is already known. Returns true if it
    /// became the destination.
    pub fn observe(&mut self, from: SocketAddr) -> bool {
        if self.latched.is_some() {
            return false;
        }
        tracing::info!("Discovered client at {}", from);
        self.latched = Some(from);
        true
    }

    pub fn latched(&self) -> Option<SocketAddr> {
        self.latched
    }

    fn drain_probes(&mut self, socket: &UdpSocket) -> Result<(), NetworkError> {
        loop {
            match socket.recv_from(&mut self.scratch) {
                Ok((_, from)) => {
                    self.observe(from);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                // ICMP port-unreachable from an earlier send surfaces here on some hosts
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
            }
        }
    }
}

/// Network loop of a capture session
pub struct StreamSender<C> {
    socket: UdpSocket,
    resolver: EndpointResolver,
    stage: NetworkStage,
    control: C,
    running: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    stall_timeout: Duration,
}

impl<C: RecordControl + 'static> StreamSender<C> {
    pub fn new(
        socket: UdpSocket,
        destination: Destination,
        stage: NetworkStage,
        control: C,
        running: Arc<AtomicBool>,
        counters: Arc<SessionCounters>,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            socket,
            resolver: EndpointResolver::new(destination),
            stage,
            control,
            running,
            counters,
            stall_timeout,
        }
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<JoinHandle<Result<(), NetworkError>>> {
        thread::Builder::new()
            .name("mic-network".into())
            .spawn(move || self.run())
    }

    /// Stream until the running flag clears or a send fails.
    ///
    /// On exit the driver is stopped and cleared and the running flag is
    /// cleared, whichever way the loop ended.
    pub fn run(mut self) -> Result<(), NetworkError> {
        tracing::info!("Network loop started on {:?}", self.socket.local_addr().ok());

        let result = self.pump();
        if let Err(e) = &result {
            tracing::error!("Network loop failed: {}", e);
        }

        self.running.store(false, Ordering::Release);
        self.stop_driver();

        tracing::info!("Network loop stopped");
        result
    }

    fn pump(&mut self) -> Result<(), NetworkError> {
        while self.running.load(Ordering::Acquire) {
            let Some(handle) = self.wait_ready() else {
                break;
            };

            let sent = self.transmit(&handle);
            self.stage.release(handle);
            sent?;
        }
        Ok(())
    }

    /// Wait for the next Ready buffer, warning if capture stalls.
    fn wait_ready(&mut self) -> Option<BufferHandle> {
        let running = &self.running;
        let counters = &self.counters;
        let stall_timeout = self.stall_timeout;
        let mut waiting_since = Instant::now();

        self.stage.take_ready_while(|| {
            if !running.load(Ordering::Acquire) {
                return false;
            }
            if waiting_since.elapsed() >= stall_timeout {
                tracing::warn!(
                    "No audio captured for {:?} (submit failures: {}); capture driver may have stalled",
                    stall_timeout,
                    counters.submit_failures.load(Ordering::Relaxed)
                );
                waiting_since = Instant::now();
            }
            true
        })
    }

    fn transmit(&mut self, handle: &BufferHandle) -> Result<(), NetworkError> {
        let Some(destination) = self.resolver.resolve(&self.socket)? else {
            self.counters.buffers_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        let bytes = self.stage.bytes(handle);
        let sent = check_sent(
            self.socket.send_to(bytes, destination),
            bytes.len(),
            destination,
        )?;
        self.counters.buffers_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_sent
            .fetch_add(sent as u64, Ordering::Relaxed);
        Ok(())
    }

    fn stop_driver(&mut self) {
        if let Err(e) = self.control.set_record_state(RecordState::Stopped) {
            tracing::error!("Failed to stop recording: {}", e);
        }
        if let Err(e) = self.control.clear() {
            tracing::error!("Failed to clear driver queue: {}", e);
        }
    }
}

/// Accept a send only if the whole buffer went out as one datagram.
///
/// Every send error ends the session, including `WouldBlock` from a full
/// socket buffer.
fn check_sent(
    result: io::Result<usize>,
    expected: usize,
    destination: SocketAddr,
) -> Result<usize, NetworkError> {
    match result {
        Ok(sent) if sent == expected => Ok(sent),
        Ok(sent) => Err(NetworkError::PartialSend { sent, expected }),
        Err(e) => Err(NetworkError::SendFailed(format!("{}: {}", destination, e))),
    }
}
