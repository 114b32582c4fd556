//! Desktop-side receive relay
//!
//! Copies every datagram from the relay socket into a [`LocalSink`]. While
//! the socket is quiet it broadcasts a zero-length heartbeat once per
//! timeout, which doubles as the discovery probe the sender latches onto.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::RelayConfig;
use crate::error::{NetworkError, Result};
use crate::network::udp;
use crate::sink::LocalSink;

/// Relay counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub datagrams: u64,
    pub bytes: u64,
    pub heartbeats: u64,
    pub heartbeat_failures: u64,
    pub empty_datagrams: u64,
}

/// Outcome of one relay iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStep {
    /// A datagram of this many bytes went to the sink
    Forwarded(usize),
    /// The socket was quiet for a whole timeout
    Heartbeat,
    /// A zero-length datagram arrived and was skipped
    Empty,
}

/// Receive loop from the relay socket to a local sink
pub struct ReceiveRelay<S> {
    socket: UdpSocket,
    sink: S,
    heartbeat_target: SocketAddr,
    timeout: Duration,
    buffer: Vec<u8>,
    stats: RelayStats,
}

impl<S: LocalSink> ReceiveRelay<S> {
    /// Bind the relay socket per `config`, then attach `sink`. Must be
    /// called inside a tokio runtime.
    ///
    /// The sink is left untouched if the socket cannot be bound.
    pub fn bind(config: &RelayConfig, mut sink: S) -> Result<Self> {
        config.validate()?;
        let socket = udp::bind_relay(config)?;
        sink.attach()?;
        Ok(Self::with_socket(socket, config, sink))
    }

    /// Relay from an already bound socket into an already attached sink.
    pub fn with_socket(socket: UdpSocket, config: &RelayConfig, sink: S) -> Self {
        Self {
            socket,
            sink,
            heartbeat_target: config.heartbeat_target,
            timeout: config.timeout(),
            buffer: vec![0u8; config.buffer_size],
            stats: RelayStats::default(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Relay until `shutdown` completes or a receive/sink error occurs.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!(
            "Relaying {} -> {} (heartbeat to {} every {:?} of silence)",
            self.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into()),
            self.sink.name(),
            self.heartbeat_target,
            self.timeout
        );

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                step = self.step() => {
                    if let Err(e) = step {
                        break Err(e);
                    }
                }
            }
        };

        tracing::info!(
            "Relay stopped: {} datagrams ({:.1} KB), {} heartbeats",
            self.stats.datagrams,
            self.stats.bytes as f64 / 1024.0,
            self.stats.heartbeats
        );
        result
    }

    /// Wait for one datagram or one timeout.
    pub async fn step(&mut self) -> Result<RelayStep> {
        let received =
            tokio::time::timeout(self.timeout, self.socket.recv_from(&mut self.buffer)).await;

        match received {
            Err(_) => {
                self.send_heartbeat().await;
                Ok(RelayStep::Heartbeat)
            }
            Ok(Err(e)) => Err(NetworkError::ReceiveFailed(e.to_string()).into()),
            Ok(Ok((0, from))) => {
                tracing::debug!("Skipping empty datagram from {}", from);
                self.stats.empty_datagrams += 1;
                Ok(RelayStep::Empty)
            }
            Ok(Ok((len, _))) => {
                self.forward(len)?;
                self.stats.datagrams += 1;
                self.stats.bytes += len as u64;
                Ok(RelayStep::Forwarded(len))
            }
        }
    }

    /// Write the first `len` received bytes to the sink.
    ///
    /// Sink writes block. On a multi-threaded runtime they run under
    /// `block_in_place` so other tasks, signal handling included, keep
    /// their worker.
    fn forward(&mut self, len: usize) -> Result<()> {
        let data = &self.buffer[..len];
        let sink = &mut self.sink;

        let multi_thread = matches!(
            Handle::try_current().map(|handle| handle.runtime_flavor()),
            Ok(RuntimeFlavor::MultiThread)
        );
        if multi_thread {
            tokio::task::block_in_place(|| sink.write_all(data))?;
        } else {
            sink.write_all(data)?;
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self) {
        match self.socket.send_to(&[], self.heartbeat_target).await {
            Ok(_) => {
                self.stats.heartbeats += 1;
                tracing::trace!("Heartbeat sent to {}", self.heartbeat_target);
            }
            Err(e) => {
                self.stats.heartbeat_failures += 1;
                tracing::warn!("Heartbeat to {} failed: {}", self.heartbeat_target, e);
            }
        }
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
