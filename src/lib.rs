//! # LAN Mic Relay
//!
//! Low-latency microphone capture streamed as raw PCM datagrams over LAN.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               CAPTURE HOST                               │
//! │                                                                          │
//! │   ┌──────────────┐  complete()  ┌──────────────────────────────────┐     │
//! │   │ Capture      │─────────────▶│  CaptureStage (audio::pipeline)  │     │
//! │   │ driver       │◀─────────────│  PendingQ ─▶ ReadyQ              │     │
//! │   │ (cpal thread)│  enqueue()   │  FreeQ ─▶ PendingQ               │     │
//! │   └──────────────┘              └───────┬──────────────▲───────────┘     │
//! │                                  ReadyQ │              │ FreeQ           │
//! │                                         ▼              │                 │
//! │                              ┌──────────────────────────────────┐        │
//! │                              │ StreamSender (network::sender)   │        │
//! │                              │ network thread, one UDP socket   │        │
//! │                              │ discovery latch or broadcast     │        │
//! │                              └───────────────┬──────────────────┘        │
//! └──────────────────────────────────────────────┼───────────────────────────┘
//!                        raw s16le mono datagrams │  ▲ zero-length probes /
//!                                                 ▼  │ heartbeats
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              DESKTOP HOST                                │
//! │   ┌──────────────────────────────────┐        ┌────────────────────┐     │
//! │   │ ReceiveRelay (network::relay)    │───────▶│ LocalSink (sink)   │     │
//! │   │ heartbeat after 1 s of silence   │ write  │ PulseAudio pipe    │     │
//! │   └──────────────────────────────────┘        └────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The capture callback and the network thread share no lock: buffers move
//! between them as [`audio::pool::BufferHandle`]s through lock-free SPSC
//! rings, and a single atomic flag cancels the session.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod sink;

pub use error::{Error, Result};
pub use session::{CaptureSession, SessionStats};

/// Application-wide constants
pub mod constants {
    /// Default capture sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Default frames per captured buffer (20 ms at 16 kHz)
    pub const DEFAULT_FRAMES_PER_BUFFER: usize = 320;

    /// Bytes per sample: mono signed 16-bit little-endian
    pub const SAMPLE_SIZE: usize = 2;

    /// Default UDP port shared by sender and relay
    pub const DEFAULT_UDP_PORT: u16 = 12345;

    /// Buffers per capture session
    pub const DEFAULT_BUFFER_COUNT: usize = 4;

    /// Buffers handed to the driver before recording starts
    pub const DEFAULT_KICKSTART_COUNT: usize = 3;

    /// Silence on the relay socket before a heartbeat is sent
    pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 1000;

    /// Time without a captured buffer before the sender warns about a stall
    pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 2000;

    /// Largest UDP payload over IPv4
    pub const MAX_PACKET_SIZE: usize = 65_507;
}
