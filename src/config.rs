//! Application configuration
//!
//! Everything is plain data with serde derives, stored as TOML. A missing
//! file falls back to [`AppConfig::default`].

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub relay: RelayConfig,
}

impl AppConfig {
    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/lan-mic-relay/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        directories::ProjectDirs::from("", "", "lan-mic-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from [`default_path`](Self::default_path) if present.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Ok(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.relay.validate()
    }
}

/// How the sender picks where captured buffers go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Destination {
    /// Latch the first address that probes the sender's port.
    #[default]
    Discovery,
    /// Send every buffer to a fixed broadcast address.
    Broadcast { address: SocketAddr },
}

/// Capture session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub frames_per_buffer: usize,
    /// Local address the sender socket binds to
    pub bind_address: IpAddr,
    pub port: u16,
    pub buffer_count: usize,
    pub kickstart_count: usize,
    /// Input device id as listed by the sender (default input if unset)
    pub device_id: Option<String>,
    pub stall_timeout_ms: u64,
    pub destination: Destination,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_UDP_PORT,
            buffer_count: DEFAULT_BUFFER_COUNT,
            kickstart_count: DEFAULT_KICKSTART_COUNT,
            device_id: None,
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
            destination: Destination::Discovery,
        }
    }
}

impl SessionConfig {
    /// Bytes per captured buffer and per datagram.
    pub fn buffer_size(&self) -> usize {
        self.frames_per_buffer * SAMPLE_SIZE
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Duration of audio held by one buffer.
    pub fn buffer_duration(&self) -> Duration {
        let nanos = self.frames_per_buffer as u64 * 1_000_000_000 / u64::from(self.sample_rate);
        Duration::from_nanos(nanos)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".into()));
        }
        if self.frames_per_buffer == 0 {
            return Err(ConfigError::Invalid(
                "frames_per_buffer must be non-zero".into(),
            ));
        }
        if self.buffer_size() > MAX_PACKET_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer of {} bytes does not fit a datagram",
                self.buffer_size()
            )));
        }
        if self.kickstart_count == 0 {
            return Err(ConfigError::Invalid(
                "kickstart_count must be at least 1".into(),
            ));
        }
        if self.kickstart_count >= self.buffer_count {
            return Err(ConfigError::Invalid(format!(
                "buffer_count ({}) must exceed kickstart_count ({})",
                self.buffer_count, self.kickstart_count
            )));
        }
        Ok(())
    }
}

/// Which local sink the relay feeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// PulseAudio `module-pipe-source` fed through a FIFO
    Pipe {
        source_name: String,
        path: PathBuf,
        sample_rate: u32,
    },
    /// Raw PCM on standard output
    Stdout,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::Pipe {
            source_name: "lan_mic".into(),
            path: std::env::temp_dir().join("lan-mic-relay.pipe"),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Receive relay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// Where heartbeats go; normally the broadcast address on the sender port
    pub heartbeat_target: SocketAddr,
    /// Largest datagram accepted, normally the sender's buffer size
    pub buffer_size: usize,
    pub timeout_ms: u64,
    pub sink: SinkConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            heartbeat_target: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                DEFAULT_UDP_PORT,
            ),
            buffer_size: DEFAULT_FRAMES_PER_BUFFER * SAMPLE_SIZE,
            timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            sink: SinkConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 || self.buffer_size > MAX_PACKET_SIZE {
            return Err(ConfigError::Invalid(format!(
                "relay buffer_size {} out of range",
                self.buffer_size
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("relay timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_design() {
        let config = AppConfig::default();

        assert_eq!(config.session.buffer_size(), 640);
        assert_eq!(config.session.buffer_count, 4);
        assert_eq!(config.session.kickstart_count, 3);
        assert_eq!(config.session.port, 12345);
        assert_eq!(config.session.buffer_duration(), Duration::from_millis(20));
        assert_eq!(config.relay.timeout(), Duration::from_millis(1000));
        assert_eq!(config.relay.buffer_size, 640);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_kickstart_must_leave_a_free_buffer() {
        let config = SessionConfig {
            kickstart_count: 4,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = SessionConfig {
            kickstart_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let config = SessionConfig {
            frames_per_buffer: 40_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_broadcast_destination() {
        let text = r#"
            [session]
            frames_per_buffer = 160

            [session.destination]
            mode = "broadcast"
            address = "192.168.1.255:12345"

            [relay]
            timeout_ms = 500

            [relay.sink]
            kind = "stdout"
        "#;

        let config: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(config.session.frames_per_buffer, 160);
        assert_eq!(config.session.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(
            config.session.destination,
            Destination::Broadcast {
                address: "192.168.1.255:12345".parse().unwrap()
            }
        );
        assert_eq!(config.relay.timeout_ms, 500);
        assert_eq!(config.relay.sink, SinkConfig::Stdout);
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("lan-mic-relay-test-{}", std::process::id()))
            .join("config.toml");
        let mut config = AppConfig::default();
        config.session.device_id = Some("input:USB Mic".into());

        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        std::fs::remove_dir_all(path.parent().unwrap()).ok();

        assert_eq!(loaded, config);
    }
}
