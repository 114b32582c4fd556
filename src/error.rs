//! Error types for the microphone relay

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network thread panicked")]
    WorkerPanicked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        AudioError::CpalError(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(e: cpal::PlayStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

/// Failures reported by a capture driver's intake or record control
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Driver queue is full")]
    QueueFull,

    #[error("Failed to enqueue buffer: {0}")]
    Enqueue(String),

    #[error("Failed to change record state: {0}")]
    RecordState(String),

    #[error("Failed to clear driver queue: {0}")]
    Clear(String),

    #[error("Capture stream is gone")]
    Disconnected,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Partial send: {sent} of {expected} bytes")]
    PartialSend { sent: usize, expected: usize },

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Local audio sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to attach sink: {0}")]
    AttachFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("Failed to detach sink: {0}")]
    DetachFailed(String),

    #[error("Sink is not attached")]
    NotAttached,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No configuration directory available")]
    NoConfigDir,

    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
